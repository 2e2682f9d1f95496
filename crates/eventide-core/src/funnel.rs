//! Funnel definitions and analysis results

use crate::error::{Error, Result};
use crate::types::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type FunnelId = String;

/// A configured conversion path: an ordered list of event-type steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funnel {
    pub id: FunnelId,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    /// Steps sorted by `order`, which must form 0, 1, 2, ...
    pub steps: Vec<FunnelStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStep {
    pub id: String,
    pub funnel_id: FunnelId,
    pub name: String,
    pub event_type: EventType,
    pub order: i64,
    pub description: Option<String>,
}

impl Funnel {
    /// Check that step orders form a strictly increasing sequence from 0.
    pub fn validate_steps(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Validation(format!(
                "Funnel '{}' has no steps",
                self.name
            )));
        }
        let mut orders: Vec<i64> = self.steps.iter().map(|s| s.order).collect();
        orders.sort_unstable();
        for (i, order) in orders.iter().enumerate() {
            if *order != i as i64 {
                return Err(Error::Validation(format!(
                    "Funnel '{}' steps must be ordered 0..{}, found order {}",
                    self.name,
                    self.steps.len() - 1,
                    order
                )));
            }
        }
        Ok(())
    }

    /// Steps sorted by order, ready for analysis.
    pub fn sorted_steps(&self) -> Vec<&FunnelStep> {
        let mut steps: Vec<&FunnelStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

/// Per-step statistics from a funnel analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStepStats {
    pub step_id: String,
    pub step_name: String,
    pub order: i64,
    pub entered: u64,
    pub completed: u64,
    pub dropped: u64,
    pub completion_rate: f64,
    pub drop_off_rate: f64,
}

/// Full funnel analysis over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelAnalysis {
    pub funnel_id: FunnelId,
    pub funnel_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_entered: u64,
    pub total_completed: u64,
    pub overall_conversion_rate: f64,
    pub steps: Vec<FunnelStepStats>,
}
