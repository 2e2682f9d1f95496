//! Cohort definitions and retention analysis results

use crate::error::Error;
use crate::types::AggregationPeriod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortType {
    Acquisition,
    Behavioral,
    Retention,
    Revenue,
}

impl CohortType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CohortType::Acquisition => "acquisition",
            CohortType::Behavioral => "behavioral",
            CohortType::Retention => "retention",
            CohortType::Revenue => "revenue",
        }
    }
}

impl FromStr for CohortType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acquisition" => Ok(CohortType::Acquisition),
            "behavioral" => Ok(CohortType::Behavioral),
            "retention" => Ok(CohortType::Retention),
            "revenue" => Ok(CohortType::Revenue),
            other => Err(Error::Validation(format!("Unknown cohort type: {}", other))),
        }
    }
}

/// A stored user-grouping definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cohort {
    pub id: String,
    pub name: String,
    pub cohort_type: CohortType,
    pub description: Option<String>,
    /// Free-form membership criteria, interpreted by the engine.
    pub criteria: serde_json::Value,
    pub period: AggregationPeriod,
    pub user_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Retention figures for one period of a cohort analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortRetention {
    pub period: u32,
    pub period_start: DateTime<Utc>,
    pub users_active: u64,
    pub retention_rate: f64,
    /// Equals `retention_rate` for periods past the first; 100.0 at period 0.
    pub cumulative_retention: f64,
}

/// Full retention analysis for a date-based cohort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortAnalysis {
    pub cohort_name: String,
    pub cohort_date: DateTime<Utc>,
    pub initial_users: u64,
    pub retention_data: Vec<CohortRetention>,
    pub avg_retention_rate: f64,
    pub churn_rate: f64,
}
