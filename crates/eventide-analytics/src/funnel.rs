//! Funnel engine
//!
//! Loose funnel semantics: a step is completed by any user in the current
//! set with a matching event anywhere in the window, regardless of ordering
//! within the user's own timeline. Step k+1 only counts users who survived
//! step k.

use crate::{round2, with_deadline};
use chrono::{DateTime, Utc};
use eventide_core::funnel::{FunnelAnalysis, FunnelStepStats};
use eventide_core::types::safe_divide;
use eventide_core::Result;
use eventide_store::{AnalyticsStore, EventRepo, FunnelRepo};
use std::time::Duration;

pub struct FunnelEngine {
    store: AnalyticsStore,
}

impl FunnelEngine {
    pub fn new(store: AnalyticsStore) -> Self {
        Self { store }
    }

    /// Analyze per-step user survival for a funnel over `[start, end]`.
    ///
    /// Returns `None` for an unknown funnel or a funnel without steps.
    pub async fn analyze_funnel(
        &self,
        funnel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        deadline: Option<Duration>,
    ) -> Result<Option<FunnelAnalysis>> {
        let body = self.analyze(funnel_id, start, end);
        match with_deadline(deadline, body).await {
            Ok(result) => Ok(result),
            Err(e @ eventide_core::Error::Timeout(_)) => Err(e),
            Err(e) => {
                tracing::error!(funnel_id = funnel_id, error = %e, "Funnel analysis failed");
                Ok(None)
            }
        }
    }

    async fn analyze(
        &self,
        funnel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<FunnelAnalysis>> {
        let mut sess = self.store.session().await?;

        let Some(funnel) = FunnelRepo.get_by_id(&mut sess, funnel_id).await? else {
            tracing::warn!(funnel_id = funnel_id, "Funnel not found");
            return Ok(None);
        };
        if funnel.steps.is_empty() {
            tracing::warn!(funnel_id = funnel_id, "Funnel has no steps");
            return Ok(None);
        }
        let steps = funnel.sorted_steps();

        // Everyone with a first-step event in the window enters the funnel
        let entered = EventRepo
            .distinct_users(&mut sess, steps[0].event_type, start, end)
            .await?;
        let total_entered = entered.len() as u64;

        if total_entered == 0 {
            return Ok(Some(FunnelAnalysis {
                funnel_id: funnel.id.clone(),
                funnel_name: funnel.name.clone(),
                start,
                end,
                total_entered: 0,
                total_completed: 0,
                overall_conversion_rate: 0.0,
                steps: Vec::new(),
            }));
        }

        let mut step_stats = Vec::with_capacity(steps.len());
        let mut current = entered;

        for step in &steps {
            let completers = EventRepo
                .distinct_users_among(&mut sess, step.event_type, &current, start, end)
                .await?;

            let entered_count = current.len() as u64;
            let completed_count = completers.len() as u64;
            let dropped = entered_count - completed_count;

            step_stats.push(FunnelStepStats {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                order: step.order,
                entered: entered_count,
                completed: completed_count,
                dropped,
                completion_rate: round2(
                    safe_divide(completed_count as f64, entered_count as f64) * 100.0,
                ),
                drop_off_rate: round2(safe_divide(dropped as f64, entered_count as f64) * 100.0),
            });

            current = completers;
        }

        let total_completed = current.len() as u64;
        let overall = round2(safe_divide(total_completed as f64, total_entered as f64) * 100.0);

        tracing::info!(
            funnel = %funnel.name,
            entered = total_entered,
            completed = total_completed,
            "Funnel analyzed"
        );

        Ok(Some(FunnelAnalysis {
            funnel_id: funnel.id.clone(),
            funnel_name: funnel.name.clone(),
            start,
            end,
            total_entered,
            total_completed,
            overall_conversion_rate: overall,
            steps: step_stats,
        }))
    }
}
