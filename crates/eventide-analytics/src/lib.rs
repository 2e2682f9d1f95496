//! Eventide analytics - read-only engines over the event store
//!
//! Funnel, cohort/retention, attribution, predictive scoring, and the
//! time-bucketed aggregator. Engines never mutate state (the aggregator's
//! `save_metric` is the one deliberate write) and may run concurrently with
//! each other and with the processor.
//!
//! Deadline policy: every engine entry point takes an optional deadline.
//! Exceeding it surfaces `Error::Timeout` with no side effects; any other
//! fault is logged and degraded to the operation's empty result.

pub mod aggregator;
pub mod attribution;
pub mod cohort;
pub mod funnel;
pub mod predictive;

pub use aggregator::{DataAggregator, DimensionBucket, EventBucket, RetentionPoint, SessionMetrics};
pub use attribution::AttributionEngine;
pub use cohort::CohortEngine;
pub use funnel::FunnelEngine;
pub use predictive::PredictiveEngine;

use eventide_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Run an engine body under an optional caller deadline.
pub(crate) async fn with_deadline<T>(
    deadline: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "Engine query exceeded {:?} deadline",
                limit
            ))),
        },
        None => fut.await,
    }
}

/// Round to two decimals, the precision of every published rate.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(56.666_666), 56.67);
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(99.994), 99.99);
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result: Result<()> = with_deadline(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let result = with_deadline(Some(Duration::from_secs(5)), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
