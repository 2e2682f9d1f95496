//! Cohort/retention engine
//!
//! Cohort membership is keyed on `User.first_seen_at` inside the acquisition
//! window; activity per period is counted from session starts.

use crate::{round2, with_deadline};
use chrono::{DateTime, Utc};
use eventide_core::cohort::{CohortAnalysis, CohortRetention};
use eventide_core::types::safe_divide;
use eventide_core::{AggregationPeriod, Result};
use eventide_store::{AnalyticsStore, SessionRepo, UserRepo};
use std::collections::HashSet;
use std::time::Duration;

pub struct CohortEngine {
    store: AnalyticsStore,
}

impl CohortEngine {
    pub fn new(store: AnalyticsStore) -> Self {
        Self { store }
    }

    /// Retention analysis for the cohort acquired around `cohort_date`.
    ///
    /// `period_type` should be day, week, or month (30 days); anything else
    /// falls back to day. Returns `None` for an empty cohort.
    ///
    /// The cumulative retention column intentionally repeats each period's
    /// own rate for periods past the first; it is not a survival product.
    pub async fn analyze_retention_cohort(
        &self,
        cohort_date: DateTime<Utc>,
        periods: u32,
        period_type: AggregationPeriod,
        deadline: Option<Duration>,
    ) -> Result<Option<CohortAnalysis>> {
        let body = self.analyze(cohort_date, periods, period_type);
        match with_deadline(deadline, body).await {
            Ok(result) => Ok(result),
            Err(e @ eventide_core::Error::Timeout(_)) => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "Cohort analysis failed");
                Ok(None)
            }
        }
    }

    async fn analyze(
        &self,
        cohort_date: DateTime<Utc>,
        periods: u32,
        period_type: AggregationPeriod,
    ) -> Result<Option<CohortAnalysis>> {
        let cohort_start = AggregationPeriod::Day.truncate(cohort_date);
        let delta = period_type.delta();

        let mut sess = self.store.session().await?;

        let cohort_users: HashSet<String> = UserRepo
            .ids_first_seen_between(&mut sess, cohort_start, cohort_start + delta)
            .await?
            .into_iter()
            .collect();
        let initial = cohort_users.len() as u64;
        if initial == 0 {
            return Ok(None);
        }

        let mut retention_data = Vec::with_capacity(periods as usize);
        for period in 0..periods {
            let period_start = cohort_start + delta * period as i32;
            let period_end = period_start + delta;

            let active = SessionRepo
                .count_active_in_window(&mut sess, &cohort_users, period_start, period_end)
                .await?;
            let retention_rate = round2(safe_divide(active as f64, initial as f64) * 100.0);
            let cumulative_retention = if period == 0 { 100.0 } else { retention_rate };

            retention_data.push(CohortRetention {
                period,
                period_start,
                users_active: active,
                retention_rate,
                cumulative_retention,
            });
        }

        let avg_retention = retention_data
            .iter()
            .map(|r| r.retention_rate)
            .sum::<f64>()
            / retention_data.len() as f64;
        let avg_retention = round2(avg_retention);
        let churn_rate = round2(100.0 - avg_retention);

        tracing::info!(
            cohort_date = %cohort_start,
            initial_users = initial,
            periods = periods,
            avg_retention = avg_retention,
            "Cohort analyzed"
        );

        Ok(Some(CohortAnalysis {
            cohort_name: format!("Cohort {}", cohort_start.date_naive()),
            cohort_date: cohort_start,
            initial_users: initial,
            retention_data,
            avg_retention_rate: avg_retention,
            churn_rate,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use eventide_core::{Session, User};

    async fn setup() -> (AnalyticsStore, CohortEngine) {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let engine = CohortEngine::new(store.clone());
        (store, engine)
    }

    fn day() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    async fn seed_user_with_session(store: &AnalyticsStore, id: &str, seen: DateTime<Utc>) {
        let mut sess = store.session().await.unwrap();
        UserRepo.create(&mut sess, &User::new(id, seen)).await.unwrap();
        SessionRepo.create(&mut sess, &Session::open(id, seen)).await.unwrap();
        sess.commit().await.unwrap();
    }

    async fn seed_session(store: &AnalyticsStore, user: &str, at: DateTime<Utc>) {
        let mut sess = store.session().await.unwrap();
        SessionRepo.create(&mut sess, &Session::open(user, at)).await.unwrap();
        sess.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_cohort_is_none() {
        let (_store, engine) = setup().await;
        let result = engine
            .analyze_retention_cohort(day(), 3, AggregationPeriod::Week, None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_weekly_retention_decay() {
        let (store, engine) = setup().await;

        // 4 users acquired in the cohort week, each with an opening session
        for (i, user) in ["u1", "u2", "u3", "u4"].iter().enumerate() {
            seed_user_with_session(&store, user, day() + ChronoDuration::days(i as i64)).await;
        }
        // 2 come back in week 1, 1 in week 2
        seed_session(&store, "u1", day() + ChronoDuration::weeks(1)).await;
        seed_session(&store, "u2", day() + ChronoDuration::weeks(1) + ChronoDuration::days(2)).await;
        seed_session(&store, "u1", day() + ChronoDuration::weeks(2)).await;
        // A user outside the cohort never counts
        seed_session(&store, "stranger", day() + ChronoDuration::weeks(1)).await;

        let analysis = engine
            .analyze_retention_cohort(day(), 3, AggregationPeriod::Week, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(analysis.initial_users, 4);
        assert_eq!(analysis.retention_data.len(), 3);

        let rates: Vec<f64> = analysis.retention_data.iter().map(|r| r.retention_rate).collect();
        assert_eq!(rates, vec![100.0, 50.0, 25.0]);

        // Rates bounded; active never exceeds initial
        for r in &analysis.retention_data {
            assert!(r.retention_rate >= 0.0 && r.retention_rate <= 100.0);
            assert!(r.users_active <= analysis.initial_users);
        }

        // Cumulative: 100 at period 0, then the period's own rate
        assert_eq!(analysis.retention_data[0].cumulative_retention, 100.0);
        assert_eq!(analysis.retention_data[1].cumulative_retention, 50.0);

        assert_eq!(analysis.avg_retention_rate, round2((100.0 + 50.0 + 25.0) / 3.0));
        assert_eq!(analysis.churn_rate, round2(100.0 - analysis.avg_retention_rate));
    }

    #[tokio::test]
    async fn test_cohort_date_truncated_to_midnight() {
        let (store, engine) = setup().await;

        // Acquired at 23:30 on the cohort day: still a member for a daily
        // cohort anchored anywhere in that day
        seed_user_with_session(
            &store,
            "u1",
            day() + ChronoDuration::hours(23) + ChronoDuration::minutes(30),
        )
        .await;

        let analysis = engine
            .analyze_retention_cohort(
                day() + ChronoDuration::hours(15),
                1,
                AggregationPeriod::Day,
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.initial_users, 1);
        assert_eq!(analysis.cohort_date, day());
    }
}
