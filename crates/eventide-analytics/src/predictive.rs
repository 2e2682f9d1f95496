//! Predictive scoring engine
//!
//! Heuristic churn, lifetime-value, and engagement scores computed from the
//! user row plus a handful of window queries. These are rubric models, not
//! trained ones; every score has a documented range and every fault scores
//! zero.

use crate::with_deadline;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use eventide_core::{Result, User};
use eventide_store::{AnalyticsStore, EventRepo, SessionRepo, StoreSession, UserRepo};
use std::time::Duration;

pub struct PredictiveEngine {
    store: AnalyticsStore,
}

impl PredictiveEngine {
    pub fn new(store: AnalyticsStore) -> Self {
        Self { store }
    }

    /// Churn probability in [0, 1].
    ///
    /// Additive rubric: recency of last activity, average session duration,
    /// session frequency, and the 7-day session trend.
    pub async fn predict_churn(&self, user_id: &str, deadline: Option<Duration>) -> Result<f64> {
        let body = self.churn(user_id);
        self.degrade(with_deadline(deadline, body).await, "predict_churn")
    }

    /// Projected lifetime value over `months`, >= 0.
    pub async fn predict_ltv(
        &self,
        user_id: &str,
        months: u32,
        deadline: Option<Duration>,
    ) -> Result<f64> {
        let body = self.ltv(user_id, months);
        self.degrade(with_deadline(deadline, body).await, "predict_ltv")
    }

    /// Engagement score in [0, 100]:
    /// 0.3·recency + 0.3·frequency + 0.2·duration + 0.2·diversity.
    pub async fn engagement_score(&self, user_id: &str, deadline: Option<Duration>) -> Result<f64> {
        let body = self.engagement(user_id);
        self.degrade(with_deadline(deadline, body).await, "engagement_score")
    }

    async fn churn(&self, user_id: &str) -> Result<f64> {
        let mut sess = self.store.session().await?;
        let Some(user) = UserRepo.get_by_id(&mut sess, user_id).await? else {
            return Ok(0.0);
        };

        let now = Utc::now();
        let days_inactive = user.days_since_last_seen(now);
        let avg_duration = SessionRepo.avg_duration_for_user(&mut sess, user_id).await?;
        let frequency = session_frequency(&user, now);
        let trend = engagement_trend(&mut sess, user_id, now).await?;

        let mut score: f64 = 0.0;
        if days_inactive > 30 {
            score += 0.4;
        } else if days_inactive > 14 {
            score += 0.2;
        } else if days_inactive > 7 {
            score += 0.1;
        }
        if avg_duration < 60.0 {
            score += 0.2;
        }
        if frequency < 1.0 {
            score += 0.2;
        }
        if trend < -0.5 {
            score += 0.2;
        }

        Ok(score.min(1.0))
    }

    async fn ltv(&self, user_id: &str, months: u32) -> Result<f64> {
        let mut sess = self.store.session().await?;
        let Some(user) = UserRepo.get_by_id(&mut sess, user_id).await? else {
            return Ok(0.0);
        };

        let now = Utc::now();
        let age_days = user.age_days(now);
        if age_days == 0 {
            return Ok(0.0);
        }

        let avg_monthly_value = (user.lifetime_value / age_days as f64) * 30.0;
        let trend = engagement_trend(&mut sess, user_id, now).await?;
        let growth_factor = 1.0 + trend * 0.1;

        Ok((avg_monthly_value * months as f64 * growth_factor).max(0.0))
    }

    async fn engagement(&self, user_id: &str) -> Result<f64> {
        let mut sess = self.store.session().await?;
        let Some(user) = UserRepo.get_by_id(&mut sess, user_id).await? else {
            return Ok(0.0);
        };

        let now = Utc::now();
        let recency = recency_score(user.days_since_last_seen(now));
        let frequency = frequency_score(session_frequency(&user, now));
        let duration =
            duration_score(SessionRepo.avg_duration_for_user(&mut sess, user_id).await?);
        let diversity =
            diversity_score(EventRepo.count_distinct_modules(&mut sess, user_id).await?);

        let score = (recency * 0.3 + frequency * 0.3 + duration * 0.2 + diversity * 0.2) * 100.0;
        Ok(score.min(100.0))
    }

    /// Timeout propagates; any other fault scores zero.
    fn degrade(&self, result: Result<f64>, operation: &str) -> Result<f64> {
        match result {
            Ok(score) => Ok(score),
            Err(e @ eventide_core::Error::Timeout(_)) => Err(e),
            Err(e) => {
                tracing::error!(operation = operation, error = %e, "Scoring fault");
                Ok(0.0)
            }
        }
    }
}

/// Sessions per week over the user's lifetime.
fn session_frequency(user: &User, now: DateTime<Utc>) -> f64 {
    let age_days = user.age_days(now);
    if age_days == 0 {
        return 0.0;
    }
    (user.total_sessions as f64 / age_days as f64) * 7.0
}

/// Last 7 days versus the 7 days before, in [-1, 1]. Zero when the previous
/// window is empty.
async fn engagement_trend(
    sess: &mut StoreSession,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<f64> {
    let recent_start = now - ChronoDuration::days(7);
    let previous_start = now - ChronoDuration::days(14);

    let recent = SessionRepo
        .count_for_user_between(sess, user_id, recent_start, now)
        .await? as f64;
    let previous = SessionRepo
        .count_for_user_between(sess, user_id, previous_start, recent_start)
        .await? as f64;

    if previous == 0.0 {
        return Ok(0.0);
    }
    Ok(((recent - previous) / previous).clamp(-1.0, 1.0))
}

fn recency_score(days_since_last_seen: i64) -> f64 {
    match days_since_last_seen.max(0) {
        0 => 1.0,
        1 => 0.9,
        2..=7 => 0.7,
        8..=14 => 0.5,
        15..=30 => 0.3,
        _ => 0.1,
    }
}

fn frequency_score(sessions_per_week: f64) -> f64 {
    if sessions_per_week >= 7.0 {
        1.0
    } else if sessions_per_week >= 3.0 {
        0.7
    } else if sessions_per_week >= 1.0 {
        0.5
    } else if sessions_per_week > 0.0 {
        0.3
    } else {
        0.1
    }
}

fn duration_score(avg_duration_seconds: f64) -> f64 {
    if avg_duration_seconds >= 600.0 {
        1.0
    } else if avg_duration_seconds >= 300.0 {
        0.7
    } else if avg_duration_seconds >= 120.0 {
        0.5
    } else if avg_duration_seconds > 0.0 {
        0.3
    } else {
        0.1
    }
}

fn diversity_score(distinct_modules: u64) -> f64 {
    if distinct_modules >= 10 {
        1.0
    } else if distinct_modules >= 5 {
        0.7
    } else if distinct_modules >= 3 {
        0.5
    } else if distinct_modules > 0 {
        0.3
    } else {
        0.1
    }
}
