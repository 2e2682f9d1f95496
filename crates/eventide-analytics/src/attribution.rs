//! Attribution engine
//!
//! Apportions a conversion's credit across the channels of the touchpoints
//! that preceded it, over a 30-day lookback. Credits always sum to 1.0 when
//! any touchpoint exists.

use crate::with_deadline;
use chrono::Duration as ChronoDuration;
use eventide_core::{AttributionModel, Event, Result};
use eventide_store::{AnalyticsStore, EventRepo, GoalConversionRepo};
use std::collections::HashMap;
use std::time::Duration;

/// Lookback window before a conversion.
const LOOKBACK_DAYS: i64 = 30;
/// Time-decay constant: weight = exp(-days_ago / 7).
const DECAY_DAYS: f64 = 7.0;

pub struct AttributionEngine {
    store: AnalyticsStore,
}

impl AttributionEngine {
    pub fn new(store: AnalyticsStore) -> Self {
        Self { store }
    }

    /// Credit-per-channel for one conversion under the given model.
    ///
    /// Empty map when the conversion is unknown, has no user, or the user
    /// produced no touchpoints in the lookback window.
    pub async fn calculate_attribution(
        &self,
        conversion_id: &str,
        model: AttributionModel,
        deadline: Option<Duration>,
    ) -> Result<HashMap<String, f64>> {
        let body = self.calculate(conversion_id, model);
        match with_deadline(deadline, body).await {
            Ok(result) => Ok(result),
            Err(e @ eventide_core::Error::Timeout(_)) => Err(e),
            Err(e) => {
                tracing::error!(conversion_id = conversion_id, error = %e, "Attribution failed");
                Ok(HashMap::new())
            }
        }
    }

    async fn calculate(
        &self,
        conversion_id: &str,
        model: AttributionModel,
    ) -> Result<HashMap<String, f64>> {
        let mut sess = self.store.session().await?;

        let Some(conversion) = GoalConversionRepo.get_by_id(&mut sess, conversion_id).await? else {
            tracing::warn!(conversion_id = conversion_id, "Conversion not found");
            return Ok(HashMap::new());
        };
        let Some(user_id) = &conversion.user_id else {
            return Ok(HashMap::new());
        };

        let lookback_start = conversion.converted_at - ChronoDuration::days(LOOKBACK_DAYS);
        let touchpoints = EventRepo
            .get_touchpoints(&mut sess, user_id, lookback_start, conversion.converted_at)
            .await?;

        if touchpoints.is_empty() {
            return Ok(HashMap::new());
        }

        let credits = match model {
            AttributionModel::FirstTouch => first_touch(&touchpoints),
            AttributionModel::LastTouch => last_touch(&touchpoints),
            AttributionModel::Linear => linear(&touchpoints),
            AttributionModel::TimeDecay => time_decay(&touchpoints, conversion.converted_at),
            AttributionModel::PositionBased => position_based(&touchpoints),
        };

        tracing::debug!(
            conversion_id = conversion_id,
            model = %model,
            touchpoints = touchpoints.len(),
            channels = credits.len(),
            "Attribution calculated"
        );
        Ok(credits)
    }
}

/// The channel a touchpoint belongs to: utm source, else referrer, else
/// direct.
fn channel_of(event: &Event) -> String {
    event
        .utm_source
        .clone()
        .or_else(|| event.referrer.clone())
        .unwrap_or_else(|| "direct".to_string())
}

fn first_touch(touchpoints: &[Event]) -> HashMap<String, f64> {
    let mut credits = HashMap::new();
    if let Some(first) = touchpoints.first() {
        credits.insert(channel_of(first), 1.0);
    }
    credits
}

fn last_touch(touchpoints: &[Event]) -> HashMap<String, f64> {
    let mut credits = HashMap::new();
    if let Some(last) = touchpoints.last() {
        credits.insert(channel_of(last), 1.0);
    }
    credits
}

fn linear(touchpoints: &[Event]) -> HashMap<String, f64> {
    let share = 1.0 / touchpoints.len() as f64;
    let mut credits: HashMap<String, f64> = HashMap::new();
    for touchpoint in touchpoints {
        *credits.entry(channel_of(touchpoint)).or_insert(0.0) += share;
    }
    credits
}

fn time_decay(
    touchpoints: &[Event],
    converted_at: chrono::DateTime<chrono::Utc>,
) -> HashMap<String, f64> {
    // Whole days ago, truncating, matching the published semantics
    let weights: Vec<f64> = touchpoints
        .iter()
        .map(|t| {
            let days_ago = (converted_at - t.timestamp).num_days() as f64;
            (-days_ago / DECAY_DAYS).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();

    let mut credits: HashMap<String, f64> = HashMap::new();
    for (touchpoint, weight) in touchpoints.iter().zip(&weights) {
        *credits.entry(channel_of(touchpoint)).or_insert(0.0) += weight / total;
    }
    credits
}

fn position_based(touchpoints: &[Event]) -> HashMap<String, f64> {
    let mut credits: HashMap<String, f64> = HashMap::new();

    match touchpoints.len() {
        1 => {
            credits.insert(channel_of(&touchpoints[0]), 1.0);
        }
        2 => {
            *credits.entry(channel_of(&touchpoints[0])).or_insert(0.0) += 0.5;
            *credits.entry(channel_of(&touchpoints[1])).or_insert(0.0) += 0.5;
        }
        n => {
            *credits.entry(channel_of(&touchpoints[0])).or_insert(0.0) += 0.4;
            *credits.entry(channel_of(&touchpoints[n - 1])).or_insert(0.0) += 0.4;
            let middle_share = 0.2 / (n - 2) as f64;
            for touchpoint in &touchpoints[1..n - 1] {
                *credits.entry(channel_of(touchpoint)).or_insert(0.0) += middle_share;
            }
        }
    }

    credits
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use eventide_core::event::EventCreate;
    use eventide_core::goal::{Goal, GoalConversion};
    use eventide_core::{generate_id, EventType};
    use eventide_store::GoalRepo;

    fn touchpoint(source: Option<&str>, referrer: Option<&str>, ts: DateTime<Utc>) -> Event {
        let mut create = EventCreate::new("view", EventType::PageView)
            .with_user("u1")
            .with_timestamp(ts);
        create.referrer = referrer.map(String::from);
        if let Some(source) = source {
            create = create.with_utm_source(source);
        }
        Event::from_create(generate_id(), create)
    }

    fn assert_sums_to_one(credits: &HashMap<String, f64>) {
        let total: f64 = credits.values().sum();
        assert!((total - 1.0).abs() < 1e-9, "credits sum to {}", total);
    }

    #[test]
    fn test_channel_resolution() {
        let now = Utc::now();
        assert_eq!(channel_of(&touchpoint(Some("google"), Some("ref"), now)), "google");
        assert_eq!(channel_of(&touchpoint(None, Some("news.site"), now)), "news.site");
        assert_eq!(channel_of(&touchpoint(None, None, now)), "direct");
    }

    #[test]
    fn test_first_and_last_touch() {
        let base = Utc::now();
        let touchpoints = vec![
            touchpoint(Some("google"), None, base - ChronoDuration::days(3)),
            touchpoint(Some("facebook"), None, base - ChronoDuration::days(1)),
        ];

        let first = first_touch(&touchpoints);
        assert_eq!(first.get("google"), Some(&1.0));
        assert_sums_to_one(&first);

        let last = last_touch(&touchpoints);
        assert_eq!(last.get("facebook"), Some(&1.0));
        assert_sums_to_one(&last);
    }

    #[test]
    fn test_linear_aggregates_by_channel() {
        let base = Utc::now();
        let touchpoints = vec![
            touchpoint(Some("google"), None, base - ChronoDuration::days(3)),
            touchpoint(Some("google"), None, base - ChronoDuration::days(2)),
            touchpoint(None, None, base - ChronoDuration::days(1)),
            touchpoint(Some("facebook"), None, base),
        ];

        let credits = linear(&touchpoints);
        assert_eq!(credits.get("google"), Some(&0.5));
        assert_eq!(credits.get("direct"), Some(&0.25));
        assert_eq!(credits.get("facebook"), Some(&0.25));
        assert_sums_to_one(&credits);
    }

    #[test]
    fn test_time_decay_favours_recent() {
        let converted_at = Utc::now();
        let touchpoints = vec![
            touchpoint(Some("google"), None, converted_at - ChronoDuration::days(7)),
            touchpoint(Some("facebook"), None, converted_at - ChronoDuration::days(3)),
            touchpoint(Some("facebook"), None, converted_at - ChronoDuration::hours(12)),
        ];

        let credits = time_decay(&touchpoints, converted_at);
        assert_sums_to_one(&credits);

        // Expected from the decay formula with whole-day ages 7, 3, 0
        let w = [(-7.0f64 / 7.0).exp(), (-3.0f64 / 7.0).exp(), 1.0];
        let total: f64 = w.iter().sum();
        let google_expected = w[0] / total;
        let facebook_expected = (w[1] + w[2]) / total;

        assert!((credits["google"] - google_expected).abs() < 1e-9);
        assert!((credits["facebook"] - facebook_expected).abs() < 1e-9);
        assert!(credits["facebook"] > credits["google"]);
    }

    #[test]
    fn test_position_based_splits() {
        let base = Utc::now();

        let one = vec![touchpoint(Some("a"), None, base)];
        assert_eq!(position_based(&one).get("a"), Some(&1.0));

        let two = vec![
            touchpoint(Some("a"), None, base - ChronoDuration::days(1)),
            touchpoint(Some("b"), None, base),
        ];
        let credits = position_based(&two);
        assert_eq!(credits.get("a"), Some(&0.5));
        assert_eq!(credits.get("b"), Some(&0.5));

        let five: Vec<Event> = (0..5)
            .map(|i| {
                touchpoint(
                    Some(if i == 0 { "first" } else if i == 4 { "last" } else { "mid" }),
                    None,
                    base - ChronoDuration::days(5 - i),
                )
            })
            .collect();
        let credits = position_based(&five);
        assert!((credits["first"] - 0.4).abs() < 1e-9);
        assert!((credits["last"] - 0.4).abs() < 1e-9);
        assert!((credits["mid"] - 0.2).abs() < 1e-9);
        assert_sums_to_one(&credits);
    }

    #[tokio::test]
    async fn test_end_to_end_unknown_conversion_and_no_touchpoints() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let engine = AttributionEngine::new(store.clone());

        let credits = engine
            .calculate_attribution("missing", AttributionModel::Linear, None)
            .await
            .unwrap();
        assert!(credits.is_empty());

        // A conversion whose user has no touchpoints yields an empty map
        let goal = Goal::new("g", EventType::Purchase);
        let event = Event::from_create(
            generate_id(),
            EventCreate::new("purchase", EventType::Purchase).with_user("loner"),
        );
        let conversion = GoalConversion::from_match(&goal, &event);
        {
            let mut sess = store.session().await.unwrap();
            GoalRepo.create(&mut sess, &goal).await.unwrap();
            EventRepo.create(&mut sess, &event).await.unwrap();
            GoalConversionRepo.create(&mut sess, &conversion).await.unwrap();
            sess.commit().await.unwrap();
        }

        let credits = engine
            .calculate_attribution(&conversion.id, AttributionModel::Linear, None)
            .await
            .unwrap();
        assert!(credits.is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_lookback_window() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let engine = AttributionEngine::new(store.clone());

        let converted_at = Utc::now();
        let goal = Goal::new("g", EventType::Purchase);
        let mut purchase = Event::from_create(
            generate_id(),
            EventCreate::new("purchase", EventType::Purchase).with_user("u1"),
        );
        purchase.timestamp = converted_at;
        let conversion = GoalConversion::from_match(&goal, &purchase);

        {
            let mut sess = store.session().await.unwrap();
            GoalRepo.create(&mut sess, &goal).await.unwrap();
            EventRepo.create(&mut sess, &purchase).await.unwrap();
            GoalConversionRepo.create(&mut sess, &conversion).await.unwrap();

            // Inside the window
            EventRepo
                .create(
                    &mut sess,
                    &touchpoint(Some("google"), None, converted_at - ChronoDuration::days(10)),
                )
                .await
                .unwrap();
            // Outside the 30-day lookback: ignored
            EventRepo
                .create(
                    &mut sess,
                    &touchpoint(Some("twitter"), None, converted_at - ChronoDuration::days(45)),
                )
                .await
                .unwrap();
            sess.commit().await.unwrap();
        }

        let credits = engine
            .calculate_attribution(&conversion.id, AttributionModel::Linear, None)
            .await
            .unwrap();
        assert_eq!(credits.len(), 1);
        assert_eq!(credits.get("google"), Some(&1.0));
    }
}
