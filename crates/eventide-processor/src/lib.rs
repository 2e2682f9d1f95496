//! Eventide processor - turns raw events into derived state
//!
//! Consumes unprocessed events in batches: upserts users, folds events into
//! their sessions, and evaluates goal conversions. Per-event faults are
//! logged and skipped (the event simply stays unprocessed); the batch's
//! side effects and the processed-flag update commit in one store session.

pub mod enrich;

pub use enrich::{enrich_event, parse_user_agent, GeoInfo, UserAgentInfo};

use chrono::Utc;
use eventide_core::goal::GoalConversion;
use eventide_core::user::UserStatsDelta;
use eventide_core::{Event, EventType, Result, User};
use eventide_store::{
    AnalyticsStore, EventRepo, GoalConversionRepo, GoalRepo, SessionRepo, StoreSession, UserRepo,
};

pub struct EventProcessor {
    store: AnalyticsStore,
    batch_size: u32,
}

impl EventProcessor {
    pub fn new(store: AnalyticsStore, batch_size: u32) -> Self {
        tracing::info!(batch_size = batch_size, "Event processor initialized");
        Self { store, batch_size }
    }

    /// One processing pass over unprocessed events.
    ///
    /// Returns the number of events successfully processed and marked.
    /// Faults never propagate: a per-event fault skips that event, a
    /// pass-level fault logs and returns 0.
    pub async fn process_events(&self) -> u64 {
        match self.process_batch().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Processing pass failed");
                0
            }
        }
    }

    async fn process_batch(&self) -> Result<u64> {
        let mut sess = self.store.session().await?;
        let events = EventRepo.get_unprocessed(&mut sess, self.batch_size).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut processed_ids = Vec::with_capacity(events.len());
        for event in &events {
            match self.process_one(&mut sess, event).await {
                Ok(()) => processed_ids.push(event.id.clone()),
                Err(e) => {
                    tracing::error!(event_id = %event.id, error = %e, "Error processing event");
                }
            }
        }

        let marked = if processed_ids.is_empty() {
            0
        } else {
            EventRepo
                .mark_processed(&mut sess, &processed_ids, Utc::now())
                .await?
        };
        sess.commit().await?;

        tracing::info!(
            batch = events.len(),
            processed = marked,
            "Processing pass complete"
        );
        Ok(marked)
    }

    /// Process one event: user stats, session state, goal conversions.
    async fn process_one(&self, sess: &mut StoreSession, event: &Event) -> Result<()> {
        if event.user_id.is_some() {
            self.update_user(sess, event).await?;
        }
        if event.session_id.is_some() {
            self.update_session(sess, event).await?;
        }
        self.check_goal_conversions(sess, event).await?;

        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Processed event");
        Ok(())
    }

    /// Upsert the user and count the event.
    async fn update_user(&self, sess: &mut StoreSession, event: &Event) -> Result<()> {
        let Some(user_id) = &event.user_id else {
            return Ok(());
        };

        if UserRepo.get_by_id(sess, user_id).await?.is_none() {
            let user = User::new(user_id.clone(), event.timestamp);
            match UserRepo.create(sess, &user).await {
                Ok(()) => {}
                // A concurrent processor created the row first
                Err(eventide_core::Error::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        UserRepo
            .increment_stats(sess, user_id, UserStatsDelta::events(1))
            .await?;
        Ok(())
    }

    /// Fold the event into its session, if the session row exists.
    ///
    /// Sessions are never auto-created here; an unknown session id is a
    /// no-op.
    async fn update_session(&self, sess: &mut StoreSession, event: &Event) -> Result<()> {
        let Some(session_id) = &event.session_id else {
            return Ok(());
        };
        let Some(mut session) = SessionRepo.get_by_id(sess, session_id).await? else {
            return Ok(());
        };

        session.apply_event(event.event_type, event.timestamp);
        if event.event_type == EventType::SessionEnd {
            session.close();
        }
        SessionRepo.update(sess, &session).await?;
        Ok(())
    }

    /// Fire conversions for every enabled goal matching this event.
    ///
    /// The (goal, event) pair fires at most once: an application-level
    /// existence check plus the store's unique index.
    async fn check_goal_conversions(&self, sess: &mut StoreSession, event: &Event) -> Result<()> {
        let goals = GoalRepo.get_enabled_for_type(sess, event.event_type).await?;

        for goal in goals {
            if !goal.matches(event) {
                continue;
            }
            if GoalConversionRepo.exists(sess, &goal.id, &event.id).await? {
                continue;
            }

            let conversion = GoalConversion::from_match(&goal, event);
            match GoalConversionRepo.create(sess, &conversion).await {
                Ok(()) => {}
                // Lost the race to a concurrent processor; the conversion
                // is already recorded
                Err(eventide_core::Error::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }

            let value = goal.value.unwrap_or(0.0);
            GoalRepo.increment_conversions(sess, &goal.id, value).await?;

            if let Some(session_id) = &event.session_id
                && let Some(mut session) = SessionRepo.get_by_id(sess, session_id).await?
            {
                session.record_conversion(goal.value);
                SessionRepo.update(sess, &session).await?;
            }

            if let Some(user_id) = &event.user_id {
                UserRepo
                    .increment_stats(sess, user_id, UserStatsDelta::conversion(value))
                    .await?;
            }

            tracing::info!(
                goal = %goal.name,
                event_id = %event.id,
                user_id = event.user_id.as_deref().unwrap_or("-"),
                "Goal conversion fired"
            );
        }

        Ok(())
    }

    /// Process a single event synchronously, with optional enrichment.
    ///
    /// Returns false when the event id does not resolve.
    pub async fn process_event_sync(
        &self,
        event_id: &str,
        geo: Option<&GeoInfo>,
        ua: Option<&UserAgentInfo>,
    ) -> Result<bool> {
        let mut sess = self.store.session().await?;
        let Some(mut event) = EventRepo.get_by_id(&mut sess, event_id).await? else {
            return Ok(false);
        };

        if geo.is_some() || ua.is_some() || event.user_agent.is_some() {
            enrich_event(&mut event, geo, ua);
            EventRepo.update_enrichment(&mut sess, &event).await?;
        }

        self.process_one(&mut sess, &event).await?;
        EventRepo
            .mark_processed(&mut sess, &[event.id.clone()], Utc::now())
            .await?;
        sess.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use eventide_core::event::EventCreate;
    use eventide_core::goal::Goal;
    use eventide_core::{generate_id, Session};
    use serde_json::json;

    async fn setup() -> (AnalyticsStore, EventProcessor) {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let processor = EventProcessor::new(store.clone(), 1000);
        (store, processor)
    }

    async fn insert_event(store: &AnalyticsStore, event: &Event) {
        let mut sess = store.session().await.unwrap();
        EventRepo.create(&mut sess, event).await.unwrap();
        sess.commit().await.unwrap();
    }

    fn event_for(ty: EventType, user: &str, session: Option<&str>) -> Event {
        let mut create = EventCreate::new(ty.as_str(), ty).with_user(user);
        if let Some(session) = session {
            create = create.with_session(session);
        }
        Event::from_create(generate_id(), create)
    }

    #[tokio::test]
    async fn test_zero_unprocessed_is_noop() {
        let (_store, processor) = setup().await;
        assert_eq!(processor.process_events().await, 0);
    }

    #[tokio::test]
    async fn test_creates_user_and_counts_events() {
        let (store, processor) = setup().await;
        insert_event(&store, &event_for(EventType::PageView, "u1", None)).await;
        insert_event(&store, &event_for(EventType::ButtonClick, "u1", None)).await;

        assert_eq!(processor.process_events().await, 2);

        let mut sess = store.session().await.unwrap();
        let user = UserRepo.get_by_id(&mut sess, "u1").await.unwrap().unwrap();
        assert_eq!(user.total_events, 2);

        // All events marked, so a second pass is a no-op
        assert_eq!(processor.process_events().await, 0);
    }

    #[tokio::test]
    async fn test_session_counters_and_bounce() {
        let (store, processor) = setup().await;

        let t0 = Utc::now() - Duration::minutes(5);
        let session = Session::open("u1", t0);
        let session_id = session.id.clone();
        {
            let mut sess = store.session().await.unwrap();
            SessionRepo.create(&mut sess, &session).await.unwrap();
            sess.commit().await.unwrap();
        }

        let mut event = event_for(EventType::PageView, "u1", Some(&session_id));
        event.timestamp = t0 + Duration::seconds(10);
        insert_event(&store, &event).await;

        processor.process_events().await;

        let mut sess = store.session().await.unwrap();
        let stored = SessionRepo.get_by_id(&mut sess, &session_id).await.unwrap().unwrap();
        assert_eq!(stored.page_views, 1);
        assert_eq!(stored.events_count, 1);
        assert_eq!(stored.duration_seconds, Some(10));
        assert!(stored.is_bounce);
        assert!(stored.is_open());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_created() {
        let (store, processor) = setup().await;
        insert_event(&store, &event_for(EventType::PageView, "u1", Some("ghost-session"))).await;

        assert_eq!(processor.process_events().await, 1);

        let mut sess = store.session().await.unwrap();
        assert!(SessionRepo.get_by_id(&mut sess, "ghost-session").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_end_event_closes_session() {
        let (store, processor) = setup().await;

        let t0 = Utc::now() - Duration::minutes(5);
        let session = Session::open("u1", t0);
        let session_id = session.id.clone();
        {
            let mut sess = store.session().await.unwrap();
            SessionRepo.create(&mut sess, &session).await.unwrap();
            sess.commit().await.unwrap();
        }

        let mut end = event_for(EventType::SessionEnd, "u1", Some(&session_id));
        end.timestamp = t0 + Duration::seconds(90);
        insert_event(&store, &end).await;

        processor.process_events().await;

        let mut sess = store.session().await.unwrap();
        let stored = SessionRepo.get_by_id(&mut sess, &session_id).await.unwrap().unwrap();
        assert!(!stored.is_open());
        assert_eq!(stored.ended_at, Some(t0 + Duration::seconds(90)));
        assert_eq!(stored.duration_seconds, Some(90));
    }

    #[tokio::test]
    async fn test_goal_conversion_full_flow_and_idempotence() {
        let (store, processor) = setup().await;

        // Goal G: purchase, no conditions, value 100
        let goal = Goal::new("purchase goal", EventType::Purchase).with_value(100.0);
        let session = Session::open("u1", Utc::now() - Duration::minutes(2));
        let session_id = session.id.clone();
        {
            let mut sess = store.session().await.unwrap();
            GoalRepo.create(&mut sess, &goal).await.unwrap();
            SessionRepo.create(&mut sess, &session).await.unwrap();
            sess.commit().await.unwrap();
        }

        let event = event_for(EventType::Purchase, "u1", Some(&session_id));
        insert_event(&store, &event).await;

        // First pass fires the conversion
        assert_eq!(processor.process_events().await, 1);

        {
            let mut sess = store.session().await.unwrap();
            let g = GoalRepo.get_by_id(&mut sess, &goal.id).await.unwrap().unwrap();
            assert_eq!(g.total_conversions, 1);
            assert_eq!(g.total_value, 100.0);

            let user = UserRepo.get_by_id(&mut sess, "u1").await.unwrap().unwrap();
            assert_eq!(user.total_conversions, 1);
            assert_eq!(user.lifetime_value, 100.0);

            let s = SessionRepo.get_by_id(&mut sess, &session_id).await.unwrap().unwrap();
            assert!(s.converted);
            assert_eq!(s.conversion_value, Some(100.0));

            assert!(GoalConversionRepo.exists(&mut sess, &goal.id, &event.id).await.unwrap());
        }

        // Second pass sees nothing unprocessed; state is unchanged
        assert_eq!(processor.process_events().await, 0);
        let mut sess = store.session().await.unwrap();
        let g = GoalRepo.get_by_id(&mut sess, &goal.id).await.unwrap().unwrap();
        assert_eq!(g.total_conversions, 1);
        let user = UserRepo.get_by_id(&mut sess, "u1").await.unwrap().unwrap();
        assert_eq!(user.total_conversions, 1);
        assert_eq!(user.lifetime_value, 100.0);
    }

    #[tokio::test]
    async fn test_goal_conditions_gate_conversion() {
        let (store, processor) = setup().await;

        let goal = Goal::new("pro purchase", EventType::Purchase)
            .with_condition("plan", json!("pro"))
            .with_value(50.0);
        {
            let mut sess = store.session().await.unwrap();
            GoalRepo.create(&mut sess, &goal).await.unwrap();
            sess.commit().await.unwrap();
        }

        let miss = Event::from_create(
            generate_id(),
            EventCreate::new("purchase", EventType::Purchase)
                .with_user("u1")
                .with_property("plan", json!("free")),
        );
        let hit = Event::from_create(
            generate_id(),
            EventCreate::new("purchase", EventType::Purchase)
                .with_user("u2")
                .with_property("plan", json!("pro")),
        );
        insert_event(&store, &miss).await;
        insert_event(&store, &hit).await;

        processor.process_events().await;

        let mut sess = store.session().await.unwrap();
        let g = GoalRepo.get_by_id(&mut sess, &goal.id).await.unwrap().unwrap();
        assert_eq!(g.total_conversions, 1);
        assert!(GoalConversionRepo.exists(&mut sess, &goal.id, &hit.id).await.unwrap());
        assert!(!GoalConversionRepo.exists(&mut sess, &goal.id, &miss.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_process_event_sync_with_enrichment() {
        let (store, processor) = setup().await;

        let mut event = event_for(EventType::PageView, "u1", None);
        event.user_agent = Some(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        );
        insert_event(&store, &event).await;

        let geo = GeoInfo {
            country: Some("US".to_string()),
            city: Some("Portland".to_string()),
        };
        let ok = processor
            .process_event_sync(&event.id, Some(&geo), None)
            .await
            .unwrap();
        assert!(ok);

        let mut sess = store.session().await.unwrap();
        let stored = EventRepo.get_by_id(&mut sess, &event.id).await.unwrap().unwrap();
        assert!(stored.processed);
        assert!(stored.processed_at.is_some());
        assert_eq!(stored.country.as_deref(), Some("US"));
        assert_eq!(stored.browser.as_deref(), Some("Chrome"));

        // Unknown ids report false
        let missing = processor.process_event_sync("nope", None, None).await.unwrap();
        assert!(!missing);
    }
}
