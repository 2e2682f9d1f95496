//! Full write-path/read-path flow through the typed service layer.

use chrono::{Duration, Utc};
use eventide_api::{status_code, AppContext};
use eventide_config::{Config, DatabaseConfig};
use eventide_core::event::{EventCreate, EventQuery};
use eventide_core::goal::Goal;
use eventide_core::{EventType, Session};
use eventide_store::{GoalRepo, SessionRepo, UserRepo};
use serde_json::json;

async fn context() -> AppContext {
    let config = Config {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        },
        ..Config::default()
    };
    AppContext::initialize(config).await.unwrap()
}

#[tokio::test]
async fn ingest_process_and_query() {
    let ctx = context().await;

    // A goal and an explicitly opened session
    let goal = Goal::new("signup goal", EventType::Signup).with_value(5.0);
    {
        let mut sess = ctx.store.session().await.unwrap();
        GoalRepo.create(&mut sess, &goal).await.unwrap();
        sess.commit().await.unwrap();
    }
    let session = ctx
        .service
        .start_session("u1", Some("newsletter".into()), None, None, None, None)
        .await
        .unwrap();

    // Write path: client -> tracker queue -> flusher -> store
    let mut create = EventCreate::new("signed_up", EventType::Signup).with_user("u1");
    create.session_id = Some(session.id.clone());
    let accepted = ctx.service.create_event("client-1", create).await.unwrap();
    ctx.tracker.flush().await.unwrap();

    // Processor pass: user materialized, session updated, goal fired
    let processed = ctx.processor.process_events().await;
    assert_eq!(processed, 1);

    {
        let mut sess = ctx.store.session().await.unwrap();
        let user = UserRepo.get_by_id(&mut sess, "u1").await.unwrap().unwrap();
        assert_eq!(user.total_events, 1);
        assert_eq!(user.total_conversions, 1);
        assert_eq!(user.lifetime_value, 5.0);

        let stored = SessionRepo.get_by_id(&mut sess, &session.id).await.unwrap().unwrap();
        assert!(stored.converted);
        assert_eq!(stored.events_count, 1);
    }

    // Read path: typed queries through the service
    let page = ctx
        .service
        .query_events(EventQuery::new().user("u1"))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.events[0].id, accepted.id);

    let buckets = ctx
        .service
        .aggregate_last_hours(1, eventide_core::AggregationPeriod::Hour)
        .await
        .unwrap();
    assert!(!buckets.is_empty());

    let health = ctx.service.health_check().await;
    assert_eq!(health.status, "healthy");

    ctx.shutdown().await;
}

#[tokio::test]
async fn validation_and_skew_rejections_map_to_422() {
    let ctx = context().await;

    // Oversized property bag
    let mut spam = EventCreate::new("spam", EventType::Custom);
    for i in 0..=100 {
        spam.properties.insert(format!("k{}", i), json!(i));
    }
    let err = ctx.service.create_event("c", spam).await.unwrap_err();
    assert_eq!(status_code(&err), 422);

    // Future timestamp beyond skew tolerance
    let skewed = EventCreate::new("from_the_future", EventType::PageView)
        .with_timestamp(Utc::now() + Duration::minutes(10));
    let err = ctx.service.create_event("c", skewed).await.unwrap_err();
    assert_eq!(status_code(&err), 422);

    ctx.shutdown().await;
}

#[tokio::test]
async fn derived_state_is_reconstructable_from_events() {
    // Replaying the same event log through a fresh processor yields the
    // same derived counters
    let ctx = context().await;

    let goal = Goal::new("purchase", EventType::Purchase).with_value(20.0);
    {
        let mut sess = ctx.store.session().await.unwrap();
        GoalRepo.create(&mut sess, &goal).await.unwrap();
        sess.commit().await.unwrap();
    }

    for i in 0..3 {
        ctx.service
            .create_event(
                "c",
                EventCreate::new(format!("purchase_{}", i), EventType::Purchase).with_user("u1"),
            )
            .await
            .unwrap();
    }
    ctx.tracker.flush().await.unwrap();
    assert_eq!(ctx.processor.process_events().await, 3);

    let mut sess = ctx.store.session().await.unwrap();
    let user = UserRepo.get_by_id(&mut sess, "u1").await.unwrap().unwrap();
    assert_eq!(user.total_events, 3);
    assert_eq!(user.total_conversions, 3);
    assert_eq!(user.lifetime_value, 60.0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn explicit_session_open_required() {
    let ctx = context().await;

    // Events naming a never-opened session process fine but create nothing
    let mut create = EventCreate::new("view", EventType::PageView).with_user("u1");
    create.session_id = Some("never-opened".to_string());
    ctx.service.create_event("c", create).await.unwrap();
    ctx.tracker.flush().await.unwrap();
    ctx.processor.process_events().await;

    let mut sess = ctx.store.session().await.unwrap();
    assert!(SessionRepo.get_by_id(&mut sess, "never-opened").await.unwrap().is_none());

    // Opening explicitly, then ending, closes cleanly
    let session = ctx
        .service
        .start_session("u1", None, None, None, None, None)
        .await
        .unwrap();
    let closed = ctx.service.end_session(&session.id).await.unwrap();
    assert!(matches!(closed, Session { ended_at: Some(_), .. }));

    ctx.shutdown().await;
}
