//! Shared fixtures for the end-to-end scenario tests under `tests/`.

use chrono::{DateTime, Utc};
use eventide_core::event::EventCreate;
use eventide_core::funnel::{Funnel, FunnelStep};
use eventide_core::{generate_id, Event, EventType};
use eventide_store::{AnalyticsStore, EventRepo};

/// Insert one already-materialized event, committing immediately.
pub async fn insert_event(store: &AnalyticsStore, event: &Event) {
    let mut sess = store.session().await.expect("open session");
    EventRepo.create(&mut sess, event).await.expect("insert event");
    sess.commit().await.expect("commit");
}

/// A materialized event for `user` at `ts`.
pub fn event_at(ty: EventType, user: &str, ts: DateTime<Utc>) -> Event {
    Event::from_create(
        generate_id(),
        EventCreate::new(ty.as_str(), ty).with_user(user).with_timestamp(ts),
    )
}

/// A funnel whose steps are the given event types, in order.
pub fn funnel_named(name: &str, step_types: &[EventType]) -> Funnel {
    let id = generate_id();
    let now = Utc::now();
    Funnel {
        id: id.clone(),
        name: name.to_string(),
        description: None,
        enabled: true,
        steps: step_types
            .iter()
            .enumerate()
            .map(|(order, ty)| FunnelStep {
                id: generate_id(),
                funnel_id: id.clone(),
                name: format!("{} step", ty.as_str()),
                event_type: *ty,
                order: order as i64,
                description: None,
            })
            .collect(),
        created_at: now,
        updated_at: now,
    }
}
