//! Eventide Core - shared types for the analytics platform
//!
//! This crate defines the entities of the event pipeline (events, users,
//! sessions, funnels, goals, cohorts, metrics), the closed enums they use,
//! the validation limits applied at the ingest boundary, and the error
//! taxonomy shared by every other crate in the workspace.

pub mod cohort;
pub mod dashboard;
pub mod error;
pub mod event;
pub mod export;
pub mod funnel;
pub mod goal;
pub mod metric;
pub mod session;
pub mod types;
pub mod user;

pub use error::{Error, Result};
pub use event::{Event, EventCreate, EventQuery};
pub use session::Session;
pub use types::{AggregationPeriod, AttributionModel, EventType, MetricType};
pub use user::User;

/// Generate a new opaque entity id (UUID v4 rendered as a string).
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
