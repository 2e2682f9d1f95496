//! Entity repositories
//!
//! One repository per entity, all operating on an explicit `StoreSession`.
//! Uniform shape: create / bulk_create / get_by_id / get_by_filters /
//! update / delete / count, plus the typed extensions each entity needs.
//! Missing ids yield `Ok(None)`; integrity violations yield
//! `Error::Conflict`.

mod ab_test;
mod cohort;
mod dashboard;
mod event;
mod export;
mod funnel;
mod goal;
mod metric;
mod sessions;
mod user;

pub use ab_test::AbTestRepo;
pub use cohort::CohortRepo;
pub use dashboard::DashboardRepo;
pub use event::EventRepo;
pub use export::ExportJobRepo;
pub use funnel::FunnelRepo;
pub use goal::{GoalConversionRepo, GoalRepo};
pub use metric::MetricRepo;
pub use sessions::{SessionAggregateRow, SessionRepo};
pub use user::UserRepo;

/// Chunk size for `IN (...)` lists, kept well under SQLite's bind limit.
pub(crate) const IN_CHUNK: usize = 500;

/// `?, ?, ...` for n binds.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub(crate) fn json_encode<T: serde::Serialize>(value: &T) -> eventide_core::Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn json_decode<T: serde::de::DeserializeOwned>(
    raw: &str,
) -> eventide_core::Result<T> {
    Ok(serde_json::from_str(raw)?)
}
