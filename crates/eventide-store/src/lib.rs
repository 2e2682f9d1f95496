//! Eventide store - durable persistence for analytics entities
//!
//! SQLite via sqlx, WAL journal mode, idempotent schema initialization.
//! All access goes through `StoreSession`, a scoped transaction: reads
//! observe the session's own writes, integrity violations surface as
//! `Error::Conflict`, and nothing is visible to other sessions until
//! `commit`.

pub mod repos;
mod schema;
mod session;
mod store;
mod time;

pub use repos::{
    AbTestRepo, CohortRepo, DashboardRepo, EventRepo, ExportJobRepo, FunnelRepo,
    GoalConversionRepo, GoalRepo, MetricRepo, SessionAggregateRow, SessionRepo, UserRepo,
};
pub use session::StoreSession;
pub use store::AnalyticsStore;
