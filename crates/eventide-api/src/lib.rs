//! Eventide api - the typed operation layer
//!
//! What an HTTP router (out of scope here) would call: validated typed
//! inputs in, typed outputs out, with the error taxonomy mapped to status
//! codes. `AppContext` is the root object owning every subsystem handle;
//! nothing in the workspace is a process-global singleton.

mod context;
mod service;

pub use context::{init_tracing, AppContext};
pub use service::{
    status_code, AnalyticsService, BatchResult, EventsPage, HealthStatus, MetricsPage,
};
