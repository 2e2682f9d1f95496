//! Saved dashboard definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved dashboard: a named bundle of widget configuration owned by a user.
/// The rendering layer is out of scope; the core only stores and lists them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub config: serde_json::Value,
    pub is_public: bool,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
