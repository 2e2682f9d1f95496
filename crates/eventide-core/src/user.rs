//! User entity, derived and upserted from events

use crate::event::Properties;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User identifier (UUID format, or the client-supplied id)
pub type UserId = String;

/// A user as derived from the event stream.
///
/// Counters are monotone non-decreasing; they are only ever touched through
/// the repository's atomic increment, never read-modify-write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub properties: Properties,

    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub total_sessions: i64,
    pub total_events: i64,
    pub total_conversions: i64,
    pub lifetime_value: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a fresh user first seen at the given instant.
    pub fn new(id: impl Into<UserId>, first_seen_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            external_id: None,
            email: None,
            name: None,
            properties: Properties::new(),
            first_seen_at,
            last_seen_at: first_seen_at,
            total_sessions: 0,
            total_events: 0,
            total_conversions: 0,
            lifetime_value: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Age of the user in whole days as of `now`.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.first_seen_at).num_days()
    }

    /// Days since the user was last seen as of `now`.
    pub fn days_since_last_seen(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_seen_at).num_days()
    }
}

/// Atomic additive update applied via `UserRepo::increment_stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserStatsDelta {
    pub sessions: i64,
    pub events: i64,
    pub conversions: i64,
    pub value: f64,
}

impl UserStatsDelta {
    pub fn events(n: i64) -> Self {
        Self {
            events: n,
            ..Default::default()
        }
    }

    pub fn sessions(n: i64) -> Self {
        Self {
            sessions: n,
            ..Default::default()
        }
    }

    pub fn conversion(value: f64) -> Self {
        Self {
            conversions: 1,
            value,
            ..Default::default()
        }
    }
}
