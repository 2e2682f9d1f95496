//! Session entity and lifecycle
//!
//! A session is a bounded window of one user's activity. It moves through a
//! two-state machine: Open (events keep updating counters and the activity
//! timestamp) and Closed (reached by an explicit end or by the inactivity
//! janitor). All derived fields are recomputed here, in one place, so the
//! processor and the repositories cannot disagree on the invariants.

use crate::generate_id;
use crate::types::EventType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Session identifier (UUID format)
pub type SessionId = String;

/// Sessions with at most one page view and under this duration are bounces.
const BOUNCE_DURATION_SECS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,

    // Lifecycle
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,

    // Technical details
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,

    // Attribution snapshot taken at open
    pub referrer: Option<String>,
    pub landing_page: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,

    // Derived counters
    pub page_views: i64,
    pub events_count: i64,
    pub is_bounce: bool,
    pub converted: bool,
    pub conversion_value: Option<f64>,

    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Open a new session for a user.
    pub fn open(user_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            user_id: user_id.into(),
            started_at,
            last_activity_at: started_at,
            ended_at: None,
            duration_seconds: None,
            ip_address: None,
            user_agent: None,
            country: None,
            city: None,
            device_type: None,
            browser: None,
            os: None,
            referrer: None,
            landing_page: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            page_views: 0,
            events_count: 0,
            is_bounce: false,
            converted: false,
            conversion_value: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_attribution(
        mut self,
        utm_source: Option<String>,
        utm_medium: Option<String>,
        utm_campaign: Option<String>,
        referrer: Option<String>,
        landing_page: Option<String>,
    ) -> Self {
        self.utm_source = utm_source;
        self.utm_medium = utm_medium;
        self.utm_campaign = utm_campaign;
        self.referrer = referrer;
        self.landing_page = landing_page;
        self
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether the session has been idle past the inactivity timeout.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_open() && now - self.last_activity_at > timeout
    }

    /// Fold an event into the session counters.
    ///
    /// Activity moves `last_activity_at` forward only (out-of-order arrivals
    /// never rewind it). No-op on a closed session.
    pub fn apply_event(&mut self, event_type: EventType, timestamp: DateTime<Utc>) {
        if !self.is_open() {
            return;
        }

        if timestamp > self.last_activity_at {
            self.last_activity_at = timestamp;
        }
        self.events_count += 1;
        if event_type == EventType::PageView {
            self.page_views += 1;
        }
        self.recompute_derived();
    }

    /// Record a goal conversion against this session.
    pub fn record_conversion(&mut self, value: Option<f64>) {
        self.converted = true;
        if let Some(v) = value {
            self.conversion_value = Some(self.conversion_value.unwrap_or(0.0) + v);
        } else if self.conversion_value.is_none() {
            self.conversion_value = Some(0.0);
        }
    }

    /// Close the session: `ended_at` is pinned to the last activity, the
    /// duration is finalized, and the bounce flag is locked.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }
        self.ended_at = Some(self.last_activity_at);
        self.recompute_derived();
    }

    fn recompute_derived(&mut self) {
        let duration = (self.last_activity_at - self.started_at).num_seconds();
        self.duration_seconds = Some(duration);
        self.is_bounce = self.page_views <= 1 && duration < BOUNCE_DURATION_SECS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_open_session_defaults() {
        let session = Session::open("u1", t0());
        assert!(session.is_open());
        assert_eq!(session.page_views, 0);
        assert_eq!(session.started_at, session.last_activity_at);
        assert!(!session.converted);
    }

    #[test]
    fn test_apply_event_updates_counters() {
        let mut session = Session::open("u1", t0());
        session.apply_event(EventType::PageView, t0() + Duration::seconds(10));

        assert_eq!(session.page_views, 1);
        assert_eq!(session.events_count, 1);
        assert_eq!(session.duration_seconds, Some(10));
        assert!(session.is_bounce);
    }

    #[test]
    fn test_out_of_order_event_does_not_rewind_activity() {
        let mut session = Session::open("u1", t0());
        session.apply_event(EventType::PageView, t0() + Duration::seconds(60));
        session.apply_event(EventType::ButtonClick, t0() + Duration::seconds(5));

        assert_eq!(session.last_activity_at, t0() + Duration::seconds(60));
        assert_eq!(session.events_count, 2);
        assert_eq!(session.duration_seconds, Some(60));
    }

    #[test]
    fn test_bounce_cleared_by_second_page_view() {
        let mut session = Session::open("u1", t0());
        session.apply_event(EventType::PageView, t0() + Duration::seconds(5));
        assert!(session.is_bounce);

        session.apply_event(EventType::PageView, t0() + Duration::seconds(8));
        assert!(!session.is_bounce);
    }

    #[test]
    fn test_bounce_cleared_by_duration() {
        let mut session = Session::open("u1", t0());
        session.apply_event(EventType::PageView, t0() + Duration::seconds(45));
        assert!(!session.is_bounce);
    }

    #[test]
    fn test_close_pins_ended_at_to_last_activity() {
        let mut session = Session::open("u1", t0());
        session.apply_event(EventType::PageView, t0() + Duration::seconds(20));
        session.close();

        assert_eq!(session.ended_at, Some(t0() + Duration::seconds(20)));
        assert_eq!(session.duration_seconds, Some(20));
        assert!(session.is_bounce);

        // Closed sessions ignore further events
        session.apply_event(EventType::PageView, t0() + Duration::seconds(100));
        assert_eq!(session.events_count, 1);
        assert_eq!(session.ended_at, Some(t0() + Duration::seconds(20)));
    }

    #[test]
    fn test_record_conversion_accumulates() {
        let mut session = Session::open("u1", t0());
        session.record_conversion(Some(100.0));
        session.record_conversion(Some(25.5));

        assert!(session.converted);
        assert_eq!(session.conversion_value, Some(125.5));
    }

    #[test]
    fn test_expiry() {
        let mut session = Session::open("u1", t0());
        session.apply_event(EventType::PageView, t0());

        let timeout = Duration::seconds(1800);
        assert!(!session.is_expired(t0() + Duration::seconds(1800), timeout));
        assert!(session.is_expired(t0() + Duration::seconds(1801), timeout));

        session.close();
        assert!(!session.is_expired(t0() + Duration::hours(5), timeout));
    }
}
