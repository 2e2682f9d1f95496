//! Event entity and ingest DTOs
//!
//! Events are the immutable atoms of the pipeline. `EventCreate` is what
//! clients hand to the tracker; validation happens there, once, before the
//! event enters the queue.

use crate::error::{Error, Result};
use crate::types::{
    EventType, CLOCK_SKEW_TOLERANCE_SECS, MAX_EVENT_PROPERTIES, MAX_PROPERTY_KEY_LENGTH,
    MAX_PROPERTY_VALUE_LENGTH,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event identifier (UUID format)
pub type EventId = String;

/// Free-form event property bag, validated at the ingest boundary.
pub type Properties = HashMap<String, serde_json::Value>;

/// A persisted analytics event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub event_type: EventType,
    #[serde(default)]
    pub properties: Properties,

    // User and session tracking
    pub user_id: Option<String>,
    pub session_id: Option<String>,

    // Context
    pub module: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,

    // Technical details
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,

    // Timestamps: `timestamp` is event time, `created_at` is ingest time
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    // Processing
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Materialize a validated create request into a full event.
    pub fn from_create(id: EventId, create: EventCreate) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: create.name,
            event_type: create.event_type,
            properties: create.properties,
            user_id: create.user_id,
            session_id: create.session_id,
            module: create.module,
            page_url: create.page_url,
            page_title: create.page_title,
            referrer: create.referrer,
            utm_source: create.utm_source,
            user_agent: create.user_agent,
            ip_address: create.ip_address,
            country: create.country,
            city: create.city,
            device_type: create.device_type,
            browser: create.browser,
            os: create.os,
            timestamp: create.timestamp.unwrap_or(now),
            created_at: now,
            processed: false,
            processed_at: None,
        }
    }

    /// Look up a goal-condition key: property bag first, then the event
    /// column of the same name (rendered as a string). Returns None when the
    /// key exists nowhere.
    pub fn condition_value(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.properties.get(key) {
            return Some(value.clone());
        }

        let field = match key {
            "name" => Some(self.name.clone()),
            "event_type" => Some(self.event_type.as_str().to_string()),
            "user_id" => self.user_id.clone(),
            "session_id" => self.session_id.clone(),
            "module" => self.module.clone(),
            "page_url" => self.page_url.clone(),
            "page_title" => self.page_title.clone(),
            "referrer" => self.referrer.clone(),
            "utm_source" => self.utm_source.clone(),
            "country" => self.country.clone(),
            "city" => self.city.clone(),
            "device_type" => self.device_type.clone(),
            "browser" => self.browser.clone(),
            "os" => self.os.clone(),
            _ => None,
        };

        field.map(serde_json::Value::String)
    }
}

/// Request to record a new event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCreate {
    pub name: String,
    pub event_type: EventType,
    #[serde(default)]
    pub properties: Properties,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub module: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    /// Event time; defaults to ingest time when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventCreate {
    /// Minimal constructor; the optional context fields default to None.
    pub fn new(name: impl Into<String>, event_type: EventType) -> Self {
        Self {
            name: name.into(),
            event_type,
            properties: Properties::new(),
            user_id: None,
            session_id: None,
            module: None,
            page_url: None,
            page_title: None,
            referrer: None,
            utm_source: None,
            user_agent: None,
            ip_address: None,
            country: None,
            city: None,
            device_type: None,
            browser: None,
            os: None,
            timestamp: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_utm_source(mut self, source: impl Into<String>) -> Self {
        self.utm_source = Some(source.into());
        self
    }

    /// Validate the create request against the ingest limits.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("Event name cannot be empty".to_string()));
        }
        if self.name.len() > 255 {
            return Err(Error::Validation(format!(
                "Event name exceeds 255 characters: {}",
                self.name.len()
            )));
        }

        if self.properties.len() > MAX_EVENT_PROPERTIES {
            return Err(Error::Validation(format!(
                "Event properties cannot exceed {} keys",
                MAX_EVENT_PROPERTIES
            )));
        }
        for (key, value) in &self.properties {
            if key.len() > MAX_PROPERTY_KEY_LENGTH {
                return Err(Error::Validation(format!(
                    "Property key exceeds {} characters",
                    MAX_PROPERTY_KEY_LENGTH
                )));
            }
            let rendered = value.to_string();
            if rendered.len() > MAX_PROPERTY_VALUE_LENGTH {
                return Err(Error::Validation(format!(
                    "Property value for '{}' exceeds {} characters",
                    key, MAX_PROPERTY_VALUE_LENGTH
                )));
            }
        }

        if let Some(ts) = self.timestamp {
            let skew_limit = Utc::now() + Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS);
            if ts > skew_limit {
                return Err(Error::Validation(format!(
                    "Event timestamp {} is too far in the future",
                    ts.to_rfc3339()
                )));
            }
        }

        Ok(())
    }
}

/// Filterable event query with pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQuery {
    pub event_types: Option<Vec<EventType>>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub module: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset: u32,
    pub limit: Option<u32>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_types.get_or_insert_with(Vec::new).push(event_type);
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_accepts_minimal_event() {
        let create = EventCreate::new("page_loaded", EventType::PageView);
        assert!(create.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let create = EventCreate::new("", EventType::PageView);
        assert!(matches!(create.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_too_many_properties() {
        let mut create = EventCreate::new("spam", EventType::Custom);
        for i in 0..=MAX_EVENT_PROPERTIES {
            create.properties.insert(format!("key_{}", i), json!(i));
        }
        assert!(create.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_value() {
        let create = EventCreate::new("big", EventType::Custom)
            .with_property("blob", json!("x".repeat(MAX_PROPERTY_VALUE_LENGTH + 1)));
        assert!(create.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_future_timestamp() {
        let create = EventCreate::new("from_the_future", EventType::PageView)
            .with_timestamp(Utc::now() + Duration::minutes(10));
        assert!(create.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_within_skew_tolerance() {
        let create = EventCreate::new("slightly_ahead", EventType::PageView)
            .with_timestamp(Utc::now() + Duration::minutes(4));
        assert!(create.validate().is_ok());
    }

    #[test]
    fn test_from_create_stamps_ingest_time() {
        let create = EventCreate::new("click", EventType::ButtonClick).with_user("u1");
        let event = Event::from_create("evt-1".to_string(), create);

        assert_eq!(event.id, "evt-1");
        assert!(!event.processed);
        assert!(event.processed_at.is_none());
        assert!(event.timestamp <= event.created_at);
    }

    #[test]
    fn test_condition_value_prefers_properties() {
        let create = EventCreate::new("buy", EventType::Purchase)
            .with_property("module", json!("checkout"));
        let mut event = Event::from_create("evt-1".to_string(), create);
        event.module = Some("store".to_string());

        // Property bag shadows the column of the same name
        assert_eq!(event.condition_value("module"), Some(json!("checkout")));
        // Falls back to the column when no property exists
        assert_eq!(
            event.condition_value("event_type"),
            Some(json!("purchase"))
        );
        // Missing everywhere
        assert_eq!(event.condition_value("nope"), None);
    }
}
