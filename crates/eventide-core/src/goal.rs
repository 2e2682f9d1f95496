//! Goals and goal conversions
//!
//! A goal fires when an event of the matching type satisfies every condition
//! in the goal's condition map. An empty map matches any event of the type.

use crate::event::{Event, Properties};
use crate::types::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type GoalId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub name: String,
    pub description: Option<String>,
    pub event_type: EventType,
    /// Required key/value pairs; `{}` matches whenever the type matches.
    #[serde(default)]
    pub conditions: HashMap<String, serde_json::Value>,
    /// Monetary value credited per conversion.
    pub value: Option<f64>,
    pub enabled: bool,

    pub total_conversions: i64,
    pub total_value: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    pub fn new(name: impl Into<String>, event_type: EventType) -> Self {
        let now = Utc::now();
        Self {
            id: crate::generate_id(),
            name: name.into(),
            description: None,
            event_type,
            conditions: HashMap::new(),
            value: None,
            enabled: true,
            total_conversions: 0,
            total_value: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.conditions.insert(key.into(), value);
        self
    }

    /// Whether this goal matches the event.
    ///
    /// Conditions are resolved against one namespace: the property bag
    /// first, then the event column of the same name. A key that exists
    /// nowhere fails the match.
    pub fn matches(&self, event: &Event) -> bool {
        if event.event_type != self.event_type {
            return false;
        }

        for (key, expected) in &self.conditions {
            match event.condition_value(key) {
                Some(actual) if &actual == expected => {}
                _ => return false,
            }
        }

        true
    }
}

/// A recorded goal conversion; at most one exists per (goal, event) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalConversion {
    pub id: String,
    pub goal_id: GoalId,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub event_id: String,
    pub value: Option<f64>,
    #[serde(default)]
    pub properties: Properties,
    pub converted_at: DateTime<Utc>,
}

impl GoalConversion {
    /// Build the conversion a goal fires for an event.
    pub fn from_match(goal: &Goal, event: &Event) -> Self {
        Self {
            id: crate::generate_id(),
            goal_id: goal.id.clone(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            event_id: event.id.clone(),
            value: goal.value,
            properties: event.properties.clone(),
            converted_at: event.timestamp,
        }
    }
}
