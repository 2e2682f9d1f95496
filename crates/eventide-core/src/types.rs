//! Closed enums and validation limits
//!
//! Every string enum persisted by the store lives here so that the ingest
//! boundary, the repositories, and the engines agree on one taxonomy.

use crate::error::Error;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Maximum number of keys in an event property bag.
pub const MAX_EVENT_PROPERTIES: usize = 100;
/// Maximum length of a property key.
pub const MAX_PROPERTY_KEY_LENGTH: usize = 255;
/// Maximum length of a serialized property value.
pub const MAX_PROPERTY_VALUE_LENGTH: usize = 4096;
/// Maximum number of events accepted in a single batch.
pub const MAX_BATCH_SIZE: usize = 10_000;
/// Tolerated client clock skew: events stamped further in the future are rejected.
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 300;
/// Inactivity timeout after which a session is considered closed.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 1800;
/// Default retention horizon for raw events.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Cache TTLs, in seconds.
pub const CACHE_TTL_SHORT: u64 = 60;
pub const CACHE_TTL_MEDIUM: u64 = 300;
pub const CACHE_TTL_LONG: u64 = 3600;
pub const CACHE_TTL_DAY: u64 = 86_400;

/// Event type taxonomy. Unknown strings fail validation at the ingest edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Page events
    PageView,
    PageExit,
    // Click events
    ButtonClick,
    LinkClick,
    ElementClick,
    // Form events
    FormStart,
    FormSubmit,
    FormError,
    // Module events
    ModuleOpen,
    ModuleClose,
    // Document events
    DocumentCreate,
    DocumentOpen,
    DocumentEdit,
    DocumentSave,
    DocumentDelete,
    // Search
    SearchQuery,
    // Session lifecycle
    SessionStart,
    SessionEnd,
    // Account events
    Signup,
    Login,
    Logout,
    // Commerce events
    Purchase,
    CheckoutStart,
    CheckoutComplete,
    // Errors
    ErrorClient,
    ErrorServer,
    ErrorApi,
    // Misc
    ApiRequest,
    Video,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::PageExit => "page_exit",
            EventType::ButtonClick => "button_click",
            EventType::LinkClick => "link_click",
            EventType::ElementClick => "element_click",
            EventType::FormStart => "form_start",
            EventType::FormSubmit => "form_submit",
            EventType::FormError => "form_error",
            EventType::ModuleOpen => "module_open",
            EventType::ModuleClose => "module_close",
            EventType::DocumentCreate => "document_create",
            EventType::DocumentOpen => "document_open",
            EventType::DocumentEdit => "document_edit",
            EventType::DocumentSave => "document_save",
            EventType::DocumentDelete => "document_delete",
            EventType::SearchQuery => "search_query",
            EventType::SessionStart => "session_start",
            EventType::SessionEnd => "session_end",
            EventType::Signup => "signup",
            EventType::Login => "login",
            EventType::Logout => "logout",
            EventType::Purchase => "purchase",
            EventType::CheckoutStart => "checkout_start",
            EventType::CheckoutComplete => "checkout_complete",
            EventType::ErrorClient => "error_client",
            EventType::ErrorServer => "error_server",
            EventType::ErrorApi => "error_api",
            EventType::ApiRequest => "api_request",
            EventType::Video => "video",
            EventType::Custom => "custom",
        }
    }

    /// Event types that count as attribution touchpoints.
    pub fn is_touchpoint(&self) -> bool {
        matches!(
            self,
            EventType::PageView
                | EventType::ButtonClick
                | EventType::LinkClick
                | EventType::SearchQuery
                | EventType::ModuleOpen
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page_view" => Ok(EventType::PageView),
            "page_exit" => Ok(EventType::PageExit),
            "button_click" => Ok(EventType::ButtonClick),
            "link_click" => Ok(EventType::LinkClick),
            "element_click" => Ok(EventType::ElementClick),
            "form_start" => Ok(EventType::FormStart),
            "form_submit" => Ok(EventType::FormSubmit),
            "form_error" => Ok(EventType::FormError),
            "module_open" => Ok(EventType::ModuleOpen),
            "module_close" => Ok(EventType::ModuleClose),
            "document_create" => Ok(EventType::DocumentCreate),
            "document_open" => Ok(EventType::DocumentOpen),
            "document_edit" => Ok(EventType::DocumentEdit),
            "document_save" => Ok(EventType::DocumentSave),
            "document_delete" => Ok(EventType::DocumentDelete),
            "search_query" => Ok(EventType::SearchQuery),
            "session_start" => Ok(EventType::SessionStart),
            "session_end" => Ok(EventType::SessionEnd),
            "signup" => Ok(EventType::Signup),
            "login" => Ok(EventType::Login),
            "logout" => Ok(EventType::Logout),
            "purchase" => Ok(EventType::Purchase),
            "checkout_start" => Ok(EventType::CheckoutStart),
            "checkout_complete" => Ok(EventType::CheckoutComplete),
            "error_client" => Ok(EventType::ErrorClient),
            "error_server" => Ok(EventType::ErrorServer),
            "error_api" => Ok(EventType::ErrorApi),
            "api_request" => Ok(EventType::ApiRequest),
            "video" => Ok(EventType::Video),
            "custom" => Ok(EventType::Custom),
            other => Err(Error::Validation(format!("Unknown event type: {}", other))),
        }
    }
}

/// Metric type taxonomy for materialized metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Count,
    UniqueCount,
    Sum,
    Average,
    Min,
    Max,
    Duration,
    Frequency,
    ConversionRate,
    BounceRate,
    RetentionRate,
    ChurnRate,
    Gauge,
    Counter,
    Timer,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Count => "count",
            MetricType::UniqueCount => "unique_count",
            MetricType::Sum => "sum",
            MetricType::Average => "average",
            MetricType::Min => "min",
            MetricType::Max => "max",
            MetricType::Duration => "duration",
            MetricType::Frequency => "frequency",
            MetricType::ConversionRate => "conversion_rate",
            MetricType::BounceRate => "bounce_rate",
            MetricType::RetentionRate => "retention_rate",
            MetricType::ChurnRate => "churn_rate",
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Timer => "timer",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(MetricType::Count),
            "unique_count" => Ok(MetricType::UniqueCount),
            "sum" => Ok(MetricType::Sum),
            "average" => Ok(MetricType::Average),
            "min" => Ok(MetricType::Min),
            "max" => Ok(MetricType::Max),
            "duration" => Ok(MetricType::Duration),
            "frequency" => Ok(MetricType::Frequency),
            "conversion_rate" => Ok(MetricType::ConversionRate),
            "bounce_rate" => Ok(MetricType::BounceRate),
            "retention_rate" => Ok(MetricType::RetentionRate),
            "churn_rate" => Ok(MetricType::ChurnRate),
            "gauge" => Ok(MetricType::Gauge),
            "counter" => Ok(MetricType::Counter),
            "timer" => Ok(MetricType::Timer),
            other => Err(Error::Validation(format!("Unknown metric type: {}", other))),
        }
    }
}

/// Time periods for aggregation bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPeriod {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl AggregationPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationPeriod::Minute => "minute",
            AggregationPeriod::Hour => "hour",
            AggregationPeriod::Day => "day",
            AggregationPeriod::Week => "week",
            AggregationPeriod::Month => "month",
            AggregationPeriod::Quarter => "quarter",
            AggregationPeriod::Year => "year",
        }
    }

    /// Truncate a timestamp down to the start of its bucket.
    ///
    /// Weeks start on Monday; quarters on Jan/Apr/Jul/Oct 1st. All in UTC.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = |t: DateTime<Utc>| {
            Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
                .single()
                .unwrap_or(t)
        };

        match self {
            AggregationPeriod::Minute => ts
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(ts),
            AggregationPeriod::Hour => ts
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(ts),
            AggregationPeriod::Day => midnight(ts),
            AggregationPeriod::Week => {
                let days_back = ts.weekday().num_days_from_monday() as i64;
                midnight(ts) - Duration::days(days_back)
            }
            AggregationPeriod::Month => Utc
                .with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
                .single()
                .unwrap_or(ts),
            AggregationPeriod::Quarter => {
                let quarter_month = ((ts.month() - 1) / 3) * 3 + 1;
                Utc.with_ymd_and_hms(ts.year(), quarter_month, 1, 0, 0, 0)
                    .single()
                    .unwrap_or(ts)
            }
            AggregationPeriod::Year => Utc
                .with_ymd_and_hms(ts.year(), 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(ts),
        }
    }

    /// Fixed-width period delta used by cohort/retention windows.
    ///
    /// Months are 30 days by convention; periods longer than a month fall
    /// back to one day, matching the source system.
    pub fn delta(&self) -> Duration {
        match self {
            AggregationPeriod::Minute => Duration::minutes(1),
            AggregationPeriod::Hour => Duration::hours(1),
            AggregationPeriod::Day => Duration::days(1),
            AggregationPeriod::Week => Duration::weeks(1),
            AggregationPeriod::Month => Duration::days(30),
            _ => Duration::days(1),
        }
    }
}

impl std::fmt::Display for AggregationPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(AggregationPeriod::Minute),
            "hour" => Ok(AggregationPeriod::Hour),
            "day" => Ok(AggregationPeriod::Day),
            "week" => Ok(AggregationPeriod::Week),
            "month" => Ok(AggregationPeriod::Month),
            "quarter" => Ok(AggregationPeriod::Quarter),
            "year" => Ok(AggregationPeriod::Year),
            other => Err(Error::Validation(format!(
                "Unknown aggregation period: {}",
                other
            ))),
        }
    }
}

/// Attribution models for conversion credit apportionment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionModel {
    FirstTouch,
    LastTouch,
    Linear,
    TimeDecay,
    PositionBased,
}

impl AttributionModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionModel::FirstTouch => "first_touch",
            AttributionModel::LastTouch => "last_touch",
            AttributionModel::Linear => "linear",
            AttributionModel::TimeDecay => "time_decay",
            AttributionModel::PositionBased => "position_based",
        }
    }
}

impl std::fmt::Display for AttributionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributionModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_touch" => Ok(AttributionModel::FirstTouch),
            "last_touch" => Ok(AttributionModel::LastTouch),
            "linear" => Ok(AttributionModel::Linear),
            "time_decay" => Ok(AttributionModel::TimeDecay),
            "position_based" => Ok(AttributionModel::PositionBased),
            other => Err(Error::Validation(format!(
                "Unknown attribution model: {}",
                other
            ))),
        }
    }
}

/// Safe division returning 0.0 when the denominator is zero.
pub fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
