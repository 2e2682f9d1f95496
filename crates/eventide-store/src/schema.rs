//! Schema initialization
//!
//! Tables and indexes are created idempotently at pool creation. The schema
//! version gate protects future migrations.

use eventide_core::{Error, Result};
use sqlx::SqlitePool;

const SCHEMA_VERSION: i32 = 1;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        event_type TEXT NOT NULL,
        properties TEXT NOT NULL DEFAULT '{}',
        user_id TEXT,
        session_id TEXT,
        module TEXT,
        page_url TEXT,
        page_title TEXT,
        referrer TEXT,
        utm_source TEXT,
        user_agent TEXT,
        ip_address TEXT,
        country TEXT,
        city TEXT,
        device_type TEXT,
        browser TEXT,
        os TEXT,
        timestamp TEXT NOT NULL,
        created_at TEXT NOT NULL,
        processed INTEGER NOT NULL DEFAULT 0,
        processed_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metrics (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        metric_type TEXT NOT NULL,
        value REAL NOT NULL,
        unit TEXT,
        dimensions TEXT NOT NULL DEFAULT '{}',
        period TEXT,
        module TEXT,
        timestamp TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        external_id TEXT UNIQUE,
        email TEXT,
        name TEXT,
        properties TEXT NOT NULL DEFAULT '{}',
        first_seen_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL,
        total_sessions INTEGER NOT NULL DEFAULT 0,
        total_events INTEGER NOT NULL DEFAULT 0,
        total_conversions INTEGER NOT NULL DEFAULT 0,
        lifetime_value REAL NOT NULL DEFAULT 0.0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        started_at TEXT NOT NULL,
        last_activity_at TEXT NOT NULL,
        ended_at TEXT,
        duration_seconds INTEGER,
        ip_address TEXT,
        user_agent TEXT,
        country TEXT,
        city TEXT,
        device_type TEXT,
        browser TEXT,
        os TEXT,
        referrer TEXT,
        landing_page TEXT,
        utm_source TEXT,
        utm_medium TEXT,
        utm_campaign TEXT,
        page_views INTEGER NOT NULL DEFAULT 0,
        events_count INTEGER NOT NULL DEFAULT 0,
        is_bounce INTEGER NOT NULL DEFAULT 0,
        converted INTEGER NOT NULL DEFAULT 0,
        conversion_value REAL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS funnels (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS funnel_steps (
        id TEXT PRIMARY KEY,
        funnel_id TEXT NOT NULL REFERENCES funnels(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        event_type TEXT NOT NULL,
        step_order INTEGER NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cohorts (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        cohort_type TEXT NOT NULL,
        description TEXT,
        criteria TEXT NOT NULL,
        period TEXT NOT NULL DEFAULT 'day',
        user_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS goals (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        event_type TEXT NOT NULL,
        conditions TEXT NOT NULL DEFAULT '{}',
        value REAL,
        enabled INTEGER NOT NULL DEFAULT 1,
        total_conversions INTEGER NOT NULL DEFAULT 0,
        total_value REAL NOT NULL DEFAULT 0.0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS goal_conversions (
        id TEXT PRIMARY KEY,
        goal_id TEXT NOT NULL REFERENCES goals(id),
        user_id TEXT,
        session_id TEXT,
        event_id TEXT NOT NULL,
        value REAL,
        properties TEXT NOT NULL DEFAULT '{}',
        converted_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ab_tests (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        hypothesis TEXT,
        goal_metric TEXT NOT NULL,
        variants TEXT NOT NULL,
        traffic_split TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft',
        start_date TEXT,
        end_date TEXT,
        min_sample_size INTEGER NOT NULL DEFAULT 1000,
        total_participants INTEGER NOT NULL DEFAULT 0,
        winner TEXT,
        confidence_level REAL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ab_test_assignments (
        id TEXT PRIMARY KEY,
        test_id TEXT NOT NULL REFERENCES ab_tests(id),
        user_id TEXT NOT NULL,
        variant TEXT NOT NULL,
        assigned_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dashboards (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        config TEXT NOT NULL,
        is_public INTEGER NOT NULL DEFAULT 0,
        owner_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS export_jobs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        export_type TEXT NOT NULL,
        format TEXT NOT NULL,
        query_params TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        file_path TEXT,
        file_size INTEGER,
        row_count INTEGER,
        error_message TEXT,
        user_id TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        expires_at TEXT
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_user_timestamp ON events(user_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_session_timestamp ON events(session_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_type_timestamp ON events(event_type, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_processed ON events(processed)",
    "CREATE INDEX IF NOT EXISTS idx_events_module_timestamp ON events(module, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_name_timestamp ON metrics(name, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_name_period_timestamp ON metrics(name, period, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_users_first_seen ON users(first_seen_at)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_user_started ON sessions(user_id, started_at)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_started_ended ON sessions(started_at, ended_at)",
    "CREATE INDEX IF NOT EXISTS idx_conversions_goal_date ON goal_conversions(goal_id, converted_at)",
    "CREATE INDEX IF NOT EXISTS idx_conversions_user_date ON goal_conversions(user_id, converted_at)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_conversions_goal_event ON goal_conversions(goal_id, event_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_funnel_step_order ON funnel_steps(funnel_id, step_order)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_test_user_assignment ON ab_test_assignments(test_id, user_id)",
    "CREATE INDEX IF NOT EXISTS idx_exports_status_created ON export_jobs(status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_exports_expires ON export_jobs(expires_at)",
];

/// Create all tables and indexes, then stamp and verify the schema version.
pub(crate) async fn initialize(pool: &SqlitePool) -> Result<()> {
    for statement in TABLES.iter().chain(INDEXES.iter()) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
    }

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    let version: i32 = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    if version != SCHEMA_VERSION {
        return Err(Error::Database(format!(
            "Unsupported schema version: {}",
            version
        )));
    }

    Ok(())
}
