//! Store handle and scoped sessions

use crate::schema;
use crate::session::StoreSession;
use eventide_config::DatabaseConfig;
use eventide_core::{Error, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Handle to the durable analytics store.
///
/// Cloning is cheap; all clones share one connection pool.
#[derive(Clone)]
pub struct AnalyticsStore {
    pool: SqlitePool,
}

impl AnalyticsStore {
    /// Open (or create) the store described by the database config.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| Error::Config(format!("Invalid database url '{}': {}", config.url, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        // A private in-memory database exists per connection, so the pool
        // must not fan out for it
        let max_connections = if config.url.contains(":memory:") {
            1
        } else {
            config.pool_size + config.max_overflow
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect: {}", e)))?;

        schema::initialize(&pool).await?;

        tracing::info!(url = %config.url, pool_size = config.pool_size, "Analytics store ready");
        Ok(Self { pool })
    }

    /// Open a store on a SQLite file path.
    pub async fn open(path: &Path) -> Result<Self> {
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            ..DatabaseConfig::default()
        };
        Self::connect(&config).await
    }

    /// Open an ephemeral in-memory store. Used by tests and local tooling.
    pub async fn in_memory() -> Result<Self> {
        // A single connection keeps the in-memory database alive
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Config(e.to_string()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect: {}", e)))?;

        schema::initialize(&pool).await?;
        Ok(Self { pool })
    }

    /// Begin a scoped transactional session.
    ///
    /// The session rolls back on drop unless committed.
    pub async fn session(&self) -> Result<StoreSession> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin session: {}", e)))?;
        Ok(StoreSession::new(tx))
    }

    /// Lightweight liveness probe.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_initializes_schema() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        store.health_check().await.unwrap();

        let mut sess = store.session().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(sess.conn())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("analytics.db");
        let store = AnalyticsStore::open(&path).await.unwrap();
        store.health_check().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_uncommitted_session_rolls_back() {
        let store = AnalyticsStore::in_memory().await.unwrap();

        {
            let mut sess = store.session().await.unwrap();
            sqlx::query("INSERT INTO dashboards (id, name, config, is_public, created_at, updated_at) VALUES ('d1', 'n', '{}', 0, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')")
                .execute(sess.conn())
                .await
                .unwrap();
            // Dropped without commit
        }

        let mut sess = store.session().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dashboards")
            .fetch_one(sess.conn())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
