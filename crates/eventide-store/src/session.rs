//! Scoped transactional sessions

use eventide_core::{Error, Result};
use sqlx::{Sqlite, SqliteConnection, Transaction};

/// One transaction against the store.
///
/// Within a session, reads observe the session's own writes. Dropping the
/// session without `commit` rolls everything back. Integrity violations from
/// any repository call surface as `Error::Conflict`.
pub struct StoreSession {
    tx: Transaction<'static, Sqlite>,
}

impl StoreSession {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    /// The underlying connection, for repository queries.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commit the session's writes.
    pub async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::Database(format!("Commit failed: {}", e)))
    }

    /// Explicitly roll back. Equivalent to dropping the session.
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| Error::Database(format!("Rollback failed: {}", e)))
    }
}

/// Map a sqlx error to the shared taxonomy: unique/constraint violations
/// become `Conflict`, missing rows are handled by callers via `Option`,
/// everything else is `Database`.
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            Error::Conflict(db.message().to_string())
        }
        _ => Error::Database(err.to_string()),
    }
}
