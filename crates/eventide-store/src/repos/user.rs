//! User repository

use super::{json_decode, json_encode};
use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, encode_ts};
use chrono::{DateTime, Utc};
use eventide_core::user::{User, UserStatsDelta};
use eventide_core::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const COLUMNS: &str = "id, external_id, email, name, properties, first_seen_at, last_seen_at, \
     total_sessions, total_events, total_conversions, lifetime_value, created_at, updated_at";

pub struct UserRepo;

impl UserRepo {
    pub async fn create(&self, sess: &mut StoreSession, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, external_id, email, name, properties, first_seen_at, \
             last_seen_at, total_sessions, total_events, total_conversions, lifetime_value, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.external_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(json_encode(&user.properties)?)
        .bind(encode_ts(user.first_seen_at))
        .bind(encode_ts(user.last_seen_at))
        .bind(user.total_sessions)
        .bind(user.total_events)
        .bind(user.total_conversions)
        .bind(user.lifetime_value)
        .bind(encode_ts(user.created_at))
        .bind(encode_ts(user.updated_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    pub async fn get_by_external_id(
        &self,
        sess: &mut StoreSession,
        external_id: &str,
    ) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE external_id = ?",
            COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    pub async fn get_by_email(&self, sess: &mut StoreSession, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = ?", COLUMNS))
            .bind(email)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    /// Update profile fields (identity and property bag).
    pub async fn update_profile(&self, sess: &mut StoreSession, user: &User) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET external_id = ?, email = ?, name = ?, properties = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&user.external_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(json_encode(&user.properties)?)
        .bind(encode_ts(Utc::now()))
        .bind(&user.id)
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomic additive counter update; also bumps `last_seen_at`.
    /// Never read-modify-write.
    pub async fn increment_stats(
        &self,
        sess: &mut StoreSession,
        user_id: &str,
        delta: UserStatsDelta,
    ) -> Result<bool> {
        let now = encode_ts(Utc::now());
        let result = sqlx::query(
            "UPDATE users SET \
             total_sessions = total_sessions + ?, \
             total_events = total_events + ?, \
             total_conversions = total_conversions + ?, \
             lifetime_value = lifetime_value + ?, \
             last_seen_at = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(delta.sessions)
        .bind(delta.events)
        .bind(delta.conversions)
        .bind(delta.value)
        .bind(&now)
        .bind(&now)
        .bind(user_id)
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// User ids first seen inside `[start, end)`. Cohort membership query.
    pub async fn ids_first_seen_between(
        &self,
        sess: &mut StoreSession,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar(
            "SELECT id FROM users WHERE first_seen_at >= ? AND first_seen_at < ?",
        )
        .bind(encode_ts(start))
        .bind(encode_ts(end))
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows)
    }

    pub async fn count(&self, sess: &mut StoreSession) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let properties: String = row.try_get("properties").map_err(map_sqlx_err)?;
    let first_seen: String = row.try_get("first_seen_at").map_err(map_sqlx_err)?;
    let last_seen: String = row.try_get("last_seen_at").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(map_sqlx_err)?;

    Ok(User {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        external_id: row.try_get("external_id").map_err(map_sqlx_err)?,
        email: row.try_get("email").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        properties: json_decode(&properties)?,
        first_seen_at: decode_ts(&first_seen)?,
        last_seen_at: decode_ts(&last_seen)?,
        total_sessions: row.try_get("total_sessions").map_err(map_sqlx_err)?,
        total_events: row.try_get("total_events").map_err(map_sqlx_err)?,
        total_conversions: row.try_get("total_conversions").map_err(map_sqlx_err)?,
        lifetime_value: row.try_get("lifetime_value").map_err(map_sqlx_err)?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}
