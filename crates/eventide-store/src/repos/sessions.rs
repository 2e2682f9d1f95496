//! Session repository

use super::{placeholders, IN_CHUNK};
use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, decode_ts_opt, encode_ts, encode_ts_opt};
use chrono::{DateTime, Utc};
use eventide_core::{Result, Session};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashSet;

const COLUMNS: &str = "id, user_id, started_at, last_activity_at, ended_at, duration_seconds, \
     ip_address, user_agent, country, city, device_type, browser, os, referrer, landing_page, \
     utm_source, utm_medium, utm_campaign, page_views, events_count, is_bounce, converted, \
     conversion_value, created_at";

/// SQL-side rollup over sessions in a window.
#[derive(Debug, Clone, Default)]
pub struct SessionAggregateRow {
    pub total_sessions: u64,
    pub unique_users: u64,
    pub avg_duration_seconds: f64,
    pub avg_page_views: f64,
    pub bounces: u64,
    pub conversions: u64,
    pub total_conversion_value: f64,
}

pub struct SessionRepo;

impl SessionRepo {
    pub async fn create(&self, sess: &mut StoreSession, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, started_at, last_activity_at, ended_at, \
             duration_seconds, ip_address, user_agent, country, city, device_type, browser, os, \
             referrer, landing_page, utm_source, utm_medium, utm_campaign, page_views, \
             events_count, is_bounce, converted, conversion_value, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(encode_ts(session.started_at))
        .bind(encode_ts(session.last_activity_at))
        .bind(encode_ts_opt(session.ended_at))
        .bind(session.duration_seconds)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(&session.country)
        .bind(&session.city)
        .bind(&session.device_type)
        .bind(&session.browser)
        .bind(&session.os)
        .bind(&session.referrer)
        .bind(&session.landing_page)
        .bind(&session.utm_source)
        .bind(&session.utm_medium)
        .bind(&session.utm_campaign)
        .bind(session.page_views)
        .bind(session.events_count)
        .bind(session.is_bounce)
        .bind(session.converted)
        .bind(session.conversion_value)
        .bind(encode_ts(session.created_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {} FROM sessions WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    /// Persist the mutable lifecycle fields after `apply_event`/`close`.
    pub async fn update(&self, sess: &mut StoreSession, session: &Session) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET last_activity_at = ?, ended_at = ?, duration_seconds = ?, \
             page_views = ?, events_count = ?, is_bounce = ?, converted = ?, \
             conversion_value = ? WHERE id = ?",
        )
        .bind(encode_ts(session.last_activity_at))
        .bind(encode_ts_opt(session.ended_at))
        .bind(session.duration_seconds)
        .bind(session.page_views)
        .bind(session.events_count)
        .bind(session.is_bounce)
        .bind(session.converted)
        .bind(session.conversion_value)
        .bind(&session.id)
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_user(
        &self,
        sess: &mut StoreSession,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sessions WHERE user_id = ? \
             ORDER BY started_at DESC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_session).collect()
    }

    /// Open sessions whose last activity predates the cutoff. Janitor input.
    pub async fn get_expired(
        &self,
        sess: &mut StoreSession,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sessions WHERE ended_at IS NULL AND last_activity_at < ? LIMIT ?",
            COLUMNS
        ))
        .bind(encode_ts(cutoff))
        .bind(limit)
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_session).collect()
    }

    /// Average session duration for one user, in seconds.
    pub async fn avg_duration_for_user(
        &self,
        sess: &mut StoreSession,
        user_id: &str,
    ) -> Result<f64> {
        let avg: Option<f64> = sqlx::query_scalar(
            "SELECT CAST(AVG(duration_seconds) AS REAL) FROM sessions \
             WHERE user_id = ? AND duration_seconds IS NOT NULL",
        )
        .bind(user_id)
        .fetch_one(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(avg.unwrap_or(0.0))
    }

    /// Sessions a user started inside `[start, end)`.
    pub async fn count_for_user_between(
        &self,
        sess: &mut StoreSession,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions \
             WHERE user_id = ? AND started_at >= ? AND started_at < ?",
        )
        .bind(user_id)
        .bind(encode_ts(start))
        .bind(encode_ts(end))
        .fetch_one(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    /// Distinct users that started a session inside `[start, end)`.
    pub async fn user_ids_started_between(
        &self,
        sess: &mut StoreSession,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM sessions WHERE started_at >= ? AND started_at < ?",
        )
        .bind(encode_ts(start))
        .bind(encode_ts(end))
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().collect())
    }

    /// Of `users`, how many started a session inside `[start, end)`.
    pub async fn count_active_in_window(
        &self,
        sess: &mut StoreSession,
        users: &HashSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        if users.is_empty() {
            return Ok(0);
        }

        let user_list: Vec<&String> = users.iter().collect();
        let mut active = HashSet::new();
        let start = encode_ts(start);
        let end = encode_ts(end);

        for chunk in user_list.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT DISTINCT user_id FROM sessions \
                 WHERE started_at >= ? AND started_at < ? AND user_id IN ({})",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query_scalar::<_, String>(&sql).bind(&start).bind(&end);
            for user in chunk {
                q = q.bind(user.as_str());
            }
            let rows = q.fetch_all(sess.conn()).await.map_err(map_sqlx_err)?;
            active.extend(rows);
        }

        Ok(active.len() as u64)
    }

    /// One-pass rollup over sessions started in `[start, end]`.
    pub async fn aggregate_between(
        &self,
        sess: &mut StoreSession,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SessionAggregateRow> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total_sessions, \
             COUNT(DISTINCT user_id) AS unique_users, \
             COALESCE(CAST(AVG(duration_seconds) AS REAL), 0.0) AS avg_duration, \
             COALESCE(CAST(AVG(page_views) AS REAL), 0.0) AS avg_page_views, \
             COALESCE(SUM(is_bounce), 0) AS bounces, \
             COALESCE(SUM(converted), 0) AS conversions, \
             COALESCE(SUM(conversion_value), 0.0) AS total_value \
             FROM sessions WHERE started_at >= ? AND started_at <= ?",
        )
        .bind(encode_ts(start))
        .bind(encode_ts(end))
        .fetch_one(sess.conn())
        .await
        .map_err(map_sqlx_err)?;

        Ok(SessionAggregateRow {
            total_sessions: row.try_get::<i64, _>("total_sessions").map_err(map_sqlx_err)? as u64,
            unique_users: row.try_get::<i64, _>("unique_users").map_err(map_sqlx_err)? as u64,
            avg_duration_seconds: row.try_get("avg_duration").map_err(map_sqlx_err)?,
            avg_page_views: row.try_get("avg_page_views").map_err(map_sqlx_err)?,
            bounces: row.try_get::<i64, _>("bounces").map_err(map_sqlx_err)? as u64,
            conversions: row.try_get::<i64, _>("conversions").map_err(map_sqlx_err)? as u64,
            total_conversion_value: row.try_get("total_value").map_err(map_sqlx_err)?,
        })
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    let started_at: String = row.try_get("started_at").map_err(map_sqlx_err)?;
    let last_activity_at: String = row.try_get("last_activity_at").map_err(map_sqlx_err)?;
    let ended_at: Option<String> = row.try_get("ended_at").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;

    Ok(Session {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        user_id: row.try_get("user_id").map_err(map_sqlx_err)?,
        started_at: decode_ts(&started_at)?,
        last_activity_at: decode_ts(&last_activity_at)?,
        ended_at: decode_ts_opt(ended_at)?,
        duration_seconds: row.try_get("duration_seconds").map_err(map_sqlx_err)?,
        ip_address: row.try_get("ip_address").map_err(map_sqlx_err)?,
        user_agent: row.try_get("user_agent").map_err(map_sqlx_err)?,
        country: row.try_get("country").map_err(map_sqlx_err)?,
        city: row.try_get("city").map_err(map_sqlx_err)?,
        device_type: row.try_get("device_type").map_err(map_sqlx_err)?,
        browser: row.try_get("browser").map_err(map_sqlx_err)?,
        os: row.try_get("os").map_err(map_sqlx_err)?,
        referrer: row.try_get("referrer").map_err(map_sqlx_err)?,
        landing_page: row.try_get("landing_page").map_err(map_sqlx_err)?,
        utm_source: row.try_get("utm_source").map_err(map_sqlx_err)?,
        utm_medium: row.try_get("utm_medium").map_err(map_sqlx_err)?,
        utm_campaign: row.try_get("utm_campaign").map_err(map_sqlx_err)?,
        page_views: row.try_get("page_views").map_err(map_sqlx_err)?,
        events_count: row.try_get("events_count").map_err(map_sqlx_err)?,
        is_bounce: row.try_get("is_bounce").map_err(map_sqlx_err)?,
        converted: row.try_get("converted").map_err(map_sqlx_err)?,
        conversion_value: row.try_get("conversion_value").map_err(map_sqlx_err)?,
        created_at: decode_ts(&created_at)?,
    })
}
