//! Event repository

use super::{json_decode, json_encode, placeholders, IN_CHUNK};
use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, decode_ts_opt, encode_ts, encode_ts_opt};
use chrono::{DateTime, Utc};
use eventide_core::event::{Event, EventQuery};
use eventide_core::{EventType, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashSet;

const COLUMNS: &str = "id, name, event_type, properties, user_id, session_id, module, \
     page_url, page_title, referrer, utm_source, user_agent, ip_address, country, city, \
     device_type, browser, os, timestamp, created_at, processed, processed_at";

pub struct EventRepo;

impl EventRepo {
    pub async fn create(&self, sess: &mut StoreSession, event: &Event) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (id, name, event_type, properties, user_id, session_id, module, \
             page_url, page_title, referrer, utm_source, user_agent, ip_address, country, city, \
             device_type, browser, os, timestamp, created_at, processed, processed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.name)
        .bind(event.event_type.as_str())
        .bind(json_encode(&event.properties)?)
        .bind(&event.user_id)
        .bind(&event.session_id)
        .bind(&event.module)
        .bind(&event.page_url)
        .bind(&event.page_title)
        .bind(&event.referrer)
        .bind(&event.utm_source)
        .bind(&event.user_agent)
        .bind(&event.ip_address)
        .bind(&event.country)
        .bind(&event.city)
        .bind(&event.device_type)
        .bind(&event.browser)
        .bind(&event.os)
        .bind(encode_ts(event.timestamp))
        .bind(encode_ts(event.created_at))
        .bind(event.processed)
        .bind(encode_ts_opt(event.processed_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    /// Insert a batch of events. Atomic within the caller's session.
    pub async fn bulk_create(&self, sess: &mut StoreSession, events: &[Event]) -> Result<u64> {
        for event in events {
            self.create(sess, event).await?;
        }
        tracing::debug!(count = events.len(), "Bulk inserted events");
        Ok(events.len() as u64)
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<Event>> {
        let row = sqlx::query(&format!("SELECT {} FROM events WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;

        row.map(|r| row_to_event(&r)).transpose()
    }

    pub async fn get_by_filters(
        &self,
        sess: &mut StoreSession,
        query: &EventQuery,
    ) -> Result<Vec<Event>> {
        let (where_clause, binds) = build_filter(query);
        let limit = query.limit.unwrap_or(100);

        let sql = format!(
            "SELECT {} FROM events{} ORDER BY timestamp DESC LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(limit).bind(query.offset);

        let rows = q.fetch_all(sess.conn()).await.map_err(map_sqlx_err)?;
        rows.iter().map(row_to_event).collect()
    }

    pub async fn count(&self, sess: &mut StoreSession, query: &EventQuery) -> Result<u64> {
        let (where_clause, binds) = build_filter(query);
        let sql = format!("SELECT COUNT(*) FROM events{}", where_clause);

        let mut q = sqlx::query_scalar::<_, i64>(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }

        let count = q.fetch_one(sess.conn()).await.map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    /// Unprocessed events, oldest event time first.
    pub async fn get_unprocessed(
        &self,
        sess: &mut StoreSession,
        limit: u32,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM events WHERE processed = 0 ORDER BY timestamp ASC LIMIT ?",
            COLUMNS
        ))
        .bind(limit)
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;

        rows.iter().map(row_to_event).collect()
    }

    /// Mark a set of events processed. Rows already claimed by a concurrent
    /// processor are skipped; the return value is the number actually
    /// updated.
    pub async fn mark_processed(
        &self,
        sess: &mut StoreSession,
        ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut updated = 0u64;
        let at = encode_ts(at);

        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!(
                "UPDATE events SET processed = 1, processed_at = ? \
                 WHERE id IN ({}) AND processed = 0",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&sql).bind(&at);
            for id in chunk {
                q = q.bind(id);
            }
            let result = q.execute(sess.conn()).await.map_err(map_sqlx_err)?;
            updated += result.rows_affected();
        }

        tracing::info!(requested = ids.len(), updated = updated, "Marked events processed");
        Ok(updated)
    }

    /// Persist enrichment fields filled in after ingest.
    pub async fn update_enrichment(&self, sess: &mut StoreSession, event: &Event) -> Result<()> {
        sqlx::query(
            "UPDATE events SET country = ?, city = ?, device_type = ?, browser = ?, os = ? \
             WHERE id = ?",
        )
        .bind(&event.country)
        .bind(&event.city)
        .bind(&event.device_type)
        .bind(&event.browser)
        .bind(&event.os)
        .bind(&event.id)
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// All events in a time range, optionally restricted by type, ascending.
    pub async fn get_in_range(
        &self,
        sess: &mut StoreSession,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        event_types: Option<&[EventType]>,
    ) -> Result<Vec<Event>> {
        let mut sql = format!(
            "SELECT {} FROM events WHERE timestamp >= ? AND timestamp <= ?",
            COLUMNS
        );
        if let Some(types) = event_types {
            sql.push_str(&format!(
                " AND event_type IN ({})",
                placeholders(types.len())
            ));
        }
        sql.push_str(" ORDER BY timestamp ASC");

        let mut q = sqlx::query(&sql).bind(encode_ts(start)).bind(encode_ts(end));
        if let Some(types) = event_types {
            for ty in types {
                q = q.bind(ty.as_str());
            }
        }

        let rows = q.fetch_all(sess.conn()).await.map_err(map_sqlx_err)?;
        rows.iter().map(row_to_event).collect()
    }

    /// Distinct users that produced an event of the type in the window.
    pub async fn distinct_users(
        &self,
        sess: &mut StoreSession,
        event_type: EventType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM events \
             WHERE event_type = ? AND timestamp >= ? AND timestamp <= ? \
             AND user_id IS NOT NULL",
        )
        .bind(event_type.as_str())
        .bind(encode_ts(start))
        .bind(encode_ts(end))
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().collect())
    }

    /// Of `users`, the ones that produced an event of the type in the window.
    pub async fn distinct_users_among(
        &self,
        sess: &mut StoreSession,
        event_type: EventType,
        users: &HashSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        if users.is_empty() {
            return Ok(HashSet::new());
        }

        let user_list: Vec<&String> = users.iter().collect();
        let mut completers = HashSet::new();
        let start = encode_ts(start);
        let end = encode_ts(end);

        for chunk in user_list.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT DISTINCT user_id FROM events \
                 WHERE event_type = ? AND timestamp >= ? AND timestamp <= ? \
                 AND user_id IN ({})",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query_scalar::<_, String>(&sql)
                .bind(event_type.as_str())
                .bind(&start)
                .bind(&end);
            for user in chunk {
                q = q.bind(user.as_str());
            }
            let rows = q.fetch_all(sess.conn()).await.map_err(map_sqlx_err)?;
            completers.extend(rows);
        }

        Ok(completers)
    }

    /// A user's attribution touchpoints in the lookback window, ascending.
    pub async fn get_touchpoints(
        &self,
        sess: &mut StoreSession,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let touchpoint_types = [
            EventType::PageView,
            EventType::ButtonClick,
            EventType::LinkClick,
            EventType::SearchQuery,
            EventType::ModuleOpen,
        ];

        let sql = format!(
            "SELECT {} FROM events \
             WHERE user_id = ? AND timestamp >= ? AND timestamp <= ? \
             AND event_type IN ({}) ORDER BY timestamp ASC",
            COLUMNS,
            placeholders(touchpoint_types.len())
        );

        let mut q = sqlx::query(&sql)
            .bind(user_id)
            .bind(encode_ts(start))
            .bind(encode_ts(end));
        for ty in touchpoint_types {
            q = q.bind(ty.as_str());
        }

        let rows = q.fetch_all(sess.conn()).await.map_err(map_sqlx_err)?;
        rows.iter().map(row_to_event).collect()
    }

    /// Distinct modules a user has touched.
    pub async fn count_distinct_modules(
        &self,
        sess: &mut StoreSession,
        user_id: &str,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT module) FROM events \
             WHERE user_id = ? AND module IS NOT NULL",
        )
        .bind(user_id)
        .fetch_one(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    /// Retention sweep: drop events older than the cutoff.
    pub async fn delete_older_than(
        &self,
        sess: &mut StoreSession,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM events WHERE timestamp < ?")
            .bind(encode_ts(cutoff))
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn build_filter(query: &EventQuery) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    if let Some(types) = &query.event_types
        && !types.is_empty()
    {
        clauses.push(format!("event_type IN ({})", placeholders(types.len())));
        binds.extend(types.iter().map(|t| t.as_str().to_string()));
    }
    if let Some(user_id) = &query.user_id {
        clauses.push("user_id = ?".to_string());
        binds.push(user_id.clone());
    }
    if let Some(session_id) = &query.session_id {
        clauses.push("session_id = ?".to_string());
        binds.push(session_id.clone());
    }
    if let Some(module) = &query.module {
        clauses.push("module = ?".to_string());
        binds.push(module.clone());
    }
    if let Some(start) = query.start {
        clauses.push("timestamp >= ?".to_string());
        binds.push(encode_ts(start));
    }
    if let Some(end) = query.end {
        clauses.push("timestamp <= ?".to_string());
        binds.push(encode_ts(end));
    }

    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), binds)
    }
}

fn row_to_event(row: &SqliteRow) -> Result<Event> {
    let event_type: String = row.try_get("event_type").map_err(map_sqlx_err)?;
    let properties: String = row.try_get("properties").map_err(map_sqlx_err)?;
    let timestamp: String = row.try_get("timestamp").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;
    let processed_at: Option<String> = row.try_get("processed_at").map_err(map_sqlx_err)?;

    Ok(Event {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        event_type: event_type.parse()?,
        properties: json_decode(&properties)?,
        user_id: row.try_get("user_id").map_err(map_sqlx_err)?,
        session_id: row.try_get("session_id").map_err(map_sqlx_err)?,
        module: row.try_get("module").map_err(map_sqlx_err)?,
        page_url: row.try_get("page_url").map_err(map_sqlx_err)?,
        page_title: row.try_get("page_title").map_err(map_sqlx_err)?,
        referrer: row.try_get("referrer").map_err(map_sqlx_err)?,
        utm_source: row.try_get("utm_source").map_err(map_sqlx_err)?,
        user_agent: row.try_get("user_agent").map_err(map_sqlx_err)?,
        ip_address: row.try_get("ip_address").map_err(map_sqlx_err)?,
        country: row.try_get("country").map_err(map_sqlx_err)?,
        city: row.try_get("city").map_err(map_sqlx_err)?,
        device_type: row.try_get("device_type").map_err(map_sqlx_err)?,
        browser: row.try_get("browser").map_err(map_sqlx_err)?,
        os: row.try_get("os").map_err(map_sqlx_err)?,
        timestamp: decode_ts(&timestamp)?,
        created_at: decode_ts(&created_at)?,
        processed: row.try_get("processed").map_err(map_sqlx_err)?,
        processed_at: decode_ts_opt(processed_at)?,
    })
}
