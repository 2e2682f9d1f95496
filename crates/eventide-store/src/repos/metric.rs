//! Metric repository

use super::{json_decode, json_encode, placeholders};
use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, encode_ts};
use chrono::{DateTime, Utc};
use eventide_core::metric::{Metric, MetricQuery, TimeSeriesPoint};
use eventide_core::{AggregationPeriod, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

const COLUMNS: &str =
    "id, name, metric_type, value, unit, dimensions, period, module, timestamp, created_at";

pub struct MetricRepo;

impl MetricRepo {
    pub async fn create(&self, sess: &mut StoreSession, metric: &Metric) -> Result<()> {
        sqlx::query(
            "INSERT INTO metrics (id, name, metric_type, value, unit, dimensions, period, \
             module, timestamp, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&metric.id)
        .bind(&metric.name)
        .bind(metric.metric_type.as_str())
        .bind(metric.value)
        .bind(&metric.unit)
        .bind(json_encode(&metric.dimensions)?)
        .bind(metric.period.map(|p| p.as_str()))
        .bind(&metric.module)
        .bind(encode_ts(metric.timestamp))
        .bind(encode_ts(metric.created_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<Metric>> {
        let row = sqlx::query(&format!("SELECT {} FROM metrics WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_metric(&r)).transpose()
    }

    pub async fn get_by_filters(
        &self,
        sess: &mut StoreSession,
        query: &MetricQuery,
    ) -> Result<Vec<Metric>> {
        let mut clauses = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(names) = &query.names
            && !names.is_empty()
        {
            clauses.push(format!("name IN ({})", placeholders(names.len())));
            binds.extend(names.iter().cloned());
        }
        if let Some(types) = &query.metric_types
            && !types.is_empty()
        {
            clauses.push(format!("metric_type IN ({})", placeholders(types.len())));
            binds.extend(types.iter().map(|t| t.as_str().to_string()));
        }
        if let Some(module) = &query.module {
            clauses.push("module = ?".to_string());
            binds.push(module.clone());
        }
        if let Some(period) = query.period {
            clauses.push("period = ?".to_string());
            binds.push(period.as_str().to_string());
        }
        if let Some(start) = query.start {
            clauses.push("timestamp >= ?".to_string());
            binds.push(encode_ts(start));
        }
        if let Some(end) = query.end {
            clauses.push("timestamp <= ?".to_string());
            binds.push(encode_ts(end));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM metrics{} ORDER BY timestamp DESC LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(query.limit.unwrap_or(100)).bind(query.offset);

        let rows = q.fetch_all(sess.conn()).await.map_err(map_sqlx_err)?;
        rows.iter().map(row_to_metric).collect()
    }

    /// Time series for one metric name, ascending by timestamp.
    pub async fn get_time_series(
        &self,
        sess: &mut StoreSession,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Option<AggregationPeriod>,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let mut sql =
            "SELECT timestamp, value FROM metrics WHERE name = ? AND timestamp >= ? AND timestamp <= ?"
                .to_string();
        if period.is_some() {
            sql.push_str(" AND period = ?");
        }
        sql.push_str(" ORDER BY timestamp ASC");

        let mut q = sqlx::query(&sql)
            .bind(name)
            .bind(encode_ts(start))
            .bind(encode_ts(end));
        if let Some(period) = period {
            q = q.bind(period.as_str());
        }

        let rows = q.fetch_all(sess.conn()).await.map_err(map_sqlx_err)?;
        rows.iter()
            .map(|row| {
                let ts: String = row.try_get("timestamp").map_err(map_sqlx_err)?;
                Ok(TimeSeriesPoint {
                    timestamp: decode_ts(&ts)?,
                    value: row.try_get("value").map_err(map_sqlx_err)?,
                })
            })
            .collect()
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM metrics WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_metric(row: &SqliteRow) -> Result<Metric> {
    let metric_type: String = row.try_get("metric_type").map_err(map_sqlx_err)?;
    let dimensions: String = row.try_get("dimensions").map_err(map_sqlx_err)?;
    let period: Option<String> = row.try_get("period").map_err(map_sqlx_err)?;
    let timestamp: String = row.try_get("timestamp").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;

    Ok(Metric {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        metric_type: metric_type.parse()?,
        value: row.try_get("value").map_err(map_sqlx_err)?,
        unit: row.try_get("unit").map_err(map_sqlx_err)?,
        dimensions: json_decode(&dimensions)?,
        period: period.map(|p| AggregationPeriod::from_str(&p)).transpose()?,
        module: row.try_get("module").map_err(map_sqlx_err)?,
        timestamp: decode_ts(&timestamp)?,
        created_at: decode_ts(&created_at)?,
    })
}
