//! Export job repository

use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, decode_ts_opt, encode_ts, encode_ts_opt};
use chrono::{DateTime, Utc};
use eventide_core::export::{ExportFormat, ExportJob, ExportStatus};
use eventide_core::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

const COLUMNS: &str = "id, name, export_type, format, query_params, status, file_path, \
     file_size, row_count, error_message, user_id, created_at, started_at, completed_at, \
     expires_at";

pub struct ExportJobRepo;

impl ExportJobRepo {
    pub async fn create(&self, sess: &mut StoreSession, job: &ExportJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO export_jobs (id, name, export_type, format, query_params, status, \
             file_path, file_size, row_count, error_message, user_id, created_at, started_at, \
             completed_at, expires_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.export_type)
        .bind(job.format.as_str())
        .bind(job.query_params.as_ref().map(|v| v.to_string()))
        .bind(job.status.as_str())
        .bind(&job.file_path)
        .bind(job.file_size)
        .bind(job.row_count)
        .bind(&job.error_message)
        .bind(&job.user_id)
        .bind(encode_ts(job.created_at))
        .bind(encode_ts_opt(job.started_at))
        .bind(encode_ts_opt(job.completed_at))
        .bind(encode_ts_opt(job.expires_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<ExportJob>> {
        let row = sqlx::query(&format!("SELECT {} FROM export_jobs WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    pub async fn get_by_user(
        &self,
        sess: &mut StoreSession,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ExportJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM export_jobs WHERE user_id = ? \
             ORDER BY created_at DESC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_job).collect()
    }

    /// Completed jobs whose expiry has passed. Expiry-sweep input.
    pub async fn get_expired(
        &self,
        sess: &mut StoreSession,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExportJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM export_jobs \
             WHERE status = 'completed' AND expires_at IS NOT NULL AND expires_at <= ?",
            COLUMNS
        ))
        .bind(encode_ts(now))
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_job).collect()
    }

    pub async fn set_status(
        &self,
        sess: &mut StoreSession,
        id: &str,
        status: ExportStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE export_jobs SET status = ?, error_message = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(id)
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM export_jobs WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_job(row: &SqliteRow) -> Result<ExportJob> {
    let format: String = row.try_get("format").map_err(map_sqlx_err)?;
    let status: String = row.try_get("status").map_err(map_sqlx_err)?;
    let query_params: Option<String> = row.try_get("query_params").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;
    let started_at: Option<String> = row.try_get("started_at").map_err(map_sqlx_err)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(map_sqlx_err)?;
    let expires_at: Option<String> = row.try_get("expires_at").map_err(map_sqlx_err)?;

    Ok(ExportJob {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        export_type: row.try_get("export_type").map_err(map_sqlx_err)?,
        format: ExportFormat::from_str(&format)?,
        query_params: query_params.map(|p| serde_json::from_str(&p)).transpose()?,
        status: ExportStatus::from_str(&status)?,
        file_path: row.try_get("file_path").map_err(map_sqlx_err)?,
        file_size: row.try_get("file_size").map_err(map_sqlx_err)?,
        row_count: row.try_get("row_count").map_err(map_sqlx_err)?,
        error_message: row.try_get("error_message").map_err(map_sqlx_err)?,
        user_id: row.try_get("user_id").map_err(map_sqlx_err)?,
        created_at: decode_ts(&created_at)?,
        started_at: decode_ts_opt(started_at)?,
        completed_at: decode_ts_opt(completed_at)?,
        expires_at: decode_ts_opt(expires_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnalyticsStore;
    use eventide_core::generate_id;

    fn job(status: ExportStatus, expires_at: Option<DateTime<Utc>>) -> ExportJob {
        ExportJob {
            id: generate_id(),
            name: "events dump".to_string(),
            export_type: "events".to_string(),
            format: ExportFormat::Csv,
            query_params: None,
            status,
            file_path: None,
            file_size: None,
            row_count: None,
            error_message: None,
            user_id: Some("u1".to_string()),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_get_expired_only_completed_past_expiry() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let mut sess = store.session().await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        let future = Utc::now() + chrono::Duration::hours(1);

        let expired = job(ExportStatus::Completed, Some(past));
        let pending = job(ExportStatus::Pending, Some(past));
        let fresh = job(ExportStatus::Completed, Some(future));
        let no_expiry = job(ExportStatus::Completed, None);

        for j in [&expired, &pending, &fresh, &no_expiry] {
            ExportJobRepo.create(&mut sess, j).await.unwrap();
        }

        let found = ExportJobRepo.get_expired(&mut sess, Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expired.id);
    }
}
