//! Cohort repository

use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, encode_ts};
use chrono::Utc;
use eventide_core::cohort::{Cohort, CohortType};
use eventide_core::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

const COLUMNS: &str =
    "id, name, cohort_type, description, criteria, period, user_count, created_at, updated_at";

pub struct CohortRepo;

impl CohortRepo {
    pub async fn create(&self, sess: &mut StoreSession, cohort: &Cohort) -> Result<()> {
        sqlx::query(
            "INSERT INTO cohorts (id, name, cohort_type, description, criteria, period, \
             user_count, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&cohort.id)
        .bind(&cohort.name)
        .bind(cohort.cohort_type.as_str())
        .bind(&cohort.description)
        .bind(cohort.criteria.to_string())
        .bind(cohort.period.as_str())
        .bind(cohort.user_count)
        .bind(encode_ts(cohort.created_at))
        .bind(encode_ts(cohort.updated_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<Cohort>> {
        let row = sqlx::query(&format!("SELECT {} FROM cohorts WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_cohort(&r)).transpose()
    }

    pub async fn get_by_name(&self, sess: &mut StoreSession, name: &str) -> Result<Option<Cohort>> {
        let row = sqlx::query(&format!("SELECT {} FROM cohorts WHERE name = ?", COLUMNS))
            .bind(name)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_cohort(&r)).transpose()
    }

    pub async fn get_by_type(
        &self,
        sess: &mut StoreSession,
        cohort_type: CohortType,
    ) -> Result<Vec<Cohort>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cohorts WHERE cohort_type = ?",
            COLUMNS
        ))
        .bind(cohort_type.as_str())
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_cohort).collect()
    }

    pub async fn update_user_count(
        &self,
        sess: &mut StoreSession,
        id: &str,
        user_count: i64,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE cohorts SET user_count = ?, updated_at = ? WHERE id = ?")
                .bind(user_count)
                .bind(encode_ts(Utc::now()))
                .bind(id)
                .execute(sess.conn())
                .await
                .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cohorts WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_cohort(row: &SqliteRow) -> Result<Cohort> {
    let cohort_type: String = row.try_get("cohort_type").map_err(map_sqlx_err)?;
    let criteria: String = row.try_get("criteria").map_err(map_sqlx_err)?;
    let period: String = row.try_get("period").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(map_sqlx_err)?;

    Ok(Cohort {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        cohort_type: CohortType::from_str(&cohort_type)?,
        description: row.try_get("description").map_err(map_sqlx_err)?,
        criteria: serde_json::from_str(&criteria)?,
        period: period.parse()?,
        user_count: row.try_get("user_count").map_err(map_sqlx_err)?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}
