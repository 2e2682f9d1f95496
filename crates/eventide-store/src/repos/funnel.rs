//! Funnel repository

use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, encode_ts};
use chrono::Utc;
use eventide_core::funnel::{Funnel, FunnelStep};
use eventide_core::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const FUNNEL_COLUMNS: &str = "id, name, description, enabled, created_at, updated_at";
const STEP_COLUMNS: &str = "id, funnel_id, name, event_type, step_order, description";

pub struct FunnelRepo;

impl FunnelRepo {
    /// Insert a funnel with its steps. Step orders are validated first.
    pub async fn create(&self, sess: &mut StoreSession, funnel: &Funnel) -> Result<()> {
        funnel.validate_steps()?;

        sqlx::query(
            "INSERT INTO funnels (id, name, description, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&funnel.id)
        .bind(&funnel.name)
        .bind(&funnel.description)
        .bind(funnel.enabled)
        .bind(encode_ts(funnel.created_at))
        .bind(encode_ts(funnel.updated_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;

        for step in &funnel.steps {
            sqlx::query(
                "INSERT INTO funnel_steps (id, funnel_id, name, event_type, step_order, \
                 description, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id)
            .bind(&step.funnel_id)
            .bind(&step.name)
            .bind(step.event_type.as_str())
            .bind(step.order)
            .bind(&step.description)
            .bind(encode_ts(Utc::now()))
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        }

        Ok(())
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<Funnel>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM funnels WHERE id = ?",
            FUNNEL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(sess.conn())
        .await
        .map_err(map_sqlx_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut funnel = row_to_funnel(&row)?;
        funnel.steps = self.steps_for(sess, id).await?;
        Ok(Some(funnel))
    }

    pub async fn get_by_name(
        &self,
        sess: &mut StoreSession,
        name: &str,
    ) -> Result<Option<Funnel>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM funnels WHERE name = ?",
            FUNNEL_COLUMNS
        ))
        .bind(name)
        .fetch_optional(sess.conn())
        .await
        .map_err(map_sqlx_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut funnel = row_to_funnel(&row)?;
        let id = funnel.id.clone();
        funnel.steps = self.steps_for(sess, &id).await?;
        Ok(Some(funnel))
    }

    pub async fn get_enabled(&self, sess: &mut StoreSession) -> Result<Vec<Funnel>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM funnels WHERE enabled = 1",
            FUNNEL_COLUMNS
        ))
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;

        let mut funnels = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut funnel = row_to_funnel(row)?;
            let id = funnel.id.clone();
            funnel.steps = self.steps_for(sess, &id).await?;
            funnels.push(funnel);
        }
        Ok(funnels)
    }

    async fn steps_for(&self, sess: &mut StoreSession, funnel_id: &str) -> Result<Vec<FunnelStep>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM funnel_steps WHERE funnel_id = ? ORDER BY step_order ASC",
            STEP_COLUMNS
        ))
        .bind(funnel_id)
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_step).collect()
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM funnels WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_funnel(row: &SqliteRow) -> Result<Funnel> {
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(map_sqlx_err)?;

    Ok(Funnel {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        description: row.try_get("description").map_err(map_sqlx_err)?,
        enabled: row.try_get("enabled").map_err(map_sqlx_err)?,
        steps: Vec::new(),
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<FunnelStep> {
    let event_type: String = row.try_get("event_type").map_err(map_sqlx_err)?;
    Ok(FunnelStep {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        funnel_id: row.try_get("funnel_id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        event_type: event_type.parse()?,
        order: row.try_get("step_order").map_err(map_sqlx_err)?,
        description: row.try_get("description").map_err(map_sqlx_err)?,
    })
}
