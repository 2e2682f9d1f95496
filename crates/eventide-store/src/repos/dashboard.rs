//! Dashboard repository

use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, encode_ts};
use chrono::Utc;
use eventide_core::dashboard::Dashboard;
use eventide_core::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const COLUMNS: &str = "id, name, description, config, is_public, owner_id, created_at, updated_at";

pub struct DashboardRepo;

impl DashboardRepo {
    pub async fn create(&self, sess: &mut StoreSession, dashboard: &Dashboard) -> Result<()> {
        sqlx::query(
            "INSERT INTO dashboards (id, name, description, config, is_public, owner_id, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&dashboard.id)
        .bind(&dashboard.name)
        .bind(&dashboard.description)
        .bind(dashboard.config.to_string())
        .bind(dashboard.is_public)
        .bind(&dashboard.owner_id)
        .bind(encode_ts(dashboard.created_at))
        .bind(encode_ts(dashboard.updated_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<Dashboard>> {
        let row = sqlx::query(&format!("SELECT {} FROM dashboards WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_dashboard(&r)).transpose()
    }

    pub async fn get_by_owner(
        &self,
        sess: &mut StoreSession,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Dashboard>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM dashboards WHERE owner_id = ? \
             ORDER BY updated_at DESC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_dashboard).collect()
    }

    pub async fn get_public(
        &self,
        sess: &mut StoreSession,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Dashboard>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM dashboards WHERE is_public = 1 \
             ORDER BY updated_at DESC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_dashboard).collect()
    }

    pub async fn update_config(
        &self,
        sess: &mut StoreSession,
        id: &str,
        config: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE dashboards SET config = ?, updated_at = ? WHERE id = ?")
            .bind(config.to_string())
            .bind(encode_ts(Utc::now()))
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dashboards WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_dashboard(row: &SqliteRow) -> Result<Dashboard> {
    let config: String = row.try_get("config").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(map_sqlx_err)?;

    Ok(Dashboard {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        description: row.try_get("description").map_err(map_sqlx_err)?,
        config: serde_json::from_str(&config)?,
        is_public: row.try_get("is_public").map_err(map_sqlx_err)?,
        owner_id: row.try_get("owner_id").map_err(map_sqlx_err)?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnalyticsStore;
    use eventide_core::generate_id;
    use serde_json::json;

    #[tokio::test]
    async fn test_owner_and_public_listing() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let mut sess = store.session().await.unwrap();

        let now = Utc::now();
        for (name, owner, public) in [
            ("mine", Some("alice"), false),
            ("shared", Some("alice"), true),
            ("theirs", Some("bob"), false),
        ] {
            let dashboard = Dashboard {
                id: generate_id(),
                name: name.to_string(),
                description: None,
                config: json!({"widgets": []}),
                is_public: public,
                owner_id: owner.map(String::from),
                created_at: now,
                updated_at: now,
            };
            DashboardRepo.create(&mut sess, &dashboard).await.unwrap();
        }

        let alices = DashboardRepo.get_by_owner(&mut sess, "alice", 10, 0).await.unwrap();
        assert_eq!(alices.len(), 2);

        let public = DashboardRepo.get_public(&mut sess, 10, 0).await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].name, "shared");
    }
}
