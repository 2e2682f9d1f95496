//! Goal and goal-conversion repositories

use super::{json_decode, json_encode};
use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, encode_ts};
use chrono::{DateTime, Utc};
use eventide_core::goal::{Goal, GoalConversion};
use eventide_core::{EventType, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const GOAL_COLUMNS: &str = "id, name, description, event_type, conditions, value, enabled, \
     total_conversions, total_value, created_at, updated_at";

const CONVERSION_COLUMNS: &str =
    "id, goal_id, user_id, session_id, event_id, value, properties, converted_at";

pub struct GoalRepo;

impl GoalRepo {
    pub async fn create(&self, sess: &mut StoreSession, goal: &Goal) -> Result<()> {
        sqlx::query(
            "INSERT INTO goals (id, name, description, event_type, conditions, value, enabled, \
             total_conversions, total_value, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&goal.id)
        .bind(&goal.name)
        .bind(&goal.description)
        .bind(goal.event_type.as_str())
        .bind(json_encode(&goal.conditions)?)
        .bind(goal.value)
        .bind(goal.enabled)
        .bind(goal.total_conversions)
        .bind(goal.total_value)
        .bind(encode_ts(goal.created_at))
        .bind(encode_ts(goal.updated_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<Goal>> {
        let row = sqlx::query(&format!("SELECT {} FROM goals WHERE id = ?", GOAL_COLUMNS))
            .bind(id)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_goal(&r)).transpose()
    }

    pub async fn get_by_name(&self, sess: &mut StoreSession, name: &str) -> Result<Option<Goal>> {
        let row = sqlx::query(&format!("SELECT {} FROM goals WHERE name = ?", GOAL_COLUMNS))
            .bind(name)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_goal(&r)).transpose()
    }

    pub async fn get_enabled(&self, sess: &mut StoreSession) -> Result<Vec<Goal>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM goals WHERE enabled = 1",
            GOAL_COLUMNS
        ))
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_goal).collect()
    }

    /// Enabled goals listening for one event type.
    pub async fn get_enabled_for_type(
        &self,
        sess: &mut StoreSession,
        event_type: EventType,
    ) -> Result<Vec<Goal>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM goals WHERE enabled = 1 AND event_type = ?",
            GOAL_COLUMNS
        ))
        .bind(event_type.as_str())
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_goal).collect()
    }

    /// Atomic conversion counter bump.
    pub async fn increment_conversions(
        &self,
        sess: &mut StoreSession,
        goal_id: &str,
        value: f64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE goals SET total_conversions = total_conversions + 1, \
             total_value = total_value + ?, updated_at = ? WHERE id = ?",
        )
        .bind(value)
        .bind(encode_ts(Utc::now()))
        .bind(goal_id)
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_enabled(
        &self,
        sess: &mut StoreSession,
        goal_id: &str,
        enabled: bool,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE goals SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(encode_ts(Utc::now()))
            .bind(goal_id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM goals WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct GoalConversionRepo;

impl GoalConversionRepo {
    /// Insert a conversion. The `(goal_id, event_id)` unique index turns a
    /// second fire for the same pair into `Error::Conflict`.
    pub async fn create(&self, sess: &mut StoreSession, conversion: &GoalConversion) -> Result<()> {
        sqlx::query(
            "INSERT INTO goal_conversions (id, goal_id, user_id, session_id, event_id, value, \
             properties, converted_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversion.id)
        .bind(&conversion.goal_id)
        .bind(&conversion.user_id)
        .bind(&conversion.session_id)
        .bind(&conversion.event_id)
        .bind(conversion.value)
        .bind(json_encode(&conversion.properties)?)
        .bind(encode_ts(conversion.converted_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// Application-level at-most-once check for a (goal, event) pair.
    pub async fn exists(
        &self,
        sess: &mut StoreSession,
        goal_id: &str,
        event_id: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM goal_conversions WHERE goal_id = ? AND event_id = ?",
        )
        .bind(goal_id)
        .bind(event_id)
        .fetch_one(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(count > 0)
    }

    pub async fn get_by_id(
        &self,
        sess: &mut StoreSession,
        id: &str,
    ) -> Result<Option<GoalConversion>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM goal_conversions WHERE id = ?",
            CONVERSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        row.map(|r| row_to_conversion(&r)).transpose()
    }

    pub async fn get_by_goal(
        &self,
        sess: &mut StoreSession,
        goal_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<GoalConversion>> {
        let mut sql = format!(
            "SELECT {} FROM goal_conversions WHERE goal_id = ?",
            CONVERSION_COLUMNS
        );
        let mut binds = vec![goal_id.to_string()];
        if let Some(start) = start {
            sql.push_str(" AND converted_at >= ?");
            binds.push(encode_ts(start));
        }
        if let Some(end) = end {
            sql.push_str(" AND converted_at <= ?");
            binds.push(encode_ts(end));
        }
        sql.push_str(" ORDER BY converted_at DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(limit).bind(offset);

        let rows = q.fetch_all(sess.conn()).await.map_err(map_sqlx_err)?;
        rows.iter().map(row_to_conversion).collect()
    }

    pub async fn count(&self, sess: &mut StoreSession, goal_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM goal_conversions WHERE goal_id = ?")
                .bind(goal_id)
                .fetch_one(sess.conn())
                .await
                .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }
}

fn row_to_goal(row: &SqliteRow) -> Result<Goal> {
    let event_type: String = row.try_get("event_type").map_err(map_sqlx_err)?;
    let conditions: String = row.try_get("conditions").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(map_sqlx_err)?;

    Ok(Goal {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        description: row.try_get("description").map_err(map_sqlx_err)?,
        event_type: event_type.parse()?,
        conditions: json_decode(&conditions)?,
        value: row.try_get("value").map_err(map_sqlx_err)?,
        enabled: row.try_get("enabled").map_err(map_sqlx_err)?,
        total_conversions: row.try_get("total_conversions").map_err(map_sqlx_err)?,
        total_value: row.try_get("total_value").map_err(map_sqlx_err)?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

fn row_to_conversion(row: &SqliteRow) -> Result<GoalConversion> {
    let properties: String = row.try_get("properties").map_err(map_sqlx_err)?;
    let converted_at: String = row.try_get("converted_at").map_err(map_sqlx_err)?;

    Ok(GoalConversion {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        goal_id: row.try_get("goal_id").map_err(map_sqlx_err)?,
        user_id: row.try_get("user_id").map_err(map_sqlx_err)?,
        session_id: row.try_get("session_id").map_err(map_sqlx_err)?,
        event_id: row.try_get("event_id").map_err(map_sqlx_err)?,
        value: row.try_get("value").map_err(map_sqlx_err)?,
        properties: json_decode(&properties)?,
        converted_at: decode_ts(&converted_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnalyticsStore;
    use eventide_core::event::EventCreate;
    use eventide_core::{generate_id, Event};
    use serde_json::json;

    #[tokio::test]
    async fn test_goal_round_trip_and_type_filter() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let mut sess = store.session().await.unwrap();

        let goal = Goal::new("purchase goal", EventType::Purchase)
            .with_value(100.0)
            .with_condition("plan", json!("pro"));
        GoalRepo.create(&mut sess, &goal).await.unwrap();

        let fetched = GoalRepo.get_by_id(&mut sess, &goal.id).await.unwrap().unwrap();
        assert_eq!(fetched.value, Some(100.0));
        assert_eq!(fetched.conditions.get("plan"), Some(&json!("pro")));

        let matching = GoalRepo
            .get_enabled_for_type(&mut sess, EventType::Purchase)
            .await
            .unwrap();
        assert_eq!(matching.len(), 1);

        let other = GoalRepo
            .get_enabled_for_type(&mut sess, EventType::Signup)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_goals_excluded() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let mut sess = store.session().await.unwrap();

        let goal = Goal::new("off", EventType::Purchase);
        GoalRepo.create(&mut sess, &goal).await.unwrap();
        GoalRepo.set_enabled(&mut sess, &goal.id, false).await.unwrap();

        let matching = GoalRepo
            .get_enabled_for_type(&mut sess, EventType::Purchase)
            .await
            .unwrap();
        assert!(matching.is_empty());
    }

    #[tokio::test]
    async fn test_increment_conversions() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let mut sess = store.session().await.unwrap();

        let goal = Goal::new("g", EventType::Purchase);
        GoalRepo.create(&mut sess, &goal).await.unwrap();

        GoalRepo.increment_conversions(&mut sess, &goal.id, 100.0).await.unwrap();
        GoalRepo.increment_conversions(&mut sess, &goal.id, 50.0).await.unwrap();

        let fetched = GoalRepo.get_by_id(&mut sess, &goal.id).await.unwrap().unwrap();
        assert_eq!(fetched.total_conversions, 2);
        assert_eq!(fetched.total_value, 150.0);
    }

    #[tokio::test]
    async fn test_conversion_unique_per_goal_event() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let mut sess = store.session().await.unwrap();

        let goal = Goal::new("g", EventType::Purchase).with_value(10.0);
        GoalRepo.create(&mut sess, &goal).await.unwrap();

        let event = Event::from_create(
            generate_id(),
            EventCreate::new("purchase", EventType::Purchase).with_user("u1"),
        );
        let conversion = GoalConversion::from_match(&goal, &event);
        GoalConversionRepo.create(&mut sess, &conversion).await.unwrap();

        assert!(GoalConversionRepo
            .exists(&mut sess, &goal.id, &event.id)
            .await
            .unwrap());

        // Same pair again, fresh conversion id: unique index rejects it
        let duplicate = GoalConversion::from_match(&goal, &event);
        let err = GoalConversionRepo.create(&mut sess, &duplicate).await.unwrap_err();
        assert!(matches!(err, eventide_core::Error::Conflict(_)));
    }
}
