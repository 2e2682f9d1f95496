//! A/B test and assignment repositories

use super::{json_decode, json_encode};
use crate::session::{map_sqlx_err, StoreSession};
use crate::time::{decode_ts, decode_ts_opt, encode_ts, encode_ts_opt};
use chrono::{DateTime, Utc};
use eventide_core::ab_test::{AbTest, AbTestAssignment, AbTestStatus};
use eventide_core::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

const TEST_COLUMNS: &str = "id, name, description, hypothesis, goal_metric, variants, \
     traffic_split, status, start_date, end_date, min_sample_size, total_participants, winner, \
     confidence_level, created_at, updated_at";

pub struct AbTestRepo;

impl AbTestRepo {
    pub async fn create(&self, sess: &mut StoreSession, test: &AbTest) -> Result<()> {
        sqlx::query(
            "INSERT INTO ab_tests (id, name, description, hypothesis, goal_metric, variants, \
             traffic_split, status, start_date, end_date, min_sample_size, total_participants, \
             winner, confidence_level, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&test.id)
        .bind(&test.name)
        .bind(&test.description)
        .bind(&test.hypothesis)
        .bind(&test.goal_metric)
        .bind(json_encode(&test.variants)?)
        .bind(json_encode(&test.traffic_split)?)
        .bind(test.status.as_str())
        .bind(encode_ts_opt(test.start_date))
        .bind(encode_ts_opt(test.end_date))
        .bind(test.min_sample_size)
        .bind(test.total_participants)
        .bind(&test.winner)
        .bind(test.confidence_level)
        .bind(encode_ts(test.created_at))
        .bind(encode_ts(test.updated_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get_by_id(&self, sess: &mut StoreSession, id: &str) -> Result<Option<AbTest>> {
        let row = sqlx::query(&format!("SELECT {} FROM ab_tests WHERE id = ?", TEST_COLUMNS))
            .bind(id)
            .fetch_optional(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| row_to_test(&r)).transpose()
    }

    pub async fn get_by_name(&self, sess: &mut StoreSession, name: &str) -> Result<Option<AbTest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ab_tests WHERE name = ?",
            TEST_COLUMNS
        ))
        .bind(name)
        .fetch_optional(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        row.map(|r| row_to_test(&r)).transpose()
    }

    /// Tests currently accepting traffic.
    pub async fn get_active(&self, sess: &mut StoreSession, now: DateTime<Utc>) -> Result<Vec<AbTest>> {
        let now = encode_ts(now);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ab_tests WHERE status = 'running' \
             AND (start_date IS NULL OR start_date <= ?) \
             AND (end_date IS NULL OR end_date >= ?)",
            TEST_COLUMNS
        ))
        .bind(&now)
        .bind(&now)
        .fetch_all(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(row_to_test).collect()
    }

    pub async fn increment_participants(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ab_tests SET total_participants = total_participants + 1, updated_at = ? \
             WHERE id = ?",
        )
        .bind(encode_ts(Utc::now()))
        .bind(id)
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_status(
        &self,
        sess: &mut StoreSession,
        id: &str,
        status: AbTestStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE ab_tests SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(encode_ts(Utc::now()))
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, sess: &mut StoreSession, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ab_tests WHERE id = ?")
            .bind(id)
            .execute(sess.conn())
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert an assignment; `(test_id, user_id)` uniqueness turns races
    /// into `Conflict`.
    pub async fn create_assignment(
        &self,
        sess: &mut StoreSession,
        assignment: &AbTestAssignment,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO ab_test_assignments (id, test_id, user_id, variant, assigned_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&assignment.id)
        .bind(&assignment.test_id)
        .bind(&assignment.user_id)
        .bind(&assignment.variant)
        .bind(encode_ts(assignment.assigned_at))
        .execute(sess.conn())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get_assignment(
        &self,
        sess: &mut StoreSession,
        test_id: &str,
        user_id: &str,
    ) -> Result<Option<AbTestAssignment>> {
        let row = sqlx::query(
            "SELECT id, test_id, user_id, variant, assigned_at FROM ab_test_assignments \
             WHERE test_id = ? AND user_id = ?",
        )
        .bind(test_id)
        .bind(user_id)
        .fetch_optional(sess.conn())
        .await
        .map_err(map_sqlx_err)?;

        row.map(|r| {
            let assigned_at: String = r.try_get("assigned_at").map_err(map_sqlx_err)?;
            Ok(AbTestAssignment {
                id: r.try_get("id").map_err(map_sqlx_err)?,
                test_id: r.try_get("test_id").map_err(map_sqlx_err)?,
                user_id: r.try_get("user_id").map_err(map_sqlx_err)?,
                variant: r.try_get("variant").map_err(map_sqlx_err)?,
                assigned_at: decode_ts(&assigned_at)?,
            })
        })
        .transpose()
    }
}

fn row_to_test(row: &SqliteRow) -> Result<AbTest> {
    let variants: String = row.try_get("variants").map_err(map_sqlx_err)?;
    let traffic_split: String = row.try_get("traffic_split").map_err(map_sqlx_err)?;
    let status: String = row.try_get("status").map_err(map_sqlx_err)?;
    let start_date: Option<String> = row.try_get("start_date").map_err(map_sqlx_err)?;
    let end_date: Option<String> = row.try_get("end_date").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(map_sqlx_err)?;

    Ok(AbTest {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        description: row.try_get("description").map_err(map_sqlx_err)?,
        hypothesis: row.try_get("hypothesis").map_err(map_sqlx_err)?,
        goal_metric: row.try_get("goal_metric").map_err(map_sqlx_err)?,
        variants: json_decode(&variants)?,
        traffic_split: json_decode(&traffic_split)?,
        status: AbTestStatus::from_str(&status)?,
        start_date: decode_ts_opt(start_date)?,
        end_date: decode_ts_opt(end_date)?,
        min_sample_size: row.try_get("min_sample_size").map_err(map_sqlx_err)?,
        total_participants: row.try_get("total_participants").map_err(map_sqlx_err)?,
        winner: row.try_get("winner").map_err(map_sqlx_err)?,
        confidence_level: row.try_get("confidence_level").map_err(map_sqlx_err)?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnalyticsStore;
    use eventide_core::generate_id;
    use std::collections::HashMap;

    fn running_test() -> AbTest {
        let now = Utc::now();
        AbTest {
            id: generate_id(),
            name: "cta-color".to_string(),
            description: None,
            hypothesis: None,
            goal_metric: "signup_rate".to_string(),
            variants: vec!["control".to_string(), "variant_a".to_string()],
            traffic_split: HashMap::from([
                ("control".to_string(), 0.5),
                ("variant_a".to_string(), 0.5),
            ]),
            status: AbTestStatus::Running,
            start_date: Some(now - chrono::Duration::days(1)),
            end_date: None,
            min_sample_size: 100,
            total_participants: 0,
            winner: None,
            confidence_level: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_round_trip_and_active_filter() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let mut sess = store.session().await.unwrap();

        let test = running_test();
        AbTestRepo.create(&mut sess, &test).await.unwrap();

        let active = AbTestRepo.get_active(&mut sess, Utc::now()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].traffic_split.len(), 2);

        AbTestRepo
            .set_status(&mut sess, &test.id, AbTestStatus::Paused)
            .await
            .unwrap();
        let active = AbTestRepo.get_active(&mut sess, Utc::now()).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_assignment_unique_per_test_user() {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let mut sess = store.session().await.unwrap();

        let test = running_test();
        AbTestRepo.create(&mut sess, &test).await.unwrap();

        let assignment = AbTestAssignment {
            id: generate_id(),
            test_id: test.id.clone(),
            user_id: "u1".to_string(),
            variant: "control".to_string(),
            assigned_at: Utc::now(),
        };
        AbTestRepo.create_assignment(&mut sess, &assignment).await.unwrap();

        let duplicate = AbTestAssignment {
            id: generate_id(),
            variant: "variant_a".to_string(),
            ..assignment.clone()
        };
        let err = AbTestRepo.create_assignment(&mut sess, &duplicate).await.unwrap_err();
        assert!(matches!(err, eventide_core::Error::Conflict(_)));

        let stored = AbTestRepo
            .get_assignment(&mut sess, &test.id, "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.variant, "control");
    }
}
