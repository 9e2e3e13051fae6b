use crate::db::Db;
use crate::error::{Result, TrackerError};
use crate::models::Weakness;
use crate::rules::Diagnosis;
use crate::srs;
use crate::stats::TopicStats;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub weakness: Weakness,
    pub created: bool,
}

/// Weaknesses keyed by (user, topic, root cause).
///
/// A repeat diagnosis overwrites evidence and severity in place; the
/// detection date, review due date and spaced state are kept from the
/// first detection.
#[derive(Clone)]
pub struct WeaknessStore {
    pool: SqlitePool,
}

impl WeaknessStore {
    pub fn new(db: &Db) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Single-statement upsert against the unique key, so two analyses racing
    /// on the same topic can never produce a second row.
    pub async fn upsert(
        &self,
        user_id: &str,
        topic_id: &str,
        diagnosis: &Diagnosis,
        stats: &TopicStats,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let new_id = uuid::Uuid::new_v4().to_string();

        let weakness = sqlx::query_as::<_, Weakness>(
            r#"
            INSERT INTO weaknesses
                (id, user_id, topic_id, root_cause, severity,
                 recent_accuracy, recent_speed, sample_size,
                 review_due_at, review_count, interval_days, ease_factor,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            ON CONFLICT (user_id, topic_id, root_cause) DO UPDATE SET
                severity = excluded.severity,
                recent_accuracy = excluded.recent_accuracy,
                recent_speed = excluded.recent_speed,
                sample_size = excluded.sample_size,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(&new_id)
        .bind(user_id)
        .bind(topic_id)
        .bind(diagnosis.root_cause.as_str())
        .bind(diagnosis.severity.as_str())
        .bind(stats.accuracy)
        .bind(stats.avg_time)
        .bind(stats.attempts)
        .bind(srs::due_after(now, srs::WEAKNESS_FIRST_REVIEW_DAYS))
        .bind(srs::DEFAULT_INTERVAL_DAYS)
        .bind(srs::DEFAULT_EASE_FACTOR)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let created = weakness.id == new_id;
        Ok(UpsertOutcome { weakness, created })
    }

    /// All of a user's weaknesses, soonest review first.
    pub async fn list(&self, user_id: &str) -> Result<Vec<Weakness>> {
        let rows = sqlx::query_as::<_, Weakness>(
            "SELECT * FROM weaknesses WHERE user_id = ? ORDER BY review_due_at ASC, created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_for_topic(&self, user_id: &str, topic_id: &str) -> Result<Vec<Weakness>> {
        let rows = sqlx::query_as::<_, Weakness>(
            "SELECT * FROM weaknesses WHERE user_id = ? AND topic_id = ? ORDER BY review_due_at ASC, created_at ASC",
        )
        .bind(user_id)
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Most severe high/critical weakness on the topic, if any.
    pub async fn find_severe(&self, user_id: &str, topic_id: &str) -> Result<Option<Weakness>> {
        let weakness = self
            .list_for_topic(user_id, topic_id)
            .await?
            .into_iter()
            .filter(|w| w.severity.is_severe())
            .max_by_key(|w| w.severity);
        Ok(weakness)
    }

    #[cfg(test)]
    pub async fn count(&self, user_id: &str, topic_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM weaknesses WHERE user_id = ? AND topic_id = ?")
            .bind(user_id)
            .bind(topic_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM weaknesses WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TrackerError::not_found("weakness"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "weakness_tests.rs"]
mod tests;
