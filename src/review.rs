use crate::db::Db;
use crate::error::{Result, TrackerError};
use crate::models::{ReviewEntry, ReviewSchedule, ReviewStatus};
use crate::srs;
use crate::weakness::WeaknessStore;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// No high or critical weakness on the topic.
    Skipped,
    Created,
    Rescheduled { interval_days: i64 },
}

pub(crate) fn check_accuracy(accuracy: f64) -> Result<()> {
    if !accuracy.is_finite() || !(0.0..=1.0).contains(&accuracy) {
        return Err(TrackerError::validation("accuracy must be between 0 and 1"));
    }
    Ok(())
}

/// One review schedule per (user, topic), created only for topics with a
/// severe weakness.
#[derive(Clone)]
pub struct ReviewScheduler {
    pool: SqlitePool,
    weaknesses: WeaknessStore,
}

impl ReviewScheduler {
    pub fn new(db: &Db, weaknesses: WeaknessStore) -> Self {
        Self {
            pool: db.pool().clone(),
            weaknesses,
        }
    }

    pub async fn trigger(&self, user_id: &str, topic_id: &str, accuracy: f64, now: DateTime<Utc>) -> Result<TriggerOutcome> {
        check_accuracy(accuracy)?;

        if self.weaknesses.find_severe(user_id, topic_id).await?.is_none() {
            return Ok(TriggerOutcome::Skipped);
        }

        let interval_days = srs::trigger_interval_days(accuracy);
        let updated = sqlx::query(
            r#"
            UPDATE review_schedules
            SET next_review_at = ?, review_count = review_count + 1, last_reviewed_at = ?, status = ?
            WHERE user_id = ? AND topic_id = ?
            "#,
        )
        .bind(srs::due_after(now, interval_days))
        .bind(now)
        .bind(ReviewStatus::Scheduled.as_str())
        .bind(user_id)
        .bind(topic_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(TriggerOutcome::Rescheduled { interval_days });
        }

        // A concurrent trigger may have created it first; the unique key keeps one.
        let inserted = sqlx::query(
            r#"
            INSERT INTO review_schedules (id, user_id, topic_id, next_review_at, review_count, last_reviewed_at, status, history)
            VALUES (?, ?, ?, ?, 0, NULL, ?, '[]')
            ON CONFLICT (user_id, topic_id) DO NOTHING
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(topic_id)
        .bind(srs::due_after(now, srs::FIRST_REVIEW_DAYS))
        .bind(ReviewStatus::Scheduled.as_str())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Ok(TriggerOutcome::Skipped);
        }

        log::info!("created review schedule for {}/{}", user_id, topic_id);
        Ok(TriggerOutcome::Created)
    }

    /// One statement, so a trigger racing with the completion still gets
    /// its count increment.
    pub async fn complete(&self, user_id: &str, review_id: &str, accuracy: f64, now: DateTime<Utc>) -> Result<ReviewSchedule> {
        check_accuracy(accuracy)?;

        let interval_days = srs::completion_interval_days(accuracy);
        let entry = serde_json::to_string(&ReviewEntry {
            reviewed_at: now,
            accuracy,
            interval_days,
        })?;

        let review = sqlx::query_as::<_, ReviewSchedule>(
            r#"
            UPDATE review_schedules
            SET next_review_at = ?,
                review_count = review_count + 1,
                last_reviewed_at = ?,
                status = ?,
                history = json_insert(history, '$[#]', json(?))
            WHERE id = ? AND user_id = ?
            RETURNING *
            "#,
        )
        .bind(srs::due_after(now, interval_days))
        .bind(now)
        .bind(ReviewStatus::Scheduled.as_str())
        .bind(entry)
        .bind(review_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TrackerError::not_found("review"))?;

        log::info!(
            "review {} completed at {:.2}, next in {} days",
            review_id,
            accuracy,
            interval_days
        );
        Ok(review)
    }

    pub async fn get(&self, user_id: &str, review_id: &str) -> Result<Option<ReviewSchedule>> {
        let review = sqlx::query_as::<_, ReviewSchedule>("SELECT * FROM review_schedules WHERE id = ? AND user_id = ?")
            .bind(review_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(review)
    }

    pub async fn list(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<ReviewSchedule>> {
        let reviews = sqlx::query_as::<_, ReviewSchedule>(
            "SELECT * FROM review_schedules WHERE user_id = ? ORDER BY next_review_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews.into_iter().map(|r| r.status_at(now)).collect())
    }

    pub async fn due(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<ReviewSchedule>> {
        let reviews = self.list(user_id, now).await?;
        Ok(reviews.into_iter().filter(|r| r.next_review_at <= now).collect())
    }

    pub async fn for_topic(&self, user_id: &str, topic_id: &str, now: DateTime<Utc>) -> Result<ReviewSchedule> {
        let review = sqlx::query_as::<_, ReviewSchedule>(
            "SELECT * FROM review_schedules WHERE user_id = ? AND topic_id = ?",
        )
        .bind(user_id)
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;

        review
            .map(|r| r.status_at(now))
            .ok_or_else(|| TrackerError::not_found("review schedule"))
    }

    pub async fn delete(&self, user_id: &str, review_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM review_schedules WHERE id = ? AND user_id = ?")
            .bind(review_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TrackerError::not_found("review"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "review_tests.rs"]
mod tests;
