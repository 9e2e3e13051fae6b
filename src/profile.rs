use crate::db::Db;
use crate::error::Result;
use crate::models::Submission;
use crate::stats::percent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeMap;

/// Proficiency at or above this marks a topic as mastered.
pub const MASTERY_THRESHOLD: i64 = 85;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicProgress {
    pub total_attempts: i64,
    pub correct_attempts: i64,
    pub proficiency: i64,
    pub mastered: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl TopicProgress {
    pub fn record(&mut self, correct: bool, at: DateTime<Utc>) {
        self.total_attempts += 1;
        if correct {
            self.correct_attempts += 1;
        }
        if self.last_attempt_at.map_or(true, |prev| at > prev) {
            self.last_attempt_at = Some(at);
        }
        self.refresh();
    }

    /// Compensates for a deleted submission. Counters never go below zero.
    pub fn retract(&mut self, correct: bool) {
        self.total_attempts = (self.total_attempts - 1).max(0);
        if correct {
            self.correct_attempts = (self.correct_attempts - 1).max(0);
        }
        self.correct_attempts = self.correct_attempts.min(self.total_attempts);
        self.refresh();
    }

    fn refresh(&mut self) {
        if self.total_attempts == 0 {
            self.proficiency = 0;
            self.mastered = false;
            return;
        }
        self.proficiency = percent(self.correct_attempts, self.total_attempts);
        self.mastered = self.proficiency >= MASTERY_THRESHOLD;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_problems: i64,
    pub correct_count: i64,
    pub avg_accuracy: i64,
}

impl GlobalStats {
    /// Derives the accuracy from the raw counters, so a stale stored value never leaks out.
    pub fn from_counts(total_problems: i64, correct_count: i64) -> Self {
        let total_problems = total_problems.max(0);
        let correct_count = correct_count.clamp(0, total_problems);
        GlobalStats {
            total_problems,
            correct_count,
            avg_accuracy: percent(correct_count, total_problems),
        }
    }

    pub fn record(&mut self, correct: bool) {
        *self = Self::from_counts(self.total_problems + 1, self.correct_count + correct as i64);
    }

    pub fn retract(&mut self, correct: bool) {
        *self = Self::from_counts(self.total_problems - 1, self.correct_count - correct as i64);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub topic_graph: BTreeMap<String, TopicProgress>,
    pub global_stats: GlobalStats,
}

impl UserProfile {
    /// Recomputes every running total from the submission log.
    pub fn rebuild(user_id: &str, submissions: &[Submission]) -> Self {
        let mut profile = UserProfile {
            user_id: user_id.to_string(),
            ..Default::default()
        };
        for sub in submissions {
            profile
                .topic_graph
                .entry(sub.topic.clone())
                .or_default()
                .record(sub.correct, sub.timestamp);
            profile.global_stats.record(sub.correct);
        }
        profile
    }
}

fn topic_progress_from_row(row: &SqliteRow) -> std::result::Result<(String, TopicProgress), sqlx::Error> {
    let topic: String = row.try_get("topic")?;
    let progress = TopicProgress {
        total_attempts: row.try_get("total_attempts")?,
        correct_attempts: row.try_get("correct_attempts")?,
        proficiency: row.try_get("proficiency")?,
        mastered: row.try_get("mastered")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
    };
    Ok((topic, progress))
}

/// Denormalized running totals kept next to the submission log.
///
/// Every write goes through a caller-owned transaction so the event and the
/// aggregate land together; callers also hold the per-user lock.
#[derive(Clone)]
pub struct ProfileStore {
    pool: SqlitePool,
}

impl ProfileStore {
    pub fn new(db: &Db) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn load(&self, user_id: &str) -> Result<UserProfile> {
        let mut conn = self.pool.acquire().await?;
        Self::load_in(&mut conn, user_id).await
    }

    pub async fn load_in(conn: &mut SqliteConnection, user_id: &str) -> Result<UserProfile> {
        let rows = sqlx::query("SELECT * FROM topic_progress WHERE user_id = ? ORDER BY topic")
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;

        let mut topic_graph = BTreeMap::new();
        for row in &rows {
            let (topic, progress) = topic_progress_from_row(row)?;
            topic_graph.insert(topic, progress);
        }

        let global_stats = Self::global_in(conn, user_id).await?;

        Ok(UserProfile {
            user_id: user_id.to_string(),
            topic_graph,
            global_stats,
        })
    }

    async fn topic_in(conn: &mut SqliteConnection, user_id: &str, topic: &str) -> Result<TopicProgress> {
        let row = sqlx::query("SELECT * FROM topic_progress WHERE user_id = ? AND topic = ?")
            .bind(user_id)
            .bind(topic)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(topic_progress_from_row(&row)?.1),
            None => Ok(TopicProgress::default()),
        }
    }

    async fn global_in(conn: &mut SqliteConnection, user_id: &str) -> Result<GlobalStats> {
        let row = sqlx::query("SELECT total_problems, correct_count FROM global_stats WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(GlobalStats::from_counts(
                row.try_get("total_problems")?,
                row.try_get("correct_count")?,
            )),
            None => Ok(GlobalStats::default()),
        }
    }

    async fn save_topic_in(
        conn: &mut SqliteConnection,
        user_id: &str,
        topic: &str,
        progress: &TopicProgress,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO topic_progress (user_id, topic, total_attempts, correct_attempts, proficiency, mastered, last_attempt_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, topic) DO UPDATE SET
                total_attempts = excluded.total_attempts,
                correct_attempts = excluded.correct_attempts,
                proficiency = excluded.proficiency,
                mastered = excluded.mastered,
                last_attempt_at = excluded.last_attempt_at
            "#,
        )
        .bind(user_id)
        .bind(topic)
        .bind(progress.total_attempts)
        .bind(progress.correct_attempts)
        .bind(progress.proficiency)
        .bind(progress.mastered)
        .bind(progress.last_attempt_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn save_global_in(conn: &mut SqliteConnection, user_id: &str, stats: &GlobalStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO global_stats (user_id, total_problems, correct_count, avg_accuracy)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                total_problems = excluded.total_problems,
                correct_count = excluded.correct_count,
                avg_accuracy = excluded.avg_accuracy
            "#,
        )
        .bind(user_id)
        .bind(stats.total_problems)
        .bind(stats.correct_count)
        .bind(stats.avg_accuracy)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Applies a new submission to the topic and global counters.
    pub async fn record_in(conn: &mut SqliteConnection, sub: &Submission) -> Result<(TopicProgress, GlobalStats)> {
        let mut topic = Self::topic_in(conn, &sub.user_id, &sub.topic).await?;
        topic.record(sub.correct, sub.timestamp);
        Self::save_topic_in(conn, &sub.user_id, &sub.topic, &topic).await?;

        let mut global = Self::global_in(conn, &sub.user_id).await?;
        global.record(sub.correct);
        Self::save_global_in(conn, &sub.user_id, &global).await?;

        Ok((topic, global))
    }

    /// Reverses `record_in` for a deleted submission. A topic left with no
    /// attempts loses its row, matching what `UserProfile::rebuild` produces.
    pub async fn retract_in(conn: &mut SqliteConnection, sub: &Submission) -> Result<(TopicProgress, GlobalStats)> {
        let mut topic = Self::topic_in(conn, &sub.user_id, &sub.topic).await?;
        topic.retract(sub.correct);
        if topic.total_attempts == 0 {
            sqlx::query("DELETE FROM topic_progress WHERE user_id = ? AND topic = ?")
                .bind(&sub.user_id)
                .bind(&sub.topic)
                .execute(&mut *conn)
                .await?;
        } else {
            Self::save_topic_in(conn, &sub.user_id, &sub.topic, &topic).await?;
        }

        let mut global = Self::global_in(conn, &sub.user_id).await?;
        global.retract(sub.correct);
        Self::save_global_in(conn, &sub.user_id, &global).await?;

        Ok((topic, global))
    }

    /// Overwrites every stored total for the user with `profile`.
    pub async fn replace_in(conn: &mut SqliteConnection, profile: &UserProfile) -> Result<()> {
        sqlx::query("DELETE FROM topic_progress WHERE user_id = ?")
            .bind(&profile.user_id)
            .execute(&mut *conn)
            .await?;

        for (topic, progress) in &profile.topic_graph {
            Self::save_topic_in(conn, &profile.user_id, topic, progress).await?;
        }
        Self::save_global_in(conn, &profile.user_id, &profile.global_stats).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "profile_tests.rs"]
mod tests;
