use crate::db::Db;
use crate::error::{Result, TrackerError};
use crate::models::{normalize_topic, Difficulty, Submission};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 200;

/// Raw submission request. Every field is optional so that missing values
/// surface as validation errors instead of deserialization failures.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubmission {
    pub topic: Option<String>,
    pub difficulty: Option<String>,
    pub problem_id: Option<String>,
    pub correct: Option<bool>,
    pub time_taken_seconds: Option<f64>,
    pub attempt_number: Option<i64>,
}

impl NewSubmission {
    pub fn into_submission(self, user_id: &str, now: DateTime<Utc>) -> Result<Submission> {
        let topic = self
            .topic
            .as_deref()
            .map(normalize_topic)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TrackerError::validation("topic is required"))?;

        let problem_id = self
            .problem_id
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| TrackerError::validation("problemId is required"))?;

        let difficulty: Difficulty = match self.difficulty.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw
                .parse::<Difficulty>()
                .map_err(|e| TrackerError::validation(e.to_string()))?,
            _ => return Err(TrackerError::validation("difficulty is required")),
        };

        let correct = self
            .correct
            .ok_or_else(|| TrackerError::validation("correct is required"))?;

        let time_taken_seconds = self.time_taken_seconds.unwrap_or(0.0);
        if !time_taken_seconds.is_finite() || time_taken_seconds < 0.0 {
            return Err(TrackerError::validation("timeTakenSeconds must be a non-negative number"));
        }

        let attempt_number = self.attempt_number.unwrap_or(1);
        if attempt_number < 1 {
            return Err(TrackerError::validation("attemptNumber must be at least 1"));
        }

        Ok(Submission {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            topic,
            difficulty,
            problem_id,
            correct,
            time_taken_seconds,
            attempt_number,
            is_retry: attempt_number > 1,
            timestamp: now,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionFilter {
    pub topic: Option<String>,
    pub difficulty: Option<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

/// Per-difficulty summary of a user's submissions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyStats {
    pub difficulty: Difficulty,
    pub total_submissions: i64,
    pub correct_submissions: i64,
    /// Seconds, rounded to two decimals.
    pub avg_time: f64,
}

/// Append-only log of submissions.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn new(db: &Db) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn insert(conn: &mut SqliteConnection, sub: &Submission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO submissions
                (id, user_id, topic, difficulty, problem_id, correct, time_taken_seconds, attempt_number, is_retry, submitted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sub.id)
        .bind(&sub.user_id)
        .bind(&sub.topic)
        .bind(sub.difficulty.as_str())
        .bind(&sub.problem_id)
        .bind(sub.correct)
        .bind(sub.time_taken_seconds)
        .bind(sub.attempt_number)
        .bind(sub.is_retry)
        .bind(sub.timestamp)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Removes a submission owned by `user_id` and hands it back so the
    /// caller can apply compensating decrements.
    ///
    /// Must stay a single write: as the first statement of a WAL transaction
    /// it takes the write lock before any read snapshot exists.
    pub async fn remove(conn: &mut SqliteConnection, user_id: &str, id: &str) -> Result<Option<Submission>> {
        let removed = sqlx::query_as::<_, Submission>("DELETE FROM submissions WHERE id = ? AND user_id = ? RETURNING *")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(removed)
    }

    pub async fn all_in(conn: &mut SqliteConnection, user_id: &str) -> Result<Vec<Submission>> {
        let subs = sqlx::query_as::<_, Submission>(
            "SELECT * FROM submissions WHERE user_id = ? ORDER BY submitted_at ASC",
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(subs)
    }

    pub async fn for_topic(&self, user_id: &str, topic: &str) -> Result<Vec<Submission>> {
        let subs = sqlx::query_as::<_, Submission>(
            "SELECT * FROM submissions WHERE user_id = ? AND topic = ? ORDER BY submitted_at DESC",
        )
        .bind(user_id)
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    pub async fn get(&self, user_id: &str, id: &str) -> Result<Option<Submission>> {
        let sub = sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sub)
    }

    /// Newest first.
    pub async fn list(&self, user_id: &str, filter: &SubmissionFilter) -> Result<Vec<Submission>> {
        let topic = filter.topic.as_deref().map(normalize_topic).filter(|t| !t.is_empty());
        let difficulty = match filter.difficulty.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                raw.parse::<Difficulty>()
                    .map_err(|e| TrackerError::validation(e.to_string()))?,
            ),
            _ => None,
        };
        let limit = filter.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        let skip = filter.skip.unwrap_or(0).max(0);

        let subs = sqlx::query_as::<_, Submission>(
            r#"
            SELECT * FROM submissions
            WHERE user_id = ?
                AND (? IS NULL OR topic = ?)
                AND (? IS NULL OR difficulty = ?)
            ORDER BY submitted_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(topic.as_deref())
        .bind(topic.as_deref())
        .bind(difficulty.map(|d| d.as_str()))
        .bind(difficulty.map(|d| d.as_str()))
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    pub async fn recent(&self, user_id: &str, limit: i64) -> Result<Vec<Submission>> {
        let subs = sqlx::query_as::<_, Submission>(
            "SELECT * FROM submissions WHERE user_id = ? ORDER BY submitted_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    pub async fn stats_by_difficulty(&self, user_id: &str) -> Result<Vec<DifficultyStats>> {
        let rows = sqlx::query(
            r#"
            SELECT
                difficulty,
                COUNT(*) AS total_submissions,
                SUM(CASE WHEN correct THEN 1 ELSE 0 END) AS correct_submissions,
                AVG(time_taken_seconds) AS avg_time
            FROM submissions
            WHERE user_id = ?
            GROUP BY difficulty
            ORDER BY CASE difficulty WHEN 'easy' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(difficulty_stats_from_row).collect()
    }
}

fn difficulty_stats_from_row(row: &SqliteRow) -> Result<DifficultyStats> {
    let avg_time: f64 = row.try_get("avg_time").unwrap_or(0.0);
    Ok(DifficultyStats {
        difficulty: crate::models::parse_column(row, "difficulty")?,
        total_submissions: row.try_get("total_submissions")?,
        correct_submissions: row.try_get("correct_submissions").unwrap_or(0),
        avg_time: (avg_time * 100.0).round() / 100.0,
    })
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
