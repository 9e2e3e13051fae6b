use crate::db::Db;
use crate::error::{Result, TrackerError};
use crate::models::{json_column, RootCause, Severity};
use crate::rules::{self, Diagnosis};
use crate::stats::TopicStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{FromRow, Row, SqliteConnection};

/// One fired rule, explained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFeedback {
    pub rule_id: String,
    pub root_cause: RootCause,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: String,
    pub user_id: String,
    pub submission_id: String,
    pub rules_fired: Vec<RuleFeedback>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Feedback {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Feedback {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            submission_id: row.try_get("submission_id")?,
            rules_fired: json_column(row, "rules_fired")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

pub struct FeedbackGenerator;

impl FeedbackGenerator {
    /// Turns diagnoses into readable feedback. Diagnoses that no rule
    /// produces, and reserved causes, are skipped.
    pub fn for_diagnoses(diagnoses: &[Diagnosis], stats: &TopicStats) -> Vec<RuleFeedback> {
        diagnoses
            .iter()
            .filter_map(|d| {
                let rule = rules::rule_for(d.root_cause)?;
                let (message, suggestion) = Self::explain(d.root_cause, stats)?;
                Some(RuleFeedback {
                    rule_id: rule.id.to_string(),
                    root_cause: d.root_cause,
                    severity: d.severity,
                    message,
                    suggestion,
                })
            })
            .collect()
    }

    /// Message and suggestion for a cause. Reserved causes have none.
    fn explain(root_cause: RootCause, stats: &TopicStats) -> Option<(String, String)> {
        let topic = &stats.topic_id;
        let text = match root_cause {
            RootCause::LowAccuracy => (
                format!(
                    "Accuracy on {} is {}% and {} easy problem(s) were missed.",
                    topic, stats.accuracy, stats.easy_wrong
                ),
                format!("Go back over the basics of {} and redo the easy problems you missed.", topic),
            ),
            RootCause::SlowSpeed => (
                format!("You spend {}s per problem on {} on average.", stats.avg_time, topic),
                format!("Practice timed sets on {} to get faster at spotting the pattern.", topic),
            ),
            RootCause::Inconsistency => (
                format!(
                    "Accuracy on {} is only {}% over {} attempts.",
                    topic, stats.accuracy, stats.attempts
                ),
                format!("Review your past mistakes on {} before trying new problems.", topic),
            ),
            RootCause::PrerequisiteGap => return None,
        };
        Some(text)
    }
}

/// At most one feedback record per submission.
#[derive(Clone)]
pub struct FeedbackStore {
    pool: SqlitePool,
}

impl FeedbackStore {
    pub fn new(db: &Db) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Re-running analysis for the same submission replaces the fired rules.
    pub async fn record(
        &self,
        user_id: &str,
        submission_id: &str,
        rules_fired: &[RuleFeedback],
        now: DateTime<Utc>,
    ) -> Result<Feedback> {
        let rules_json = serde_json::to_string(rules_fired)?;
        let feedback = sqlx::query_as::<_, Feedback>(
            r#"
            INSERT INTO feedback (id, user_id, submission_id, rules_fired, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id, submission_id) DO UPDATE SET rules_fired = excluded.rules_fired
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(submission_id)
        .bind(rules_json)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        log::debug!(
            "recorded {} rule(s) for submission {}",
            feedback.rules_fired.len(),
            submission_id
        );
        Ok(feedback)
    }

    /// Newest first.
    pub async fn for_user(&self, user_id: &str) -> Result<Vec<Feedback>> {
        let rows = sqlx::query_as::<_, Feedback>("SELECT * FROM feedback WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn for_submission(&self, user_id: &str, submission_id: &str) -> Result<Feedback> {
        sqlx::query_as::<_, Feedback>("SELECT * FROM feedback WHERE user_id = ? AND submission_id = ?")
            .bind(user_id)
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| TrackerError::not_found("feedback"))
    }

    pub async fn delete_for_submission_in(conn: &mut SqliteConnection, user_id: &str, submission_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM feedback WHERE user_id = ? AND submission_id = ?")
            .bind(user_id)
            .bind(submission_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[path = "feedback_tests.rs"]
mod tests;
