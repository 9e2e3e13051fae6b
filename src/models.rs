use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(ParseEnumError::new("difficulty", s)),
        }
    }
}

/// Why a topic was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RootCause {
    LowAccuracy,
    SlowSpeed,
    Inconsistency,
    /// Reserved. No rule produces it yet.
    PrerequisiteGap,
}

impl RootCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootCause::LowAccuracy => "lowAccuracy",
            RootCause::SlowSpeed => "slowSpeed",
            RootCause::Inconsistency => "inconsistency",
            RootCause::PrerequisiteGap => "prerequisiteGap",
        }
    }
}

impl FromStr for RootCause {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowAccuracy" => Ok(RootCause::LowAccuracy),
            "slowSpeed" => Ok(RootCause::SlowSpeed),
            "inconsistency" => Ok(RootCause::Inconsistency),
            "prerequisiteGap" => Ok(RootCause::PrerequisiteGap),
            _ => Err(ParseEnumError::new("root cause", s)),
        }
    }
}

impl fmt::Display for RootCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared lowest first so the derived `Ord` ranks critical > high > medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical weaknesses are the ones that earn a review schedule.
    pub fn is_severe(&self) -> bool {
        *self >= Severity::High
    }
}

impl FromStr for Severity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(ParseEnumError::new("severity", s)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Scheduled,
    Overdue,
    Mastered,
    Abandoned,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Scheduled => "scheduled",
            ReviewStatus::Overdue => "overdue",
            ReviewStatus::Mastered => "mastered",
            ReviewStatus::Abandoned => "abandoned",
        }
    }
}

impl FromStr for ReviewStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ReviewStatus::Scheduled),
            "overdue" => Ok(ReviewStatus::Overdue),
            "mastered" => Ok(ReviewStatus::Mastered),
            "abandoned" => Ok(ReviewStatus::Abandoned),
            _ => Err(ParseEnumError::new("review status", s)),
        }
    }
}

/// Topics are compared case-insensitively and without surrounding whitespace.
pub fn normalize_topic(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub(crate) fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: ParseEnumError| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

pub(crate) fn json_column<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: serde::de::DeserializeOwned,
{
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// One practice attempt. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub problem_id: String,
    pub correct: bool,
    pub time_taken_seconds: f64,
    pub attempt_number: i64,
    pub is_retry: bool,
    pub timestamp: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for Submission {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Submission {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            topic: row.try_get("topic")?,
            difficulty: parse_column(row, "difficulty")?,
            problem_id: row.try_get("problem_id")?,
            correct: row.try_get("correct")?,
            time_taken_seconds: row.try_get("time_taken_seconds").unwrap_or(0.0),
            attempt_number: row.try_get("attempt_number").unwrap_or(1),
            is_retry: row.try_get("is_retry").unwrap_or(false),
            timestamp: row.try_get("submitted_at")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub recent_accuracy: i64,
    pub recent_speed: i64,
    pub sample_size: i64,
}

/// Spaced-repetition bookkeeping carried on each weakness.
/// `ease_factor` is stored but no interval formula reads it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpacedState {
    pub review_count: i64,
    pub interval: i64,
    pub ease_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weakness {
    pub id: String,
    pub user_id: String,
    pub topic_id: String,
    pub root_cause: RootCause,
    pub severity: Severity,
    pub evidence: Evidence,
    pub review_due_at: DateTime<Utc>,
    pub spaced: SpacedState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for Weakness {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Weakness {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            topic_id: row.try_get("topic_id")?,
            root_cause: parse_column(row, "root_cause")?,
            severity: parse_column(row, "severity")?,
            evidence: Evidence {
                recent_accuracy: row.try_get("recent_accuracy")?,
                recent_speed: row.try_get("recent_speed")?,
                sample_size: row.try_get("sample_size")?,
            },
            review_due_at: row.try_get("review_due_at")?,
            spaced: SpacedState {
                review_count: row.try_get("review_count").unwrap_or(0),
                interval: row.try_get("interval_days").unwrap_or(3),
                ease_factor: row.try_get("ease_factor").unwrap_or(2.5),
            },
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// A completed review, appended to the schedule's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEntry {
    pub reviewed_at: DateTime<Utc>,
    pub accuracy: f64,
    pub interval_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSchedule {
    pub id: String,
    pub user_id: String,
    pub topic_id: String,
    pub next_review_at: DateTime<Utc>,
    pub review_count: i64,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub status: ReviewStatus,
    pub reviews: Vec<ReviewEntry>,
}

impl ReviewSchedule {
    /// Status is advisory: a scheduled review whose date has passed reads as overdue.
    pub fn status_at(mut self, now: DateTime<Utc>) -> Self {
        if self.status == ReviewStatus::Scheduled && self.next_review_at < now {
            self.status = ReviewStatus::Overdue;
        }
        self
    }
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for ReviewSchedule {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ReviewSchedule {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            topic_id: row.try_get("topic_id")?,
            next_review_at: row.try_get("next_review_at")?,
            review_count: row.try_get("review_count").unwrap_or(0),
            last_reviewed_at: row.try_get("last_reviewed_at")?,
            status: parse_column(row, "status")?,
            reviews: json_column(row, "history")?,
        })
    }
}
