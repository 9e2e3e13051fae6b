use crate::error::Result;
use crate::ledger::Ledger;
use crate::models::{Difficulty, Submission};
use serde::{Deserialize, Serialize};

/// Below this many attempts a topic is not analysed at all.
pub const MIN_SAMPLE_SIZE: usize = 3;

/// Rounded percentage of `part` in `whole`, clamped to [0, 100]. Zero when `whole` is zero.
pub fn percent(part: i64, whole: i64) -> i64 {
    if whole <= 0 {
        return 0;
    }
    let value = (part as f64 / whole as f64 * 100.0).round() as i64;
    value.clamp(0, 100)
}

/// Snapshot of a user's history on one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStats {
    pub topic_id: String,
    pub attempts: i64,
    /// Percentage, 0..=100.
    pub accuracy: i64,
    /// Seconds.
    pub avg_time: i64,
    pub easy_wrong: i64,
}

impl TopicStats {
    pub fn from_submissions(topic_id: &str, submissions: &[Submission]) -> Option<TopicStats> {
        if submissions.len() < MIN_SAMPLE_SIZE {
            return None;
        }

        let mut correct = 0i64;
        let mut total_time = 0.0f64;
        let mut easy_wrong = 0i64;

        for sub in submissions {
            if sub.correct {
                correct += 1;
            } else if sub.difficulty == Difficulty::Easy {
                easy_wrong += 1;
            }
            total_time += sub.time_taken_seconds.max(0.0);
        }

        let attempts = submissions.len() as i64;

        Some(TopicStats {
            topic_id: topic_id.to_string(),
            attempts,
            accuracy: percent(correct, attempts),
            avg_time: (total_time / attempts as f64).round() as i64,
            easy_wrong,
        })
    }
}

#[derive(Clone)]
pub struct StatsAggregator {
    ledger: Ledger,
}

impl StatsAggregator {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// `Ok(None)` means the sample is too small, which is not an error.
    pub async fn aggregate(&self, user_id: &str, topic: &str) -> Result<Option<TopicStats>> {
        let submissions = self.ledger.for_topic(user_id, topic).await?;
        let stats = TopicStats::from_submissions(topic, &submissions);
        if stats.is_none() {
            log::debug!(
                "skipping stats for {}/{}: {} submissions",
                user_id,
                topic,
                submissions.len()
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
