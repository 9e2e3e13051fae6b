use crate::analysis::{AnalysisJob, AnalysisQueue, Analyzer, QueueStats};
use crate::db::Db;
use crate::error::{Result, TrackerError};
use crate::feedback::{Feedback, FeedbackStore};
use crate::ledger::{DifficultyStats, Ledger, NewSubmission, SubmissionFilter};
use crate::locks::UserLocks;
use crate::models::{normalize_topic, ReviewSchedule, Submission, Weakness};
use crate::profile::{GlobalStats, ProfileStore, TopicProgress, UserProfile};
use crate::review::{self, ReviewScheduler};
use crate::rules::Diagnosis;
use crate::weakness::WeaknessStore;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::task::JoinHandle;

const DASHBOARD_RECENT: i64 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub submission_id: String,
    pub topic_stats: TopicProgress,
    pub global_stats: GlobalStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub topic_stats: BTreeMap<String, TopicProgress>,
    pub global_stats: GlobalStats,
    pub weaknesses: Vec<Weakness>,
    pub recent_submissions: Vec<Submission>,
}

fn check_user(user_id: &str) -> Result<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(TrackerError::Unauthorized);
    }
    Ok(user_id)
}

fn check_topic(topic: &str) -> Result<String> {
    let topic = normalize_topic(topic);
    if topic.is_empty() {
        return Err(TrackerError::validation("topic is required"));
    }
    Ok(topic)
}

/// Every tracker operation, independent of transport. All calls are scoped
/// to the given user.
pub struct TrackerService {
    db: Db,
    ledger: Ledger,
    profiles: ProfileStore,
    analyzer: Analyzer,
    weaknesses: WeaknessStore,
    reviews: ReviewScheduler,
    feedback: FeedbackStore,
    queue: AnalysisQueue,
    locks: UserLocks,
}

impl TrackerService {
    /// Builds the service and spawns its analysis worker.
    pub fn start(db: Db, queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let analyzer = Analyzer::new(&db);
        let (queue, worker) = AnalysisQueue::spawn(analyzer.clone(), queue_capacity);
        let weaknesses = WeaknessStore::new(&db);

        let service = Self {
            ledger: Ledger::new(&db),
            profiles: ProfileStore::new(&db),
            analyzer,
            reviews: ReviewScheduler::new(&db, weaknesses.clone()),
            weaknesses,
            feedback: FeedbackStore::new(&db),
            queue,
            locks: UserLocks::new(),
            db,
        };
        (service, worker)
    }

    /// Stores the submission and its running totals together, then queues
    /// analysis. Analysis failures never reach the caller.
    pub async fn record_submission(&self, user_id: &str, req: NewSubmission) -> Result<SubmissionReceipt> {
        let user_id = check_user(user_id)?;
        let sub = req.into_submission(user_id, Utc::now())?;

        let (topic_stats, global_stats) = {
            let _guard = self.locks.acquire(user_id).await;
            let mut tx = self.db.pool().begin().await?;
            Ledger::insert(&mut tx, &sub).await?;
            let totals = ProfileStore::record_in(&mut tx, &sub).await?;
            tx.commit().await?;
            totals
        };

        log::info!(
            "recorded submission {} for {} on {} (correct: {})",
            sub.id,
            user_id,
            sub.topic,
            sub.correct
        );

        self.queue.enqueue(AnalysisJob::SubmissionRecorded {
            user_id: user_id.to_string(),
            topic: sub.topic.clone(),
            submission_id: sub.id.clone(),
            accuracy: if sub.correct { 1.0 } else { 0.0 },
        });

        Ok(SubmissionReceipt {
            submission_id: sub.id,
            topic_stats,
            global_stats,
        })
    }

    /// Removes the submission, its feedback and its share of the running totals.
    pub async fn delete_submission(&self, user_id: &str, id: &str) -> Result<()> {
        let user_id = check_user(user_id)?;

        let removed = {
            let _guard = self.locks.acquire(user_id).await;
            let mut tx = self.db.pool().begin().await?;
            let removed = Ledger::remove(&mut tx, user_id, id)
                .await?
                .ok_or_else(|| TrackerError::not_found("submission"))?;
            ProfileStore::retract_in(&mut tx, &removed).await?;
            FeedbackStore::delete_for_submission_in(&mut tx, user_id, id).await?;
            tx.commit().await?;
            removed
        };

        log::info!("deleted submission {} for {}", id, user_id);
        self.queue.enqueue(AnalysisJob::Analyze {
            user_id: user_id.to_string(),
            topic: removed.topic,
        });
        Ok(())
    }

    pub async fn list_submissions(&self, user_id: &str, filter: &SubmissionFilter) -> Result<Vec<Submission>> {
        let user_id = check_user(user_id)?;
        self.ledger.list(user_id, filter).await
    }

    pub async fn get_submission(&self, user_id: &str, id: &str) -> Result<Submission> {
        let user_id = check_user(user_id)?;
        self.ledger
            .get(user_id, id)
            .await?
            .ok_or_else(|| TrackerError::not_found("submission"))
    }

    pub async fn submission_stats(&self, user_id: &str) -> Result<Vec<DifficultyStats>> {
        let user_id = check_user(user_id)?;
        self.ledger.stats_by_difficulty(user_id).await
    }

    /// Queues a re-analysis of the topic.
    pub fn analyze_topic(&self, user_id: &str, topic: &str) -> Result<()> {
        let user_id = check_user(user_id)?;
        let topic = check_topic(topic)?;
        self.queue.enqueue(AnalysisJob::Analyze {
            user_id: user_id.to_string(),
            topic,
        });
        Ok(())
    }

    /// Analyses the topic inline and returns what fired.
    pub async fn run_analysis(&self, user_id: &str, topic: &str) -> Result<Vec<Diagnosis>> {
        let user_id = check_user(user_id)?;
        let topic = check_topic(topic)?;
        self.analyzer.analyze_topic(user_id, &topic, None, Utc::now()).await
    }

    pub async fn get_weaknesses(&self, user_id: &str) -> Result<Vec<Weakness>> {
        let user_id = check_user(user_id)?;
        self.weaknesses.list(user_id).await
    }

    pub async fn get_topic_weaknesses(&self, user_id: &str, topic: &str) -> Result<Vec<Weakness>> {
        let user_id = check_user(user_id)?;
        let topic = check_topic(topic)?;
        self.weaknesses.list_for_topic(user_id, &topic).await
    }

    pub async fn delete_weakness(&self, user_id: &str, id: &str) -> Result<()> {
        let user_id = check_user(user_id)?;
        self.weaknesses.delete(user_id, id).await
    }

    pub async fn get_dashboard(&self, user_id: &str) -> Result<Dashboard> {
        let user_id = check_user(user_id)?;
        let profile = self.profiles.load(user_id).await?;
        let weaknesses = self.weaknesses.list(user_id).await?;
        let recent_submissions = self.ledger.recent(user_id, DASHBOARD_RECENT).await?;

        Ok(Dashboard {
            topic_stats: profile.topic_graph,
            global_stats: profile.global_stats,
            weaknesses,
            recent_submissions,
        })
    }

    /// Queues a review trigger. The accuracy is checked up front.
    pub fn schedule_review(&self, user_id: &str, topic: &str, accuracy: f64) -> Result<()> {
        let user_id = check_user(user_id)?;
        let topic = check_topic(topic)?;
        review::check_accuracy(accuracy)?;
        self.queue.enqueue(AnalysisJob::ScheduleReview {
            user_id: user_id.to_string(),
            topic,
            accuracy,
        });
        Ok(())
    }

    pub async fn complete_review(&self, user_id: &str, review_id: &str, accuracy: f64) -> Result<ReviewSchedule> {
        let user_id = check_user(user_id)?;
        self.reviews.complete(user_id, review_id, accuracy, Utc::now()).await
    }

    pub async fn list_reviews(&self, user_id: &str) -> Result<Vec<ReviewSchedule>> {
        let user_id = check_user(user_id)?;
        self.reviews.list(user_id, Utc::now()).await
    }

    pub async fn due_reviews(&self, user_id: &str) -> Result<Vec<ReviewSchedule>> {
        let user_id = check_user(user_id)?;
        self.reviews.due(user_id, Utc::now()).await
    }

    pub async fn topic_review(&self, user_id: &str, topic: &str) -> Result<ReviewSchedule> {
        let user_id = check_user(user_id)?;
        let topic = check_topic(topic)?;
        self.reviews.for_topic(user_id, &topic, Utc::now()).await
    }

    pub async fn delete_review(&self, user_id: &str, review_id: &str) -> Result<()> {
        let user_id = check_user(user_id)?;
        self.reviews.delete(user_id, review_id).await
    }

    pub async fn feedback_for_user(&self, user_id: &str) -> Result<Vec<Feedback>> {
        let user_id = check_user(user_id)?;
        self.feedback.for_user(user_id).await
    }

    pub async fn feedback_for_submission(&self, user_id: &str, submission_id: &str) -> Result<Feedback> {
        let user_id = check_user(user_id)?;
        self.feedback.for_submission(user_id, submission_id).await
    }

    /// Rebuilds the running totals from the submission log.
    pub async fn reconcile_profile(&self, user_id: &str) -> Result<UserProfile> {
        let user_id = check_user(user_id)?;
        let _guard = self.locks.acquire(user_id).await;

        // Only lock holders write this user's log and totals, so these reads
        // stay valid until the guard drops. The transaction below only writes.
        let (stored, submissions) = {
            let mut conn = self.db.pool().acquire().await?;
            let stored = ProfileStore::load_in(&mut conn, user_id).await?;
            let submissions = Ledger::all_in(&mut conn, user_id).await?;
            (stored, submissions)
        };
        let rebuilt = UserProfile::rebuild(user_id, &submissions);

        if stored != rebuilt {
            log::warn!(
                "running totals for {} drifted ({} stored vs {} logged), repairing",
                user_id,
                stored.global_stats.total_problems,
                rebuilt.global_stats.total_problems
            );
            let mut tx = self.db.pool().begin().await?;
            ProfileStore::replace_in(&mut tx, &rebuilt).await?;
            tx.commit().await?;
        }

        Ok(rebuilt)
    }

    /// Waits for every analysis job queued so far.
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
