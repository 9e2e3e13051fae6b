use crate::db::Db;
use crate::error::Result;
use crate::feedback::{FeedbackGenerator, FeedbackStore};
use crate::ledger::Ledger;
use crate::review::{ReviewScheduler, TriggerOutcome};
use crate::rules::{self, Diagnosis};
use crate::stats::StatsAggregator;
use crate::weakness::WeaknessStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Stats, rules, weakness upserts and feedback for one topic.
#[derive(Clone)]
pub struct Analyzer {
    stats: StatsAggregator,
    weaknesses: WeaknessStore,
    reviews: ReviewScheduler,
    feedback: FeedbackStore,
}

impl Analyzer {
    pub fn new(db: &Db) -> Self {
        let weaknesses = WeaknessStore::new(db);
        Self {
            stats: StatsAggregator::new(Ledger::new(db)),
            reviews: ReviewScheduler::new(db, weaknesses.clone()),
            weaknesses,
            feedback: FeedbackStore::new(db),
        }
    }

    /// Re-derives weaknesses for the topic from its full history. Safe to
    /// repeat: each diagnosis lands on the same weakness row.
    pub async fn analyze_topic(
        &self,
        user_id: &str,
        topic: &str,
        submission_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Diagnosis>> {
        let Some(stats) = self.stats.aggregate(user_id, topic).await? else {
            return Ok(Vec::new());
        };

        let diagnoses = rules::evaluate(&stats);
        for diagnosis in &diagnoses {
            let outcome = self.weaknesses.upsert(user_id, topic, diagnosis, &stats, now).await?;
            if outcome.created {
                log::info!(
                    "new {} weakness on {}/{}: {}",
                    diagnosis.severity,
                    user_id,
                    topic,
                    diagnosis.root_cause
                );
            }
        }

        if let Some(submission_id) = submission_id {
            let fired = FeedbackGenerator::for_diagnoses(&diagnoses, &stats);
            if !fired.is_empty() {
                self.feedback.record(user_id, submission_id, &fired, now).await?;
            }
        }

        Ok(diagnoses)
    }

    pub async fn schedule_review(&self, user_id: &str, topic: &str, accuracy: f64, now: DateTime<Utc>) -> Result<TriggerOutcome> {
        self.reviews.trigger(user_id, topic, accuracy, now).await
    }

    async fn run(&self, job: AnalysisJob) -> Result<()> {
        let now = Utc::now();
        match job {
            AnalysisJob::SubmissionRecorded {
                user_id,
                topic,
                submission_id,
                accuracy,
            } => {
                self.analyze_topic(&user_id, &topic, Some(&submission_id), now).await?;
                let outcome = self.schedule_review(&user_id, &topic, accuracy, now).await?;
                log_trigger(&user_id, &topic, outcome);
            }
            AnalysisJob::Analyze { user_id, topic } => {
                self.analyze_topic(&user_id, &topic, None, now).await?;
            }
            AnalysisJob::ScheduleReview { user_id, topic, accuracy } => {
                let outcome = self.schedule_review(&user_id, &topic, accuracy, now).await?;
                log_trigger(&user_id, &topic, outcome);
            }
            AnalysisJob::Flush(_) => {}
        }
        Ok(())
    }
}

fn log_trigger(user_id: &str, topic: &str, outcome: TriggerOutcome) {
    if let TriggerOutcome::Rescheduled { interval_days } = outcome {
        log::debug!("rescheduled review {}/{} in {} days", user_id, topic, interval_days);
    }
}

#[derive(Debug)]
pub enum AnalysisJob {
    /// Full pipeline after a new submission: analysis, feedback, review trigger.
    SubmissionRecorded {
        user_id: String,
        topic: String,
        submission_id: String,
        accuracy: f64,
    },
    Analyze {
        user_id: String,
        topic: String,
    },
    ScheduleReview {
        user_id: String,
        topic: String,
        accuracy: f64,
    },
    /// Answered once every job queued before it has been handled.
    Flush(oneshot::Sender<()>),
}

impl AnalysisJob {
    fn describe(&self) -> String {
        match self {
            AnalysisJob::SubmissionRecorded { user_id, topic, .. } => format!("submission {}/{}", user_id, topic),
            AnalysisJob::Analyze { user_id, topic } => format!("analyze {}/{}", user_id, topic),
            AnalysisJob::ScheduleReview { user_id, topic, .. } => format!("review {}/{}", user_id, topic),
            AnalysisJob::Flush(_) => "flush".to_string(),
        }
    }
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Bounded FIFO of analysis jobs drained by a single worker task.
///
/// Failures are logged and counted, never retried: the next event for the
/// topic recomputes everything from the submission log.
#[derive(Clone)]
pub struct AnalysisQueue {
    tx: mpsc::Sender<AnalysisJob>,
    counters: Arc<Counters>,
}

impl AnalysisQueue {
    pub fn spawn(analyzer: Analyzer, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(run_worker(analyzer, rx, counters.clone()));
        (Self { tx, counters }, handle)
    }

    /// Never waits. Returns false if the job was dropped.
    pub fn enqueue(&self, job: AnalysisJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                log::warn!("analysis queue full, dropping {}", job.describe());
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(job)) => {
                log::warn!("analysis worker stopped, dropping {}", job.describe());
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Waits until every job enqueued before this call has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AnalysisJob::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(analyzer: Analyzer, mut rx: mpsc::Receiver<AnalysisJob>, counters: Arc<Counters>) {
    log::debug!("analysis worker started");
    while let Some(job) = rx.recv().await {
        if let AnalysisJob::Flush(done) = job {
            let _ = done.send(());
            continue;
        }

        let label = job.describe();
        match analyzer.run(job).await {
            Ok(()) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                log::error!("analysis job {} failed: {}", label, e);
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    log::info!("analysis worker stopped");
}

#[cfg(test)]
#[path = "analysis_tests.rs"]
mod tests;
