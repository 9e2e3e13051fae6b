use super::*;
use crate::models::{RootCause, Severity};
use crate::rules::Diagnosis;
use crate::stats::TopicStats;
use crate::db::TempDb;
use chrono::Duration;

struct Fixture {
    weaknesses: WeaknessStore,
    scheduler: ReviewScheduler,
}

async fn fixture() -> Fixture {
    let db = Db::in_memory().await.unwrap();
    let weaknesses = WeaknessStore::new(&db);
    let scheduler = ReviewScheduler::new(&db, weaknesses.clone());
    Fixture { weaknesses, scheduler }
}

async fn flag(f: &Fixture, user: &str, topic: &str, severity: Severity) {
    let root_cause = match severity {
        Severity::Critical => RootCause::LowAccuracy,
        Severity::High => RootCause::SlowSpeed,
        Severity::Medium => RootCause::Inconsistency,
    };
    let stats = TopicStats {
        topic_id: topic.to_string(),
        attempts: 5,
        accuracy: 40,
        avg_time: 400,
        easy_wrong: 2,
    };
    f.weaknesses
        .upsert(user, topic, &Diagnosis { root_cause, severity }, &stats, Utc::now())
        .await
        .unwrap();
}

fn assert_days_from(at: DateTime<Utc>, now: DateTime<Utc>, days: i64) {
    let drift = at - (now + Duration::days(days));
    assert!(drift.num_milliseconds().abs() <= 1, "expected +{} days, off by {}", days, drift);
}

#[tokio::test]
async fn test_trigger_without_severe_weakness_is_noop() {
    let f = fixture().await;
    let now = Utc::now();

    assert_eq!(f.scheduler.trigger("u1", "arrays", 0.5, now).await.unwrap(), TriggerOutcome::Skipped);

    flag(&f, "u1", "arrays", Severity::Medium).await;
    assert_eq!(f.scheduler.trigger("u1", "arrays", 0.5, now).await.unwrap(), TriggerOutcome::Skipped);
    assert!(f.scheduler.list("u1", now).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_first_trigger_creates_schedule_for_tomorrow() {
    let f = fixture().await;
    flag(&f, "u1", "arrays", Severity::High).await;
    let now = Utc::now();

    assert_eq!(f.scheduler.trigger("u1", "arrays", 1.0, now).await.unwrap(), TriggerOutcome::Created);

    let review = f.scheduler.for_topic("u1", "arrays", now).await.unwrap();
    assert_eq!(review.review_count, 0);
    assert!(review.last_reviewed_at.is_none());
    assert_eq!(review.status, ReviewStatus::Scheduled);
    assert_days_from(review.next_review_at, now, 1);
}

#[tokio::test]
async fn test_retrigger_uses_trigger_table() {
    let f = fixture().await;
    flag(&f, "u1", "arrays", Severity::Critical).await;
    let now = Utc::now();
    f.scheduler.trigger("u1", "arrays", 0.0, now).await.unwrap();

    let cases = [(1.0, 3), (0.7, 2), (0.2, 1)];
    for (i, (accuracy, days)) in cases.iter().enumerate() {
        let outcome = f.scheduler.trigger("u1", "arrays", *accuracy, now).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::Rescheduled { interval_days: *days });

        let review = f.scheduler.for_topic("u1", "arrays", now).await.unwrap();
        assert_eq!(review.review_count, i as i64 + 1);
        assert_days_from(review.next_review_at, now, *days);
        assert!(review.last_reviewed_at.is_some());
    }

    assert_eq!(f.scheduler.list("u1", now).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_complete_review_intervals() {
    let f = fixture().await;
    flag(&f, "u1", "arrays", Severity::Critical).await;
    let now = Utc::now();
    f.scheduler.trigger("u1", "arrays", 0.0, now).await.unwrap();
    let id = f.scheduler.for_topic("u1", "arrays", now).await.unwrap().id;

    let done = f.scheduler.complete("u1", &id, 0.95, now).await.unwrap();
    assert_days_from(done.next_review_at, now, 7);
    assert_eq!(done.review_count, 1);
    assert_eq!(done.reviews.len(), 1);
    assert_eq!(done.reviews[0].interval_days, 7);

    let done = f.scheduler.complete("u1", &id, 0.5, now).await.unwrap();
    assert_days_from(done.next_review_at, now, 1);
    assert_eq!(done.review_count, 2);

    let stored = f.scheduler.get("u1", &id).await.unwrap().unwrap();
    assert_eq!(stored.reviews.len(), 2);
    assert_eq!(stored.reviews[1].accuracy, 0.5);
}

#[tokio::test]
async fn test_complete_review_validation_and_scope() {
    let f = fixture().await;
    flag(&f, "u1", "arrays", Severity::High).await;
    let now = Utc::now();
    f.scheduler.trigger("u1", "arrays", 1.0, now).await.unwrap();
    let id = f.scheduler.for_topic("u1", "arrays", now).await.unwrap().id;

    for bad in [-0.1, 1.5, f64::NAN] {
        match f.scheduler.complete("u1", &id, bad, now).await {
            Err(TrackerError::Validation(_)) => {}
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    match f.scheduler.complete("u2", &id, 0.9, now).await {
        Err(TrackerError::NotFound(_)) => {}
        other => panic!("expected not found, got {:?}", other),
    }
    match f.scheduler.complete("u1", "missing", 0.9, now).await {
        Err(TrackerError::NotFound(_)) => {}
        other => panic!("expected not found, got {:?}", other),
    }
}

#[tokio::test]
async fn test_due_and_overdue_status() {
    let f = fixture().await;
    flag(&f, "u1", "arrays", Severity::High).await;
    flag(&f, "u1", "graphs", Severity::High).await;
    let now = Utc::now();
    f.scheduler.trigger("u1", "arrays", 1.0, now - Duration::days(3)).await.unwrap();
    f.scheduler.trigger("u1", "graphs", 1.0, now).await.unwrap();

    let due = f.scheduler.due("u1", now).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].topic_id, "arrays");
    assert_eq!(due[0].status, ReviewStatus::Overdue);

    let all = f.scheduler.list("u1", now).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].status, ReviewStatus::Scheduled);
}

#[tokio::test]
async fn test_delete_review() {
    let f = fixture().await;
    flag(&f, "u1", "arrays", Severity::High).await;
    let now = Utc::now();
    f.scheduler.trigger("u1", "arrays", 1.0, now).await.unwrap();
    let id = f.scheduler.for_topic("u1", "arrays", now).await.unwrap().id;

    assert!(matches!(f.scheduler.delete("u2", &id).await, Err(TrackerError::NotFound(_))));
    f.scheduler.delete("u1", &id).await.unwrap();
    assert!(matches!(
        f.scheduler.for_topic("u1", "arrays", now).await,
        Err(TrackerError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_triggers_and_completions_all_count() {
    const ROUNDS: i64 = 10;
    let temp = TempDb::new().await.unwrap();
    let weaknesses = WeaknessStore::new(&temp.db);
    let f = Fixture {
        scheduler: ReviewScheduler::new(&temp.db, weaknesses.clone()),
        weaknesses,
    };
    flag(&f, "u1", "arrays", Severity::Critical).await;
    let now = Utc::now();
    assert_eq!(f.scheduler.trigger("u1", "arrays", 0.5, now).await.unwrap(), TriggerOutcome::Created);
    let id = f.scheduler.for_topic("u1", "arrays", now).await.unwrap().id;

    let mut handles = Vec::new();
    for i in 0..ROUNDS {
        let scheduler = f.scheduler.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                scheduler.trigger("u1", "arrays", 0.7, Utc::now()).await.map(|_| ())
            } else {
                scheduler.complete("u1", &id, 0.95, Utc::now()).await.map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let schedule = f.scheduler.for_topic("u1", "arrays", Utc::now()).await.unwrap();
    assert_eq!(schedule.review_count, ROUNDS);
    assert_eq!(schedule.reviews.len() as i64, ROUNDS / 2);
    assert!(schedule.reviews.iter().all(|r| r.interval_days == 7));
}
