use super::*;
use crate::ledger::NewSubmission;
use crate::models::{RootCause, Severity};

/// Inserts misses on easy "arrays" problems and returns the last submission id.
async fn insert_misses(db: &Db, user: &str, count: usize, secs: f64) -> String {
    let mut conn = db.pool().acquire().await.unwrap();
    let mut last = String::new();
    for _ in 0..count {
        let req = NewSubmission {
            topic: Some("arrays".to_string()),
            difficulty: Some("easy".to_string()),
            problem_id: Some("p1".to_string()),
            correct: Some(false),
            time_taken_seconds: Some(secs),
            attempt_number: None,
        };
        let s = req.into_submission(user, Utc::now()).unwrap();
        Ledger::insert(&mut conn, &s).await.unwrap();
        last = s.id;
    }
    last
}

#[tokio::test]
async fn test_analysis_is_noop_below_min_sample() {
    let db = Db::in_memory().await.unwrap();
    let analyzer = Analyzer::new(&db);
    let id = insert_misses(&db, "u1", 2, 400.0).await;

    let diagnoses = analyzer.analyze_topic("u1", "arrays", Some(&id), Utc::now()).await.unwrap();
    assert!(diagnoses.is_empty());
    assert!(WeaknessStore::new(&db).list("u1").await.unwrap().is_empty());
    assert!(FeedbackStore::new(&db).for_user("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_analysis_flags_weaknesses_and_feedback() {
    let db = Db::in_memory().await.unwrap();
    let analyzer = Analyzer::new(&db);
    let id = insert_misses(&db, "u1", 3, 400.0).await;

    let diagnoses = analyzer.analyze_topic("u1", "arrays", Some(&id), Utc::now()).await.unwrap();
    assert_eq!(
        diagnoses,
        vec![
            Diagnosis { root_cause: RootCause::LowAccuracy, severity: Severity::Critical },
            Diagnosis { root_cause: RootCause::SlowSpeed, severity: Severity::High },
        ]
    );

    let weaknesses = WeaknessStore::new(&db).list_for_topic("u1", "arrays").await.unwrap();
    assert_eq!(weaknesses.len(), 2);

    let feedback = FeedbackStore::new(&db).for_submission("u1", &id).await.unwrap();
    assert_eq!(feedback.rules_fired.len(), 2);
}

#[tokio::test]
async fn test_repeated_analysis_keeps_one_weakness_per_cause() {
    let db = Db::in_memory().await.unwrap();
    let analyzer = Analyzer::new(&db);
    let store = WeaknessStore::new(&db);
    insert_misses(&db, "u1", 3, 10.0).await;

    for _ in 0..4 {
        analyzer.analyze_topic("u1", "arrays", None, Utc::now()).await.unwrap();
    }
    assert_eq!(store.count("u1", "arrays").await.unwrap(), 1);

    insert_misses(&db, "u1", 2, 10.0).await;
    analyzer.analyze_topic("u1", "arrays", None, Utc::now()).await.unwrap();

    // five attempts now also trip the inconsistency rule
    assert_eq!(store.count("u1", "arrays").await.unwrap(), 2);
    let low = store
        .list_for_topic("u1", "arrays")
        .await
        .unwrap()
        .into_iter()
        .find(|w| w.root_cause == RootCause::LowAccuracy)
        .unwrap();
    assert_eq!(low.evidence.sample_size, 5);
}

#[tokio::test]
async fn test_queue_runs_full_pipeline() {
    let db = Db::in_memory().await.unwrap();
    let (queue, _worker) = AnalysisQueue::spawn(Analyzer::new(&db), 16);
    let id = insert_misses(&db, "u1", 3, 400.0).await;

    assert!(queue.enqueue(AnalysisJob::SubmissionRecorded {
        user_id: "u1".to_string(),
        topic: "arrays".to_string(),
        submission_id: id,
        accuracy: 0.0,
    }));
    queue.flush().await;

    assert_eq!(queue.stats(), QueueStats { processed: 1, failed: 0, dropped: 0 });
    let reviews = ReviewScheduler::new(&db, WeaknessStore::new(&db))
        .list("u1", Utc::now())
        .await
        .unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].review_count, 0);
}

#[tokio::test]
async fn test_failed_job_is_counted_and_worker_continues() {
    let db = Db::in_memory().await.unwrap();
    let (queue, _worker) = AnalysisQueue::spawn(Analyzer::new(&db), 16);
    insert_misses(&db, "u1", 3, 400.0).await;

    queue.enqueue(AnalysisJob::ScheduleReview {
        user_id: "u1".to_string(),
        topic: "arrays".to_string(),
        accuracy: f64::NAN,
    });
    queue.enqueue(AnalysisJob::Analyze {
        user_id: "u1".to_string(),
        topic: "arrays".to_string(),
    });
    queue.flush().await;

    assert_eq!(queue.stats(), QueueStats { processed: 1, failed: 1, dropped: 0 });
    assert_eq!(WeaknessStore::new(&db).count("u1", "arrays").await.unwrap(), 2);
}

#[tokio::test]
async fn test_enqueue_after_worker_stops_is_dropped() {
    let db = Db::in_memory().await.unwrap();
    let (queue, worker) = AnalysisQueue::spawn(Analyzer::new(&db), 4);
    worker.abort();
    let _ = worker.await;

    let accepted = queue.enqueue(AnalysisJob::Analyze {
        user_id: "u1".to_string(),
        topic: "arrays".to_string(),
    });
    assert!(!accepted);
    assert_eq!(queue.stats().dropped, 1);

    // returns instead of hanging
    queue.flush().await;
}
