use super::*;
use crate::ledger::{Ledger, NewSubmission};

fn submission(topic: &str, correct: bool) -> Submission {
    NewSubmission {
        topic: Some(topic.to_string()),
        difficulty: Some("medium".to_string()),
        problem_id: Some("p".to_string()),
        correct: Some(correct),
        time_taken_seconds: Some(60.0),
        attempt_number: Some(1),
    }
    .into_submission("u1", Utc::now())
    .unwrap()
}

#[test]
fn test_proficiency_tracks_every_sequence() {
    let sequences: &[&[bool]] = &[
        &[true],
        &[false],
        &[true, false, true],
        &[true, true, true, true, true, true, false],
        &[true, true, true, true, true, false],
        &[false, false, true],
    ];

    for seq in sequences {
        let mut progress = TopicProgress::default();
        let mut correct = 0;
        for (i, outcome) in seq.iter().enumerate() {
            progress.record(*outcome, Utc::now());
            if *outcome {
                correct += 1;
            }
            let total = (i + 1) as i64;
            let expected = (100.0 * correct as f64 / total as f64).round() as i64;
            assert_eq!(progress.total_attempts, total);
            assert_eq!(progress.correct_attempts, correct);
            assert_eq!(progress.proficiency, expected);
            assert_eq!(progress.mastered, expected >= MASTERY_THRESHOLD);
        }
    }
}

#[test]
fn test_mastery_threshold() {
    let mut progress = TopicProgress::default();
    // 6/7 = 86%
    for outcome in [true, true, true, true, true, true, false] {
        progress.record(outcome, Utc::now());
    }
    assert_eq!(progress.proficiency, 86);
    assert!(progress.mastered);

    // 5/6 = 83%
    progress.retract(true);
    assert_eq!(progress.proficiency, 83);
    assert!(!progress.mastered);
}

#[test]
fn test_retract_floors_at_zero_and_resets() {
    let mut progress = TopicProgress::default();
    progress.record(true, Utc::now());
    progress.retract(true);
    assert_eq!(progress.total_attempts, 0);
    assert_eq!(progress.correct_attempts, 0);
    assert_eq!(progress.proficiency, 0);
    assert!(!progress.mastered);

    progress.retract(true);
    progress.retract(false);
    assert_eq!(progress.total_attempts, 0);
    assert_eq!(progress.correct_attempts, 0);
}

#[test]
fn test_global_stats_stay_in_range() {
    let mut stats = GlobalStats::default();
    stats.retract(true);
    assert_eq!(stats, GlobalStats::default());

    stats.record(true);
    stats.record(true);
    stats.record(false);
    assert_eq!(stats.avg_accuracy, 67);

    // stored counters that drifted out of shape are clamped on read
    let drifted = GlobalStats::from_counts(2, 9);
    assert_eq!(drifted.correct_count, 2);
    assert_eq!(drifted.avg_accuracy, 100);
}

#[test]
fn test_rebuild_matches_incremental_updates() {
    let subs = vec![
        submission("arrays", true),
        submission("arrays", false),
        submission("graphs", true),
    ];
    let profile = UserProfile::rebuild("u1", &subs);

    assert_eq!(profile.topic_graph.len(), 2);
    assert_eq!(profile.topic_graph["arrays"].proficiency, 50);
    assert_eq!(profile.topic_graph["graphs"].proficiency, 100);
    assert!(profile.topic_graph["graphs"].mastered);
    assert_eq!(profile.global_stats.total_problems, 3);
    assert_eq!(profile.global_stats.correct_count, 2);
}

#[tokio::test]
async fn test_record_and_retract_persist() {
    let db = Db::in_memory().await.unwrap();
    let store = ProfileStore::new(&db);

    let first = submission("arrays", true);
    let second = submission("arrays", false);
    {
        let mut tx = db.pool().begin().await.unwrap();
        Ledger::insert(&mut tx, &first).await.unwrap();
        ProfileStore::record_in(&mut tx, &first).await.unwrap();
        Ledger::insert(&mut tx, &second).await.unwrap();
        let (topic, global) = ProfileStore::record_in(&mut tx, &second).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(topic.proficiency, 50);
        assert_eq!(global.total_problems, 2);
    }

    let profile = store.load("u1").await.unwrap();
    assert_eq!(profile.topic_graph["arrays"].total_attempts, 2);
    assert_eq!(profile.global_stats.avg_accuracy, 50);

    let arrays = {
        let mut tx = db.pool().begin().await.unwrap();
        ProfileStore::retract_in(&mut tx, &first).await.unwrap();
        ProfileStore::retract_in(&mut tx, &second).await.unwrap();
        // one more than was ever recorded
        let (arrays, _) = ProfileStore::retract_in(&mut tx, &second).await.unwrap();
        tx.commit().await.unwrap();
        arrays
    };
    assert_eq!(arrays.total_attempts, 0);
    assert_eq!(arrays.correct_attempts, 0);
    assert_eq!(arrays.proficiency, 0);
    assert!(!arrays.mastered);

    let profile = store.load("u1").await.unwrap();
    assert!(profile.topic_graph.is_empty());
    assert_eq!(profile.global_stats, GlobalStats::default());
}

#[tokio::test]
async fn test_emptied_topic_matches_rebuild() {
    let db = Db::in_memory().await.unwrap();
    let store = ProfileStore::new(&db);
    let kept = submission("arrays", true);
    let dropped = submission("graphs", false);
    {
        let mut tx = db.pool().begin().await.unwrap();
        for sub in [&kept, &dropped] {
            Ledger::insert(&mut tx, sub).await.unwrap();
            ProfileStore::record_in(&mut tx, sub).await.unwrap();
        }
        Ledger::remove(&mut tx, "u1", &dropped.id).await.unwrap().unwrap();
        ProfileStore::retract_in(&mut tx, &dropped).await.unwrap();
        tx.commit().await.unwrap();
    }

    let stored = store.load("u1").await.unwrap();
    let logged = UserProfile::rebuild("u1", std::slice::from_ref(&kept));
    assert_eq!(stored.global_stats, logged.global_stats);
    let topics: Vec<&String> = stored.topic_graph.keys().collect();
    assert_eq!(topics, logged.topic_graph.keys().collect::<Vec<_>>());
    assert_eq!(stored.topic_graph["arrays"].total_attempts, logged.topic_graph["arrays"].total_attempts);
    assert_eq!(stored.topic_graph["arrays"].proficiency, logged.topic_graph["arrays"].proficiency);
}

#[tokio::test]
async fn test_load_unknown_user_is_empty() {
    let db = Db::in_memory().await.unwrap();
    let profile = ProfileStore::new(&db).load("nobody").await.unwrap();
    assert!(profile.topic_graph.is_empty());
    assert_eq!(profile.global_stats, GlobalStats::default());
}
