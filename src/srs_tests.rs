use super::*;

#[test]
fn test_trigger_table() {
    assert_eq!(trigger_interval_days(1.0), 3);
    assert_eq!(trigger_interval_days(0.8), 3);
    assert_eq!(trigger_interval_days(0.79), 2);
    assert_eq!(trigger_interval_days(0.6), 2);
    assert_eq!(trigger_interval_days(0.59), 1);
    assert_eq!(trigger_interval_days(0.0), 1);
}

#[test]
fn test_completion_table() {
    assert_eq!(completion_interval_days(0.95), 7);
    assert_eq!(completion_interval_days(0.9), 7);
    assert_eq!(completion_interval_days(0.89), 3);
    assert_eq!(completion_interval_days(0.8), 3);
    assert_eq!(completion_interval_days(0.6), 2);
    assert_eq!(completion_interval_days(0.5), 1);
}

#[test]
fn test_tables_only_differ_at_the_top() {
    for step in 0..=100 {
        let accuracy = step as f64 / 100.0;
        let trigger = trigger_interval_days(accuracy);
        let completion = completion_interval_days(accuracy);
        if accuracy >= 0.9 {
            assert_eq!(completion, 7);
            assert_eq!(trigger, 3);
        } else {
            assert_eq!(trigger, completion);
        }
    }
}

#[test]
fn test_due_after() {
    let now = Utc::now();
    assert_eq!(due_after(now, 7) - now, Duration::days(7));
}
