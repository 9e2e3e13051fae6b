use chrono::{DateTime, Duration, Utc};

/// A new weakness is first due for review this many days after detection.
pub const WEAKNESS_FIRST_REVIEW_DAYS: i64 = 3;
pub const DEFAULT_INTERVAL_DAYS: i64 = 3;
/// SM-2 starting ease. Stored on every weakness; the interval tables below do not read it.
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;
/// A freshly created review schedule comes due the next day.
pub const FIRST_REVIEW_DAYS: i64 = 1;

/// Interval used when ordinary practice re-triggers an existing schedule.
///
/// Accuracy is a fraction in [0, 1]:
/// >= 0.8 - 3 days
/// >= 0.6 - 2 days
/// otherwise - 1 day
///
/// Capped at 3 days: a single practice attempt is weak evidence, so it may
/// pull a review closer but never pushes it out as far as a completed review.
pub fn trigger_interval_days(accuracy: f64) -> i64 {
    if accuracy >= 0.8 {
        3
    } else if accuracy >= 0.6 {
        2
    } else {
        1
    }
}

/// Interval used when the user explicitly completes a review.
///
/// >= 0.9 - 7 days
/// >= 0.8 - 3 days
/// >= 0.6 - 2 days
/// otherwise - 1 day
///
/// Below 0.9 this agrees with `trigger_interval_days`; only a near-perfect
/// review earns the week-long step.
pub fn completion_interval_days(accuracy: f64) -> i64 {
    if accuracy >= 0.9 {
        7
    } else {
        trigger_interval_days(accuracy)
    }
}

pub fn due_after(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now + Duration::days(days)
}

#[cfg(test)]
#[path = "srs_tests.rs"]
mod tests;
