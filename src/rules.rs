use crate::models::{RootCause, Severity};
use crate::stats::TopicStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub root_cause: RootCause,
    pub severity: Severity,
}

/// A fixed threshold rule over topic stats.
pub struct Rule {
    pub id: &'static str,
    pub root_cause: RootCause,
    pub severity: Severity,
    pub applies: fn(&TopicStats) -> bool,
}

/// Evaluated in this order; every rule is checked independently.
pub const RULES: &[Rule] = &[
    // Missing easy problems while accuracy is poor.
    Rule {
        id: "R1",
        root_cause: RootCause::LowAccuracy,
        severity: Severity::Critical,
        applies: |s| s.accuracy < 60 && s.easy_wrong > 0,
    },
    // More than five minutes per problem on average.
    Rule {
        id: "R2",
        root_cause: RootCause::SlowSpeed,
        severity: Severity::High,
        applies: |s| s.avg_time > 300,
    },
    Rule {
        id: "R3",
        root_cause: RootCause::Inconsistency,
        severity: Severity::Medium,
        applies: |s| s.attempts >= 5 && s.accuracy < 65,
    },
];

pub fn rule_for(root_cause: RootCause) -> Option<&'static Rule> {
    RULES.iter().find(|r| r.root_cause == root_cause)
}

pub fn evaluate(stats: &TopicStats) -> Vec<Diagnosis> {
    RULES
        .iter()
        .filter(|rule| (rule.applies)(stats))
        .map(|rule| Diagnosis {
            root_cause: rule.root_cause,
            severity: rule.severity,
        })
        .collect()
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod tests;
