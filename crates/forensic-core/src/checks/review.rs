//! Mandatory human-review pre-check.
//!
//! Runs before the judge call. When any trigger fires, the verdict is
//! flagged for review whatever the model says.

use std::fmt;

use crate::case::EvidenceCaseFile;
use crate::report::CriticReport;

use super::join_reasons;

const LOW_CONFIDENCE: f64 = 0.5;
const SPARSE_EVIDENCE_MIN_SCORE: u8 = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewTrigger {
    LowConfidence(f64),
    RerunRecommended,
    HighImpactContradictions(usize),
    BorderlineScore(u8),
    SparseEvidence { modules_with_signals: usize, score: u8 },
    RuleInconsistency,
}

impl fmt::Display for ReviewTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewTrigger::LowConfidence(c) => write!(f, "Critic confidence is low ({c:.2})"),
            ReviewTrigger::RerunRecommended => f.write_str("Critic recommended deterministic rerun"),
            ReviewTrigger::HighImpactContradictions(n) => {
                write!(f, "{n} high-impact contradiction(s) found")
            }
            ReviewTrigger::BorderlineScore(s) => {
                write!(f, "Borderline score ({s}) near classification boundary")
            }
            ReviewTrigger::SparseEvidence {
                modules_with_signals,
                score,
            } => write!(
                f,
                "Only {modules_with_signals} module(s) produced signals, sparse evidence for score {score}"
            ),
            ReviewTrigger::RuleInconsistency => f.write_str("Critic detected rule inconsistency"),
        }
    }
}

/// Every trigger that fires for this case and report, in a stable order.
pub fn review_triggers(case: &EvidenceCaseFile, report: &CriticReport) -> Vec<ReviewTrigger> {
    let mut triggers = Vec::new();

    if report.confidence < LOW_CONFIDENCE {
        triggers.push(ReviewTrigger::LowConfidence(report.confidence));
    }

    if report.rerun_recommended {
        triggers.push(ReviewTrigger::RerunRecommended);
    }

    let high = report.high_impact_contradictions();
    if high > 0 {
        triggers.push(ReviewTrigger::HighImpactContradictions(high));
    }

    triggers.extend(case_review_triggers(case));

    if !report.rule_consistency {
        triggers.push(ReviewTrigger::RuleInconsistency);
    }

    triggers
}

/// Triggers that depend on the case file alone.
pub fn case_review_triggers(case: &EvidenceCaseFile) -> Vec<ReviewTrigger> {
    let mut triggers = Vec::new();
    let score = case.deterministic_score();

    if matches!(score, 4 | 5) {
        triggers.push(ReviewTrigger::BorderlineScore(score));
    }

    let modules_with_signals = case.modules_with_signals();
    if modules_with_signals <= 1 && score >= SPARSE_EVIDENCE_MIN_SCORE {
        triggers.push(ReviewTrigger::SparseEvidence {
            modules_with_signals,
            score,
        });
    }

    triggers
}

/// Review reason joined with `"; "`, or `None` when no trigger fires.
pub fn review_check(case: &EvidenceCaseFile, report: &CriticReport) -> Option<String> {
    join_reasons(&review_triggers(case, report))
}
