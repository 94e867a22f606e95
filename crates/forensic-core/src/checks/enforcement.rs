//! Post-verdict enforcement.
//!
//! The judge may return a well-formed verdict with wrong fixed values.
//! This pass overwrites them from the case file and records each change.
//! Applying it twice changes nothing the second time.

use std::fmt;

use tracing::warn;

use crate::case::EvidenceCaseFile;
use crate::report::ConfidenceLevel;
use crate::verdict::{ForensicVerdict, Severity};

/// One field overwritten by enforcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub field: &'static str,
    pub before: String,
    pub after: String,
}

impl Correction {
    fn new(field: &'static str, before: impl ToString, after: impl ToString) -> Self {
        Self {
            field,
            before: before.to_string(),
            after: after.to_string(),
        }
    }
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.before, self.after)
    }
}

/// Force `verdict` to agree with `case` and the review pre-check.
///
/// - `deterministic_score`, `severity` and `case_id` come from the case
/// - a pre-check `review_reason` forces the review flag and replaces the
///   model's reason on an unflagged verdict. A verdict the model flagged
///   itself keeps its own reason, or gets the pre-check one if it had none
/// - `confidence_level` is aligned with `confidence`
pub fn enforce_invariants(
    verdict: &mut ForensicVerdict,
    case: &EvidenceCaseFile,
    review_reason: Option<&str>,
) -> Vec<Correction> {
    let mut corrections = Vec::new();

    if verdict.deterministic_score != case.deterministic_score() {
        corrections.push(Correction::new(
            "deterministic_score",
            verdict.deterministic_score,
            case.deterministic_score(),
        ));
        verdict.deterministic_score = case.deterministic_score();
    }

    let expected_severity = Severity::from(case.priority());
    if verdict.severity != expected_severity {
        corrections.push(Correction::new(
            "severity",
            verdict.severity,
            expected_severity,
        ));
        verdict.severity = expected_severity;
    }

    if verdict.case_id != case.case_id() {
        corrections.push(Correction::new("case_id", &verdict.case_id, case.case_id()));
        verdict.case_id = case.case_id().to_string();
    }

    if let Some(reason) = review_reason {
        if !verdict.flagged_for_human_review {
            corrections.push(Correction::new("flagged_for_human_review", false, true));
            verdict.flagged_for_human_review = true;
            if verdict.review_reason.as_deref() != Some(reason) {
                let before = verdict.review_reason.as_deref().unwrap_or("(none)");
                corrections.push(Correction::new("review_reason", before, reason));
                verdict.review_reason = Some(reason.to_string());
            }
        } else if verdict.review_reason.is_none() {
            corrections.push(Correction::new("review_reason", "(none)", reason));
            verdict.review_reason = Some(reason.to_string());
        }
    }

    let expected_level = ConfidenceLevel::from_confidence(verdict.confidence);
    if verdict.confidence_level != expected_level {
        corrections.push(Correction::new(
            "confidence_level",
            verdict.confidence_level,
            expected_level,
        ));
        verdict.confidence_level = expected_level;
    }

    for c in &corrections {
        warn!(
            case_id = %case.case_id(),
            field = c.field,
            before = %c.before,
            after = %c.after,
            "Corrected verdict field"
        );
    }

    corrections
}
