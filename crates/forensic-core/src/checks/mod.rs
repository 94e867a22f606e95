//! Deterministic checks around the two model calls.
//!
//! None of these call a model and none of them fail:
//!
//! - [`preflight`]: sanity warnings on a case before the auditor runs
//! - [`review`]: whether a case must go to a human regardless of the verdict
//! - [`enforcement`]: overwrite verdict fields the model must not change

pub mod enforcement;
pub mod preflight;
pub mod review;

pub use enforcement::{enforce_invariants, Correction};
pub use preflight::{preflight_check, preflight_warnings, PreflightWarning};
pub use review::{case_review_triggers, review_check, review_triggers, ReviewTrigger};

use serde::Serialize;

use crate::case::{EvidenceCaseFile, Priority};

/// Separator used when several findings are reported as one string.
pub const REASON_SEPARATOR: &str = "; ";

pub(crate) fn join_reasons<T: ToString>(items: &[T]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(REASON_SEPARATOR),
        )
    }
}

/// Everything that can be said about a case without calling a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseAssessment {
    pub case_id: String,
    pub deterministic_score: u8,
    pub priority: Priority,
    pub module_sum: u32,
    pub preflight_warnings: Vec<String>,
    pub review_triggers: Vec<String>,
}

impl CaseAssessment {
    pub fn is_clean(&self) -> bool {
        self.preflight_warnings.is_empty() && self.review_triggers.is_empty()
    }
}

/// Run preflight and the case-only review triggers.
pub fn assess(case: &EvidenceCaseFile) -> CaseAssessment {
    CaseAssessment {
        case_id: case.case_id().to_string(),
        deterministic_score: case.deterministic_score(),
        priority: case.priority(),
        module_sum: case.module_sum(),
        preflight_warnings: preflight_warnings(case)
            .iter()
            .map(ToString::to_string)
            .collect(),
        review_triggers: case_review_triggers(case)
            .iter()
            .map(ToString::to_string)
            .collect(),
    }
}
