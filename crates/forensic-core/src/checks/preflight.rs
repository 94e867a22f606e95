//! Preflight sanity checks run before the auditor call.
//!
//! Warnings are passed to the auditor as extra context. They never abort
//! the pipeline.

use std::fmt;

use crate::case::{CaseFileDocument, EvidenceCaseFile, MAX_SCORE};

use super::join_reasons;

/// A module score at or above this with no signals is suspicious.
const SILENT_SCORE_THRESHOLD: u8 = 5;

/// A zero-scored module with at least this many signals is suspicious.
const UNSCORED_SIGNAL_THRESHOLD: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightWarning {
    ScoreMismatch { sum: u32, expected: u8, actual: u8 },
    SilentHighScore { module: String, score: u8 },
    UnscoredSignals { module: String, count: usize },
}

impl fmt::Display for PreflightWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightWarning::ScoreMismatch {
                sum,
                expected,
                actual,
            } => write!(
                f,
                "Score mismatch: modules sum to {sum}, expected min({sum},{MAX_SCORE})={expected}, \
                 but deterministic_score={actual}"
            ),
            PreflightWarning::SilentHighScore { module, score } => {
                write!(f, "{module} scores {score} but has no signals")
            }
            PreflightWarning::UnscoredSignals { module, count } => {
                write!(f, "{module} scores 0 but has {count} signals")
            }
        }
    }
}

/// All preflight warnings for a case, in a stable order.
pub fn preflight_warnings(case: &EvidenceCaseFile) -> Vec<PreflightWarning> {
    document_warnings(case.document())
}

/// Preflight warnings joined with `"; "`, or `None` for a clean case.
pub fn preflight_check(case: &EvidenceCaseFile) -> Option<String> {
    join_reasons(&preflight_warnings(case))
}

pub(crate) fn document_warnings(doc: &CaseFileDocument) -> Vec<PreflightWarning> {
    let mut warnings = Vec::new();
    let modules = doc.modules();

    let sum: u32 = modules.iter().map(|(_, m)| u32::from(m.score)).sum();
    let expected = sum.min(u32::from(MAX_SCORE)) as u8;
    if doc.deterministic_score != expected {
        warnings.push(PreflightWarning::ScoreMismatch {
            sum,
            expected,
            actual: doc.deterministic_score,
        });
    }

    for (name, module) in &modules {
        if module.score >= SILENT_SCORE_THRESHOLD && module.signals.is_empty() {
            warnings.push(PreflightWarning::SilentHighScore {
                module: name.to_string(),
                score: module.score,
            });
        }
    }

    for (name, module) in &modules {
        if module.score == 0 && module.signals.len() >= UNSCORED_SIGNAL_THRESHOLD {
            warnings.push(PreflightWarning::UnscoredSignals {
                module: name.to_string(),
                count: module.signals.len(),
            });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Priority;

    #[test]
    fn test_consistent_case_has_no_warnings() {
        let case = EvidenceCaseFile::builder("OK")
            .metadata(2, &["creator_tool_changed"])
            .font(1, &["embedded_subset"])
            .compression(0, &[])
            .build()
            .unwrap();
        assert!(preflight_check(&case).is_none());
    }

    #[test]
    fn test_high_score_without_signals() {
        let case = EvidenceCaseFile::builder("SILENT")
            .metadata(6, &[])
            .font(0, &[])
            .compression(0, &[])
            .build()
            .unwrap();

        let warning = preflight_check(&case).unwrap();
        assert_eq!(warning, "metadata scores 6 but has no signals");
    }

    #[test]
    fn test_zero_score_with_many_signals() {
        let case = EvidenceCaseFile::builder("NOISY")
            .metadata(0, &[])
            .font(0, &["a", "b", "c"])
            .compression(5, &[])
            .build()
            .unwrap();

        let warnings = preflight_warnings(&case);
        assert_eq!(warnings.len(), 2);
        assert_eq!(
            preflight_check(&case).unwrap(),
            "compression scores 5 but has no signals; font scores 0 but has 3 signals"
        );
    }

    #[test]
    fn test_optional_modules_are_checked() {
        let case = EvidenceCaseFile::builder("QR")
            .metadata(1, &["a"])
            .font(0, &[])
            .compression(0, &[])
            .qr(5, &[])
            .build()
            .unwrap();
        assert!(matches!(
            preflight_warnings(&case).as_slice(),
            [PreflightWarning::SilentHighScore { module, score: 5 }] if module == "qr"
        ));
    }

    #[test]
    fn test_score_mismatch_on_raw_document() {
        let mut doc = EvidenceCaseFile::builder("RAW")
            .metadata(3, &["a"])
            .font(2, &["b"])
            .build()
            .unwrap()
            .document()
            .clone();
        doc.deterministic_score = 7;
        doc.priority = Priority::High;

        let warnings = document_warnings(&doc);
        assert_eq!(
            warnings[0],
            PreflightWarning::ScoreMismatch {
                sum: 5,
                expected: 5,
                actual: 7
            }
        );
        assert!(warnings[0].to_string().starts_with("Score mismatch"));
    }
}
