//! # forensic-core
//!
//! Data model and deterministic checks for the forensic verdict pipeline.
//!
//! Everything here is pure: no model calls, no I/O beyond reading a case
//! file from disk.
//!
//! ## Key Guarantees
//!
//! 1. **Valid by construction**: an [`EvidenceCaseFile`] always satisfies
//!    `deterministic_score == min(sum of module scores, 10)` and carries the
//!    priority tier implied by that score
//! 2. **Typed model output**: [`CriticReport`] and [`ForensicVerdict`] derive
//!    their JSON Schema from the Rust types
//! 3. **Fixed values win**: [`enforce_invariants`] overwrites any verdict
//!    field the model is not allowed to decide
//!
//! ## Example
//!
//! ```rust,ignore
//! use forensic_core::{EvidenceCaseFile, preflight_check};
//!
//! let case = EvidenceCaseFile::from_file("case.json")?;
//! if let Some(warning) = preflight_check(&case) {
//!     eprintln!("preflight: {warning}");
//! }
//! ```

pub mod case;
pub mod checks;
pub mod report;
pub mod schema;
pub mod verdict;

pub use case::{
    CaseError, CaseFileBuilder, CaseFileDocument, EvidenceCaseFile, ModuleResult, Priority,
    MAX_SCORE,
};
pub use checks::{
    assess, case_review_triggers, enforce_invariants, preflight_check, preflight_warnings,
    review_check, review_triggers, CaseAssessment, Correction, PreflightWarning, ReviewTrigger,
};
pub use report::{ConfidenceLevel, Contradiction, ContradictionType, CriticReport, Impact};
pub use schema::{field_path, schema_text, schema_value, SchemaError, SchemaValidator};
pub use verdict::{EvidenceItem, EvidenceSource, ForensicVerdict, Severity, Weight};
