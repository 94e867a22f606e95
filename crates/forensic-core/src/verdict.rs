//! Judge output: the forensic verdict.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::case::Priority;
use crate::report::ConfidenceLevel;

/// Severity tier of a verdict. Always equal to the case priority after
/// enforcement.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl From<Priority> for Severity {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Low => Severity::Low,
            Priority::Medium => Severity::Medium,
            Priority::High => Severity::High,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        })
    }
}

/// Where a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSource {
    Metadata,
    Font,
    Compression,
    Qr,
    Critic,
    Other,
}

/// Whether a finding supports or undermines the tamper conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Weight {
    Supporting,
    Neutral,
    Contradicting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvidenceItem {
    pub source: EvidenceSource,

    #[schemars(length(min = 1))]
    pub finding: String,

    pub weight: Weight,
}

/// Final verdict for one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ForensicVerdict {
    /// Must echo the case file's case_id
    pub case_id: String,

    pub tampered: bool,

    /// Must equal the case file's priority
    pub severity: Severity,

    /// Must echo the case file's deterministic_score
    #[schemars(range(max = 10))]
    pub deterministic_score: u8,

    /// Confidence in the verdict (0.0 to 1.0)
    #[schemars(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    pub confidence_level: ConfidenceLevel,

    /// Plain-language explanation for a human reviewer
    #[schemars(length(min = 1))]
    pub explanation: String,

    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,

    #[serde(default)]
    pub flagged_for_human_review: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_reason: Option<String>,
}

impl ForensicVerdict {
    /// Range checks the schema cannot express precisely.
    pub fn semantic_check(&self) -> Result<(), String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence: must be between 0.0 and 1.0, got {}",
                self.confidence
            ));
        }
        if self.explanation.trim().is_empty() {
            return Err("explanation: must not be empty".to_string());
        }
        Ok(())
    }

    pub fn supporting_evidence(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.evidence
            .iter()
            .filter(|e| e.weight == Weight::Supporting)
    }
}
