//! Auditor output: the critic report.
//!
//! The report checks internal consistency of a case file. It never assigns
//! tamper status.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Five-step confidence scale derived from a numeric confidence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum ConfidenceLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    /// >=0.9 VeryHigh, >=0.7 High, >=0.5 Medium, >=0.3 Low, otherwise VeryLow.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            ConfidenceLevel::VeryHigh
        } else if confidence >= 0.7 {
            ConfidenceLevel::High
        } else if confidence >= 0.5 {
            ConfidenceLevel::Medium
        } else if confidence >= 0.3 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::VeryLow => "VeryLow",
            ConfidenceLevel::Low => "Low",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::High => "High",
            ConfidenceLevel::VeryHigh => "VeryHigh",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of inconsistency found by the auditor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionType {
    ScoreSignalMismatch,
    CrossModuleConflict,
    ScoreAggregation,
    PriorityMisalignment,
    Other,
}

/// How much a contradiction undermines the evidence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum Impact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Contradiction {
    #[serde(rename = "type")]
    pub kind: ContradictionType,

    #[schemars(length(min = 1))]
    pub description: String,

    pub impact: Impact,
}

/// Structured audit of one case file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CriticReport {
    /// Whether deterministic_score and priority follow the scoring rules
    pub rule_consistency: bool,

    /// Inconsistencies between modules, scores and signals
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,

    /// Observations where modules corroborate each other
    #[serde(default)]
    pub reinforcement: Vec<String>,

    /// Confidence in the evidence as a whole (0.0 to 1.0)
    #[schemars(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    pub confidence_level: ConfidenceLevel,

    pub confidence_reason: String,

    pub audit_notes: String,

    /// Whether the deterministic modules should be re-run
    pub rerun_recommended: bool,
}

impl CriticReport {
    /// Range checks the schema cannot express precisely (NaN, infinities).
    pub fn semantic_check(&self) -> Result<(), String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence: must be between 0.0 and 1.0, got {}",
                self.confidence
            ));
        }
        Ok(())
    }

    /// Level implied by the numeric confidence.
    pub fn derived_confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_confidence(self.confidence)
    }

    /// Align `confidence_level` with `confidence`.
    ///
    /// Returns the previous level when it changed.
    pub fn normalize_confidence_level(&mut self) -> Option<ConfidenceLevel> {
        let derived = self.derived_confidence_level();
        if self.confidence_level == derived {
            return None;
        }
        let previous = self.confidence_level;
        self.confidence_level = derived;
        Some(previous)
    }

    pub fn high_impact_contradictions(&self) -> usize {
        self.contradictions
            .iter()
            .filter(|c| c.impact == Impact::High)
            .count()
    }
}
