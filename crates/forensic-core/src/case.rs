//! Evidence case files.
//!
//! A case file is produced once per document by the upstream deterministic
//! engine and is read-only from then on. Construction enforces two
//! invariants:
//!
//! 1. `deterministic_score == min(sum of module scores, 10)`
//! 2. `priority` matches the score tier (0-3 Low, 4-6 Medium, 7-10 High)
//!
//! A case that violates either cannot exist as an [`EvidenceCaseFile`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schema::{SchemaError, SchemaValidator};

/// Upper bound for module scores and the aggregated score.
pub const MAX_SCORE: u8 = 10;

/// Errors raised while reading or constructing a case file.
#[derive(Error, Debug)]
pub enum CaseError {
    #[error("Failed to read case file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Case file failed schema validation: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("{path}: {message}")]
    Invariant { path: String, message: String },

    #[error(transparent)]
    SchemaUnavailable(#[from] SchemaError),
}

impl CaseError {
    fn invariant(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invariant {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Field-path-qualified messages, one per violation.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Schema(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

/// Review priority assigned by the deterministic engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Tier for an aggregated score: 0-3 Low, 4-6 Medium, 7-10 High.
    pub fn for_score(score: u8) -> Self {
        match score {
            0..=3 => Priority::Low,
            4..=6 => Priority::Medium,
            _ => Priority::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one deterministic detection module.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ModuleResult {
    /// Anomaly score (0-10)
    #[schemars(range(max = 10))]
    pub score: u8,

    /// Named anomaly indicators; order is irrelevant
    #[serde(default)]
    #[schemars(with = "Vec<String>")]
    pub signals: BTreeSet<String>,
}

impl ModuleResult {
    pub fn new(score: u8, signals: &[&str]) -> Self {
        Self {
            score,
            signals: signals.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn has_signals(&self) -> bool {
        !self.signals.is_empty()
    }
}

/// Wire shape of a case file, as received from the scoring engine.
///
/// This is the document that is schema-validated on the way in. It carries
/// no invariants of its own; converting it into an [`EvidenceCaseFile`]
/// checks them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(rename = "EvidenceCaseFile")]
pub struct CaseFileDocument {
    /// Unique case identifier
    #[schemars(length(min = 1))]
    pub case_id: String,

    pub metadata: ModuleResult,
    pub font: ModuleResult,
    pub compression: ModuleResult,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<ModuleResult>,

    /// Further named modules
    #[serde(flatten)]
    pub additional: BTreeMap<String, ModuleResult>,

    /// min(sum of module scores, 10)
    #[schemars(range(max = 10))]
    pub deterministic_score: u8,

    pub priority: Priority,
}

impl CaseFileDocument {
    /// All modules in a stable order: the three required modules, `qr`,
    /// then additional modules by name.
    pub fn modules(&self) -> Vec<(&str, &ModuleResult)> {
        let mut modules = vec![
            ("metadata", &self.metadata),
            ("font", &self.font),
            ("compression", &self.compression),
        ];
        if let Some(qr) = &self.qr {
            modules.push(("qr", qr));
        }
        modules.extend(self.additional.iter().map(|(k, v)| (k.as_str(), v)));
        modules
    }
}

/// A validated, immutable evidence case file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CaseFileDocument", into = "CaseFileDocument")]
pub struct EvidenceCaseFile {
    doc: CaseFileDocument,
}

impl TryFrom<CaseFileDocument> for EvidenceCaseFile {
    type Error = CaseError;

    fn try_from(doc: CaseFileDocument) -> Result<Self, Self::Error> {
        if doc.case_id.trim().is_empty() {
            return Err(CaseError::invariant("case_id", "must not be empty"));
        }

        for (name, module) in doc.modules() {
            if module.score > MAX_SCORE {
                return Err(CaseError::invariant(
                    format!("{name}.score"),
                    format!("must be between 0 and {MAX_SCORE}, got {}", module.score),
                ));
            }
        }

        let sum = module_sum(&doc);
        let expected = sum.min(u32::from(MAX_SCORE)) as u8;
        if doc.deterministic_score != expected {
            return Err(CaseError::invariant(
                "deterministic_score",
                format!(
                    "must equal min(sum of module scores, {MAX_SCORE}) = {expected} \
                     (modules sum to {sum}), got {}",
                    doc.deterministic_score
                ),
            ));
        }

        let expected_priority = Priority::for_score(doc.deterministic_score);
        if doc.priority != expected_priority {
            return Err(CaseError::invariant(
                "priority",
                format!(
                    "{} does not match deterministic_score {} (expected {})",
                    doc.priority, doc.deterministic_score, expected_priority
                ),
            ));
        }

        Ok(Self { doc })
    }
}

impl From<EvidenceCaseFile> for CaseFileDocument {
    fn from(case: EvidenceCaseFile) -> Self {
        case.doc
    }
}

fn module_sum(doc: &CaseFileDocument) -> u32 {
    doc.modules()
        .iter()
        .map(|(_, m)| u32::from(m.score))
        .sum()
}

fn case_validator() -> Result<&'static SchemaValidator, CaseError> {
    static VALIDATOR: OnceLock<Result<SchemaValidator, SchemaError>> = OnceLock::new();
    VALIDATOR
        .get_or_init(SchemaValidator::for_type::<CaseFileDocument>)
        .as_ref()
        .map_err(|e| CaseError::SchemaUnavailable(e.clone()))
}

impl EvidenceCaseFile {
    /// Start building a case file.
    pub fn builder(case_id: impl Into<String>) -> CaseFileBuilder {
        CaseFileBuilder::new(case_id)
    }

    /// Validate a JSON document: schema first, then invariants.
    pub fn from_value(value: &Value) -> Result<Self, CaseError> {
        case_validator()?
            .validate(value)
            .map_err(CaseError::Schema)?;
        let doc: CaseFileDocument = serde_json::from_value(value.clone())?;
        Self::try_from(doc)
    }

    /// Parse and validate a JSON string.
    pub fn from_json(json: &str) -> Result<Self, CaseError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Parse and validate a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, CaseError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(&value)
    }

    /// Read a case file; `.yaml`/`.yml` is parsed as YAML, anything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CaseError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    pub fn case_id(&self) -> &str {
        &self.doc.case_id
    }

    pub fn metadata(&self) -> &ModuleResult {
        &self.doc.metadata
    }

    pub fn font(&self) -> &ModuleResult {
        &self.doc.font
    }

    pub fn compression(&self) -> &ModuleResult {
        &self.doc.compression
    }

    pub fn qr(&self) -> Option<&ModuleResult> {
        self.doc.qr.as_ref()
    }

    pub fn deterministic_score(&self) -> u8 {
        self.doc.deterministic_score
    }

    pub fn priority(&self) -> Priority {
        self.doc.priority
    }

    /// All modules in a stable order.
    pub fn modules(&self) -> Vec<(&str, &ModuleResult)> {
        self.doc.modules()
    }

    /// Raw sum of module scores (uncapped).
    pub fn module_sum(&self) -> u32 {
        module_sum(&self.doc)
    }

    /// Number of modules that produced at least one signal.
    pub fn modules_with_signals(&self) -> usize {
        self.modules()
            .iter()
            .filter(|(_, m)| m.has_signals())
            .count()
    }

    /// Pretty JSON for model prompts. Absent modules are omitted.
    pub fn to_prompt_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.doc)
    }

    /// Borrow the underlying document.
    pub fn document(&self) -> &CaseFileDocument {
        &self.doc
    }
}

/// Fluent builder for case files.
///
/// `deterministic_score` and `priority` default to the values implied by
/// the module scores; setting them explicitly lets callers construct (and
/// be refused) inconsistent cases.
#[derive(Debug, Clone)]
pub struct CaseFileBuilder {
    case_id: String,
    metadata: ModuleResult,
    font: ModuleResult,
    compression: ModuleResult,
    qr: Option<ModuleResult>,
    additional: BTreeMap<String, ModuleResult>,
    deterministic_score: Option<u8>,
    priority: Option<Priority>,
}

impl CaseFileBuilder {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            metadata: ModuleResult::default(),
            font: ModuleResult::default(),
            compression: ModuleResult::default(),
            qr: None,
            additional: BTreeMap::new(),
            deterministic_score: None,
            priority: None,
        }
    }

    pub fn metadata(mut self, score: u8, signals: &[&str]) -> Self {
        self.metadata = ModuleResult::new(score, signals);
        self
    }

    pub fn font(mut self, score: u8, signals: &[&str]) -> Self {
        self.font = ModuleResult::new(score, signals);
        self
    }

    pub fn compression(mut self, score: u8, signals: &[&str]) -> Self {
        self.compression = ModuleResult::new(score, signals);
        self
    }

    pub fn qr(mut self, score: u8, signals: &[&str]) -> Self {
        self.qr = Some(ModuleResult::new(score, signals));
        self
    }

    /// Add a further named module.
    pub fn module(mut self, name: impl Into<String>, score: u8, signals: &[&str]) -> Self {
        self.additional
            .insert(name.into(), ModuleResult::new(score, signals));
        self
    }

    pub fn deterministic_score(mut self, score: u8) -> Self {
        self.deterministic_score = Some(score);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn build(self) -> Result<EvidenceCaseFile, CaseError> {
        let mut doc = CaseFileDocument {
            case_id: self.case_id,
            metadata: self.metadata,
            font: self.font,
            compression: self.compression,
            qr: self.qr,
            additional: self.additional,
            deterministic_score: 0,
            priority: Priority::Low,
        };

        let derived = module_sum(&doc).min(u32::from(MAX_SCORE)) as u8;
        doc.deterministic_score = self.deterministic_score.unwrap_or(derived);
        doc.priority = self
            .priority
            .unwrap_or_else(|| Priority::for_score(doc.deterministic_score));

        EvidenceCaseFile::try_from(doc)
    }
}
