//! Prompt resources for the auditor and judge.
//!
//! The shipped prompts are compiled in. A prompt directory with the same
//! file names replaces them so they can be tuned without a rebuild:
//!
//! - `critic_prompt.txt`: auditor system prompt with a `{few_shot_examples}`
//!   substitution point
//! - `fewshot_examples.json`: non-empty list of
//!   `{"label"?, "input", "expected_output"}`
//! - `reflection_prompt.txt`: judge system prompt
//!
//! Each agent loads its prompt once through a [`PromptCache`] and reuses it
//! across cases until the cache is cleared.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

pub const CRITIC_PROMPT_FILE: &str = "critic_prompt.txt";
pub const FEWSHOT_FILE: &str = "fewshot_examples.json";
pub const REFLECTION_PROMPT_FILE: &str = "reflection_prompt.txt";

/// Substitution point in the critic template.
pub const FEWSHOT_PLACEHOLDER: &str = "{few_shot_examples}";

const EMBEDDED_CRITIC_PROMPT: &str = include_str!("../prompts/critic_prompt.txt");
const EMBEDDED_FEWSHOT: &str = include_str!("../prompts/fewshot_examples.json");
const EMBEDDED_REFLECTION_PROMPT: &str = include_str!("../prompts/reflection_prompt.txt");

/// Errors loading prompt resources. All of them are fatal for the case.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Prompt resource not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("Prompt resource {} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("Failed to read prompt resource {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PromptError {
    fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// One worked example shown to the auditor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub input: Value,
    pub expected_output: Value,
}

/// A lazily loaded, explicitly cleared value.
///
/// Loading runs under the write lock so concurrent first uses read the
/// files once.
#[derive(Debug)]
pub struct PromptCache<T> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> Default for PromptCache<T> {
    fn default() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }
}

impl<T> PromptCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, loading it with `load` on first use.
    pub fn get_or_try_load<F>(&self, load: F) -> Result<Arc<T>, PromptError>
    where
        F: FnOnce() -> Result<T, PromptError>,
    {
        if let Some(value) = self.slot.read().as_ref() {
            return Ok(Arc::clone(value));
        }

        let mut slot = self.slot.write();
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }

        let value = Arc::new(load()?);
        *slot = Some(Arc::clone(&value));
        Ok(value)
    }

    /// Force a reload on next access.
    pub fn clear(&self) {
        self.slot.write().take();
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().is_some()
    }
}

/// Where prompt resources are read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PromptSource {
    /// Prompts compiled into the binary
    #[default]
    Embedded,
    /// A directory holding all three resource files
    Directory(PathBuf),
}

impl PromptSource {
    fn read(&self, name: &str) -> Result<(PathBuf, String), PromptError> {
        match self {
            PromptSource::Directory(dir) => {
                let path = dir.join(name);
                match fs::read_to_string(&path) {
                    Ok(text) => Ok((path, text)),
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        Err(PromptError::Missing { path })
                    }
                    Err(source) => Err(PromptError::Io { path, source }),
                }
            }
            PromptSource::Embedded => {
                let path = Path::new("<embedded>").join(name);
                let text = match name {
                    CRITIC_PROMPT_FILE => EMBEDDED_CRITIC_PROMPT,
                    FEWSHOT_FILE => EMBEDDED_FEWSHOT,
                    REFLECTION_PROMPT_FILE => EMBEDDED_REFLECTION_PROMPT,
                    _ => return Err(PromptError::Missing { path }),
                };
                Ok((path, text.to_string()))
            }
        }
    }
}

/// Load and check `fewshot_examples.json`.
pub fn load_fewshot_examples(source: &PromptSource) -> Result<Vec<FewShotExample>, PromptError> {
    let (path, text) = source.read(FEWSHOT_FILE)?;

    let raw: Value = serde_json::from_str(&text)
        .map_err(|e| PromptError::malformed(&path, format!("invalid JSON: {e}")))?;
    let items = match raw {
        Value::Array(items) if !items.is_empty() => items,
        Value::Array(_) => return Err(PromptError::malformed(&path, "few-shot list is empty")),
        _ => return Err(PromptError::malformed(&path, "expected a JSON list of examples")),
    };

    let examples = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<FewShotExample>(item)
                .map_err(|e| PromptError::malformed(&path, format!("example {}: {e}", i + 1)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(count = examples.len(), "Loaded few-shot examples");
    Ok(examples)
}

/// Render examples as text blocks for the critic template.
pub fn format_fewshot_examples(examples: &[FewShotExample]) -> String {
    examples
        .iter()
        .enumerate()
        .map(|(i, ex)| {
            let n = i + 1;
            let label = ex
                .label
                .clone()
                .unwrap_or_else(|| format!("Example {n}"));
            let input = serde_json::to_string_pretty(&ex.input).unwrap_or_default();
            let output = serde_json::to_string_pretty(&ex.expected_output).unwrap_or_default();
            format!(
                "--- Example {n}: {label} ---\n\nCase File:\n{input}\n\nCorrect Critic Output:\n{output}\n"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Auditor system prompt: the critic template with examples substituted.
pub fn load_critic_prompt(source: &PromptSource) -> Result<String, PromptError> {
    let (path, template) = source.read(CRITIC_PROMPT_FILE)?;
    if !template.contains(FEWSHOT_PLACEHOLDER) {
        return Err(PromptError::malformed(
            &path,
            format!("template has no {FEWSHOT_PLACEHOLDER} placeholder"),
        ));
    }

    let examples = load_fewshot_examples(source)?;
    let prompt = template.replace(FEWSHOT_PLACEHOLDER, &format_fewshot_examples(&examples));
    info!(chars = prompt.len(), "Loaded critic prompt");
    Ok(prompt)
}

/// Judge system prompt.
pub fn load_reflection_prompt(source: &PromptSource) -> Result<String, PromptError> {
    let (path, prompt) = source.read(REFLECTION_PROMPT_FILE)?;
    if prompt.trim().is_empty() {
        return Err(PromptError::malformed(&path, "prompt is empty"));
    }
    info!(chars = prompt.len(), "Loaded reflection prompt");
    Ok(prompt)
}
