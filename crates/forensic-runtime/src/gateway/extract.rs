//! JSON extraction from free-form model text.
//!
//! Models asked for "JSON only" still wrap answers in prose or markdown
//! fences. Three strategies are tried in order:
//!
//! 1. the whole response, trimmed
//! 2. the first fenced code block (```` ```json ```` or bare ```` ``` ````)
//! 3. the first balanced top-level `{...}` span

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

lazy_static! {
    /// First fenced block, optionally tagged `json`.
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").unwrap();
}

/// Longest prefix of model output quoted in an error.
const PREVIEW_CHARS: usize = 200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Model returned an empty response")]
    Empty,

    #[error("No valid JSON found in model output. Preview: {preview}")]
    NotFound { preview: String },
}

/// Extract the first JSON document from `text`.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(block) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str::<Value>(block.as_str().trim()) {
            return Ok(value);
        }
    }

    if let Some(span) = first_object_span(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            return Ok(value);
        }
    }

    Err(ExtractError::NotFound {
        preview: preview(trimmed),
    })
}

/// First balanced `{...}` span. Braces inside string literals do not count
/// and backslash escapes are honoured.
fn first_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

pub(crate) fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}
