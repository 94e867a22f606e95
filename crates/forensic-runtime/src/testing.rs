//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use forensic_core::EvidenceCaseFile;
use parking_lot::Mutex;

use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};

/// Replays scripted replies in order and records every request.
/// Once the script runs out it answers with an empty response.
pub(crate) struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub(crate) fn new(replies: Vec<Result<&str, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn system_prompt(&self, call: usize) -> String {
        self.requests.lock()[call][0].content.clone()
    }

    pub(crate) fn user_prompt(&self, call: usize) -> String {
        self.requests.lock()[call][1].content.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().push(messages);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or(Err(ProviderError::EmptyResponse));
        reply.map(|content| CompletionResponse {
            content,
            usage: TokenUsage::default(),
            model: config.model.clone(),
            stop_reason: None,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Scores (6, 5, 4) with signals everywhere: score 10, High.
pub(crate) fn tampered_case() -> EvidenceCaseFile {
    EvidenceCaseFile::builder("TAMPER-001")
        .metadata(6, &["creator_tool_changed"])
        .font(5, &["mixed_font_subsets"])
        .compression(4, &["double_compression"])
        .build()
        .unwrap()
}

pub(crate) const CONFIDENT_REPORT: &str = r#"{
    "rule_consistency": true,
    "contradictions": [],
    "reinforcement": ["metadata and compression agree"],
    "confidence": 0.95,
    "confidence_level": "VeryHigh",
    "confidence_reason": "three modules corroborate",
    "audit_notes": "consistent",
    "rerun_recommended": false
}"#;
