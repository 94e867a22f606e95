//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forensic_core::EvidenceCaseFile;
use forensic_runtime::{
    AuditorAgent, ChatMessage, CompletionConfig, CompletionResponse, ForensicValidator,
    JudgeAgent, LlmProvider, ModelGateway, PromptSource, ProviderError, RetryPolicy, TokenUsage,
};
use parking_lot::Mutex;
use tracing::subscriber::DefaultGuard;

/// Backend stub that replays canned replies and records each request.
pub struct StubBackend {
    name: &'static str,
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl StubBackend {
    pub fn new(name: &'static str, replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn user_prompt(&self, call: usize) -> String {
        self.requests.lock()[call]
            .iter()
            .find(|m| !m.is_system())
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for StubBackend {
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
            stop_reason: Some("end_turn".to_string()),
        })
    }

    fn name(&self) -> &str {
        self.name
    }
}

fn gateway(backend: Arc<StubBackend>) -> ModelGateway {
    ModelGateway::new(
        backend,
        CompletionConfig::default(),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        },
    )
}

/// Validator wired to the shipped prompts and two stub backends.
pub fn validator(auditor: Arc<StubBackend>, judge: Arc<StubBackend>) -> ForensicValidator {
    ForensicValidator::new(
        Arc::new(AuditorAgent::new(gateway(auditor), PromptSource::Embedded)),
        Arc::new(JudgeAgent::new(gateway(judge), PromptSource::Embedded)),
    )
}

/// Scores (6, 5, 4) with signals in every module: score 10, High.
pub fn tampered_case() -> EvidenceCaseFile {
    EvidenceCaseFile::builder("INV-2291")
        .metadata(6, &["creator_tool_changed", "modify_after_sign"])
        .font(5, &["mixed_font_subsets"])
        .compression(4, &["double_jpeg_compression"])
        .build()
        .expect("fixture case is consistent")
}

pub fn confident_report() -> String {
    serde_json::json!({
        "rule_consistency": true,
        "contradictions": [],
        "reinforcement": ["metadata edit and recompression point the same way"],
        "confidence": 0.95,
        "confidence_level": "VeryHigh",
        "confidence_reason": "all three modules corroborate each other",
        "audit_notes": "Scores and signals are consistent.",
        "rerun_recommended": false
    })
    .to_string()
}

pub fn verdict_reply(case_id: &str, score: u8, severity: &str) -> String {
    serde_json::json!({
        "case_id": case_id,
        "tampered": true,
        "severity": severity,
        "deterministic_score": score,
        "confidence": 0.9,
        "confidence_level": "VeryHigh",
        "explanation": "The document was edited after signing and recompressed.",
        "evidence": [
            {"source": "metadata", "finding": "modified after signature", "weight": "Supporting"},
            {"source": "compression", "finding": "double JPEG compression", "weight": "Supporting"}
        ],
        "flagged_for_human_review": false
    })
    .to_string()
}

/// Warn-level log lines written while the guard is alive on this thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
