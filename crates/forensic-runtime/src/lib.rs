//! # forensic-runtime
//!
//! LLM orchestration for the forensic verdict pipeline.
//!
//! A validated [`forensic_core::EvidenceCaseFile`] goes through two model
//! calls:
//!
//! 1. the **auditor** checks the evidence for internal consistency and
//!    returns a [`forensic_core::CriticReport`]
//! 2. the **judge** turns case and report into a
//!    [`forensic_core::ForensicVerdict`], after which the fixed fields are
//!    forced back to the deterministic values
//!
//! Both calls go through a [`ModelGateway`] that extracts JSON from the
//! model text, validates it against the schema of the target type, and
//! retries with a correction prompt when the output is malformed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use forensic_runtime::{Backends, ForensicValidator, RuntimeConfig};
//!
//! let config = RuntimeConfig::load(None)?;
//! let backends = Backends::from_config(&config)?;
//! let validator = ForensicValidator::from_backends(&backends, &config);
//!
//! let result = validator.validate(&case).await?;
//! println!("{}", result.to_document());
//! backends.shutdown().await;
//! ```

pub mod agents;
pub mod config;
pub mod gateway;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod service;

#[cfg(test)]
mod testing;

pub use agents::{AgentError, AuditorAgent, CaseAuditor, CaseJudge, JudgeAgent};
pub use config::{BackendConfig, ConfigError, ProviderKind, RetryPolicy, RuntimeConfig};
pub use gateway::{GatewayError, ModelGateway, StructuredOutput};
pub use orchestrator::{ForensicValidator, PipelineError, PipelineResult, PipelineState, Stage};
pub use prompts::{PromptCache, PromptError, PromptSource};
pub use providers::{
    create_provider, ApiCredential, Backends, ChatMessage, CompletionConfig, CompletionResponse,
    LlmProvider, ProviderError, TokenUsage,
};
pub use service::{validate_document, ServiceError};
