//! Agent traits and common types.

use async_trait::async_trait;
use forensic_core::{CriticReport, EvidenceCaseFile, ForensicVerdict};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::prompts::PromptError;

/// Errors from agents.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Resource(#[from] PromptError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Correlation id of the failed model call, if one was made.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            AgentError::Gateway(err) => err.request_id(),
            _ => None,
        }
    }
}

/// Stage 1: audit a case file for internal consistency.
///
/// # Contract
/// - MUST NOT mutate the case
/// - MUST NOT assign tamper status
#[async_trait]
pub trait CaseAuditor: Send + Sync {
    async fn audit(&self, case: &EvidenceCaseFile) -> Result<CriticReport, AgentError>;
}

/// Stage 2: produce the final verdict.
///
/// # Contract
/// The returned verdict has passed post-verdict enforcement: its fixed
/// fields agree with `case`.
#[async_trait]
pub trait CaseJudge: Send + Sync {
    async fn judge(
        &self,
        case: &EvidenceCaseFile,
        report: &CriticReport,
    ) -> Result<ForensicVerdict, AgentError>;
}
