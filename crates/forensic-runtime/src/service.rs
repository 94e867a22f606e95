//! Inbound entry point: raw JSON document in, result or classified error out.

use forensic_core::{CaseError, EvidenceCaseFile};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::orchestrator::{ForensicValidator, PipelineError, PipelineResult};

/// Caller-visible failure buckets.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The inbound case file was rejected before any model call.
    #[error("Invalid case file: {0}")]
    Validation(#[source] CaseError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CaseError> for ServiceError {
    fn from(err: CaseError) -> Self {
        match err {
            // The schema itself failed to build: not the caller's fault.
            CaseError::SchemaUnavailable(e) => ServiceError::Internal(e.to_string()),
            other => ServiceError::Validation(other),
        }
    }
}

impl ServiceError {
    /// HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 422,
            ServiceError::Pipeline(_) => 502,
            ServiceError::Internal(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::Pipeline(_) => "pipeline",
            ServiceError::Internal(_) => "internal",
        }
    }

    /// Plain JSON error document.
    pub fn to_document(&self) -> Value {
        match self {
            ServiceError::Validation(err) => json!({
                "error": self.kind(),
                "status": self.status_code(),
                "messages": err.messages(),
            }),
            ServiceError::Pipeline(err) => {
                let mut doc = json!({
                    "error": self.kind(),
                    "status": self.status_code(),
                    "case_id": err.case_id,
                    "failed_stage": err.stage,
                    "message": err.source.to_string(),
                });
                if let (Some(request_id), Value::Object(map)) = (err.source.request_id(), &mut doc) {
                    map.insert("request_id".to_string(), Value::String(request_id.to_string()));
                }
                doc
            }
            ServiceError::Internal(message) => json!({
                "error": self.kind(),
                "status": self.status_code(),
                "message": message,
            }),
        }
    }
}

/// Validate an inbound document and run it through the pipeline.
pub async fn validate_document(
    validator: &ForensicValidator,
    document: &Value,
) -> Result<PipelineResult, ServiceError> {
    let case = EvidenceCaseFile::from_value(document).map_err(|err| {
        warn!(errors = ?err.messages(), "Rejected inbound case file");
        ServiceError::from(err)
    })?;
    Ok(validator.validate(&case).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentError;
    use crate::gateway::GatewayError;
    use crate::orchestrator::Stage;
    use forensic_core::SchemaError;

    #[test]
    fn test_status_codes() {
        let validation = ServiceError::from(CaseError::Schema(vec!["font.score: too big".into()]));
        assert_eq!(validation.status_code(), 422);
        assert_eq!(
            validation.to_document()["messages"],
            json!(["font.score: too big"])
        );

        let internal = ServiceError::from(CaseError::SchemaUnavailable(SchemaError::Compile {
            type_name: "EvidenceCaseFile".into(),
            message: "bad".into(),
        }));
        assert_eq!(internal.status_code(), 500);
        assert_eq!(internal.kind(), "internal");

        let pipeline = ServiceError::from(PipelineError {
            case_id: "X".into(),
            stage: Stage::Critic,
            source: AgentError::Internal("boom".into()),
            duration_ms: 1.0,
            critic_report: None,
        });
        assert_eq!(pipeline.status_code(), 502);
        let doc = pipeline.to_document();
        assert_eq!(doc["failed_stage"], "critic");
        assert_eq!(doc["case_id"], "X");
        assert!(doc.get("request_id").is_none());
    }

    #[test]
    fn test_gateway_failure_carries_request_id() {
        let err = ServiceError::from(PipelineError {
            case_id: "X".into(),
            stage: Stage::Reflection,
            source: AgentError::Gateway(GatewayError::Exhausted {
                request_id: "1a2b3c4d".into(),
                model: "claude-sonnet-4-20250514".into(),
                attempts: 3,
                last_error: "No valid JSON found in model output".into(),
            }),
            duration_ms: 12.5,
            critic_report: None,
        });

        let doc = err.to_document();
        assert_eq!(doc["request_id"], "1a2b3c4d");
        assert_eq!(doc["failed_stage"], "reflection");
    }
}
