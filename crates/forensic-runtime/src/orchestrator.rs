//! Pipeline orchestrator: auditor, then judge.
//!
//! Each case moves through a linear state machine:
//!
//! ```text
//! Start -> CriticRunning -> ReflectionRunning -> Done
//!               |                  |
//!               +-> Failed(critic) +-> Failed(reflection)
//! ```
//!
//! The orchestrator keeps no per-call state. One instance behind an `Arc`
//! serves any number of concurrent cases.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use forensic_core::{CriticReport, EvidenceCaseFile, ForensicVerdict};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};

use crate::agents::{AgentError, AuditorAgent, CaseAuditor, CaseJudge, JudgeAgent};
use crate::config::RuntimeConfig;
use crate::gateway::ModelGateway;
use crate::providers::Backends;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Auditor
    Critic,
    /// Judge
    Reflection,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Critic => "critic",
            Stage::Reflection => "reflection",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a case is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    CriticRunning,
    ReflectionRunning,
    Done,
    Failed(Stage),
}

impl PipelineState {
    /// The stage running in this state, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::CriticRunning => Some(Stage::Critic),
            PipelineState::ReflectionRunning => Some(Stage::Reflection),
            _ => None,
        }
    }

    fn can_advance_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Start, CriticRunning)
                | (CriticRunning, ReflectionRunning)
                | (ReflectionRunning, Done)
                | (CriticRunning, Failed(Stage::Critic))
                | (ReflectionRunning, Failed(Stage::Reflection))
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Start => f.write_str("start"),
            PipelineState::CriticRunning => f.write_str("critic_running"),
            PipelineState::ReflectionRunning => f.write_str("reflection_running"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

/// Per-case state tracker. Lives on the stack of one `validate` call.
struct Run<'a> {
    case_id: &'a str,
    state: PipelineState,
    started: Instant,
}

impl<'a> Run<'a> {
    fn new(case_id: &'a str) -> Self {
        Self {
            case_id,
            state: PipelineState::Start,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: PipelineState) {
        if self.state.can_advance_to(next) {
            debug!(case_id = self.case_id, from = %self.state, to = %next, "Pipeline transition");
        } else {
            error!(case_id = self.case_id, from = %self.state, to = %next, "Unexpected pipeline transition");
        }
        self.state = next;
    }

    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn fail(
        &mut self,
        source: AgentError,
        critic_report: Option<CriticReport>,
    ) -> PipelineError {
        let stage = self.state.stage().unwrap_or(Stage::Critic);
        self.advance(PipelineState::Failed(stage));
        let duration_ms = self.elapsed_ms();
        error!(case_id = self.case_id, stage = %stage, duration_ms, error = %source, "Pipeline failed");
        PipelineError {
            case_id: self.case_id.to_string(),
            stage,
            source,
            duration_ms,
            critic_report,
        }
    }
}

/// A case that did not reach a verdict.
#[derive(Error, Debug)]
#[error("Pipeline failed for case {case_id} at {stage} stage: {source}")]
pub struct PipelineError {
    pub case_id: String,
    pub stage: Stage,
    #[source]
    pub source: AgentError,
    pub duration_ms: f64,
    /// Audit produced before a reflection-stage failure
    pub critic_report: Option<CriticReport>,
}

/// Outcome envelope for one case.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    case_id: String,
    verdict: Option<ForensicVerdict>,
    critic_report: Option<CriticReport>,
    duration_ms: f64,
    success: bool,
    error: Option<String>,
    failed_stage: Option<Stage>,
    completed_at: DateTime<Utc>,
}

impl PipelineResult {
    fn completed(
        case_id: &str,
        critic_report: CriticReport,
        verdict: ForensicVerdict,
        duration_ms: f64,
    ) -> Self {
        Self {
            case_id: case_id.to_string(),
            verdict: Some(verdict),
            critic_report: Some(critic_report),
            duration_ms,
            success: true,
            error: None,
            failed_stage: None,
            completed_at: Utc::now(),
        }
    }

    /// Failed envelope, for batch reporting.
    pub fn failed(err: &PipelineError) -> Self {
        Self {
            case_id: err.case_id.clone(),
            verdict: None,
            critic_report: err.critic_report.clone(),
            duration_ms: err.duration_ms,
            success: false,
            error: Some(err.source.to_string()),
            failed_stage: Some(err.stage),
            completed_at: Utc::now(),
        }
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn verdict(&self) -> Option<&ForensicVerdict> {
        self.verdict.as_ref()
    }

    pub fn critic_report(&self) -> Option<&CriticReport> {
        self.critic_report.as_ref()
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.failed_stage
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Plain JSON document. `error` and `failed_stage` appear only when set.
    pub fn to_document(&self) -> Value {
        let mut doc = json!({
            "case_id": self.case_id,
            "success": self.success,
            "duration_ms": (self.duration_ms * 100.0).round() / 100.0,
            "completed_at": self.completed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "critic_report": self.critic_report,
            "verdict": self.verdict,
        });
        if let Value::Object(map) = &mut doc {
            if let Some(error) = &self.error {
                map.insert("error".to_string(), Value::String(error.clone()));
            }
            if let Some(stage) = self.failed_stage {
                map.insert("failed_stage".to_string(), Value::String(stage.to_string()));
            }
        }
        doc
    }
}

/// Runs cases through auditor and judge.
#[derive(Clone)]
pub struct ForensicValidator {
    auditor: Arc<dyn CaseAuditor>,
    judge: Arc<dyn CaseJudge>,
}

impl fmt::Debug for ForensicValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForensicValidator").finish_non_exhaustive()
    }
}

impl ForensicValidator {
    pub fn new(auditor: Arc<dyn CaseAuditor>, judge: Arc<dyn CaseJudge>) -> Self {
        Self { auditor, judge }
    }

    /// Wire the real agents to the given backends.
    pub fn from_backends(backends: &Backends, config: &RuntimeConfig) -> Self {
        let auditor = AuditorAgent::new(
            ModelGateway::from_backend(backends.auditor.clone(), &config.auditor, config.retry),
            config.prompt_source(),
        );
        let judge = JudgeAgent::new(
            ModelGateway::from_backend(backends.judge.clone(), &config.judge, config.retry),
            config.prompt_source(),
        );
        Self::new(Arc::new(auditor), Arc::new(judge))
    }

    /// Run one case through both stages.
    pub async fn validate(&self, case: &EvidenceCaseFile) -> Result<PipelineResult, PipelineError> {
        let span = info_span!("pipeline", case_id = %case.case_id());
        self.run(case).instrument(span).await
    }

    /// Run independent cases concurrently. Failures come back as failed
    /// envelopes in input order.
    pub async fn validate_many(&self, cases: &[EvidenceCaseFile]) -> Vec<PipelineResult> {
        let runs = cases.iter().map(|case| async move {
            match self.validate(case).await {
                Ok(result) => result,
                Err(err) => PipelineResult::failed(&err),
            }
        });
        futures::future::join_all(runs).await
    }

    async fn run(&self, case: &EvidenceCaseFile) -> Result<PipelineResult, PipelineError> {
        let mut run = Run::new(case.case_id());
        info!(
            case_id = case.case_id(),
            deterministic_score = case.deterministic_score(),
            priority = %case.priority(),
            "Pipeline started"
        );

        run.advance(PipelineState::CriticRunning);
        let report = match guarded(self.auditor.audit(case)).await {
            Ok(report) => report,
            Err(err) => return Err(run.fail(err, None)),
        };

        run.advance(PipelineState::ReflectionRunning);
        let verdict = match guarded(self.judge.judge(case, &report)).await {
            Ok(verdict) => verdict,
            Err(err) => return Err(run.fail(err, Some(report))),
        };

        run.advance(PipelineState::Done);
        let duration_ms = run.elapsed_ms();
        info!(
            case_id = case.case_id(),
            tampered = verdict.tampered,
            severity = %verdict.severity,
            flagged_for_human_review = verdict.flagged_for_human_review,
            duration_ms,
            "Pipeline complete"
        );

        Ok(PipelineResult::completed(
            case.case_id(),
            report,
            verdict,
            duration_ms,
        ))
    }
}

/// Turn a panic inside an agent into an internal error.
async fn guarded<T, F>(stage: F) -> Result<T, AgentError>
where
    F: std::future::Future<Output = Result<T, AgentError>>,
{
    match AssertUnwindSafe(stage).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(AgentError::Internal(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("agent panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("agent panicked: {s}")
    } else {
        "agent panicked".to_string()
    }
}
