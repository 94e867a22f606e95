//! Auditor agent: evidence consistency audit.

use std::sync::Arc;

use async_trait::async_trait;
use forensic_core::{preflight_check, CriticReport, EvidenceCaseFile};
use tracing::{debug, info, warn};

use super::traits::{AgentError, CaseAuditor};
use crate::gateway::ModelGateway;
use crate::prompts::{load_critic_prompt, PromptCache, PromptError, PromptSource};

/// Audits case files through the auditor backend.
pub struct AuditorAgent {
    gateway: ModelGateway,
    prompts: PromptSource,
    cache: Arc<PromptCache<String>>,
}

impl std::fmt::Debug for AuditorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditorAgent")
            .field("gateway", &self.gateway)
            .field("prompts", &self.prompts)
            .finish()
    }
}

impl AuditorAgent {
    pub fn new(gateway: ModelGateway, prompts: PromptSource) -> Self {
        Self {
            gateway,
            prompts,
            cache: Arc::new(PromptCache::new()),
        }
    }

    /// Share a prompt cache with other instances.
    pub fn with_cache(mut self, cache: Arc<PromptCache<String>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<PromptCache<String>> {
        &self.cache
    }

    fn system_prompt(&self) -> Result<Arc<String>, PromptError> {
        self.cache
            .get_or_try_load(|| load_critic_prompt(&self.prompts))
    }
}

/// Serialized case plus the preflight block.
pub(crate) fn build_user_prompt(
    case: &EvidenceCaseFile,
    preflight: Option<&str>,
) -> Result<String, AgentError> {
    let case_json = case
        .to_prompt_json()
        .map_err(|e| AgentError::Internal(format!("failed to serialize case file: {e}")))?;

    let warnings = match preflight {
        Some(warning) => format!(
            "Deterministic preflight flagged the following. Take them into account:\n- {}",
            warning.split("; ").collect::<Vec<_>>().join("\n- ")
        ),
        None => "None. Deterministic sanity checks passed.".to_string(),
    };

    Ok(format!(
        "Audit the following evidence case file.\n\n\
         ## Evidence Case File\n\n{case_json}\n\n\
         ## Preflight Warnings\n\n{warnings}\n\n\
         Return your audit as a single JSON object."
    ))
}

#[async_trait]
impl CaseAuditor for AuditorAgent {
    async fn audit(&self, case: &EvidenceCaseFile) -> Result<CriticReport, AgentError> {
        let case_id = case.case_id();

        let preflight = preflight_check(case);
        if let Some(warnings) = &preflight {
            warn!(case_id, warnings = %warnings, "Preflight warnings");
        }

        let system = self.system_prompt()?;
        let user = build_user_prompt(case, preflight.as_deref())?;

        let mut report: CriticReport = self.gateway.generate(&system, &user).await?;

        if let Some(previous) = report.normalize_confidence_level() {
            debug!(
                case_id,
                before = %previous,
                after = %report.confidence_level,
                confidence = report.confidence,
                "Normalized confidence_level"
            );
        }

        info!(
            case_id,
            rule_consistency = report.rule_consistency,
            contradictions = report.contradictions.len(),
            high_impact = report.high_impact_contradictions(),
            reinforcement = report.reinforcement.len(),
            confidence = report.confidence,
            rerun_recommended = report.rerun_recommended,
            "Audit complete"
        );

        Ok(report)
    }
}
