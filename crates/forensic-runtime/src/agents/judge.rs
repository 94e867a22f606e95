//! Judge agent: final verdict with post-verdict enforcement.

use std::sync::Arc;

use async_trait::async_trait;
use forensic_core::{
    enforce_invariants, review_check, CriticReport, EvidenceCaseFile, ForensicVerdict, Severity,
};
use tracing::{info, warn};

use super::traits::{AgentError, CaseJudge};
use crate::gateway::ModelGateway;
use crate::prompts::{load_reflection_prompt, PromptCache, PromptError, PromptSource};

/// Produces verdicts through the judge backend.
pub struct JudgeAgent {
    gateway: ModelGateway,
    prompts: PromptSource,
    cache: Arc<PromptCache<String>>,
}

impl std::fmt::Debug for JudgeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JudgeAgent")
            .field("gateway", &self.gateway)
            .field("prompts", &self.prompts)
            .finish()
    }
}

impl JudgeAgent {
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
            .get_or_try_load(|| load_reflection_prompt(&self.prompts))
    }
}

/// Combined evidence block, pre-check flags and reminders.
pub(crate) fn build_user_prompt(
    case: &EvidenceCaseFile,
    report: &CriticReport,
    review_reason: Option<&str>,
) -> Result<String, AgentError> {
    let combined = serde_json::json!({
        "case_file": case,
        "critic_report": report,
    });
    let combined = serde_json::to_string_pretty(&combined)
        .map_err(|e| AgentError::Internal(format!("failed to serialize judge input: {e}")))?;

    let flags = match review_reason {
        Some(reason) => format!(
            "Deterministic pre-checks require human review: {reason}.\n\
             Set flagged_for_human_review to true and give a review_reason."
        ),
        None => "None.".to_string(),
    };

    Ok(format!(
        "Produce the final forensic verdict for this case.\n\n\
         ## Case File and Critic Report\n\n\
         === BEGIN INPUT ===\n{combined}\n=== END INPUT ===\n\n\
         ## Pre-Check Flags\n\n{flags}\n\n\
         ## REMINDERS\n\
         - case_id MUST be \"{case_id}\"\n\
         - deterministic_score MUST be {score}\n\
         - severity MUST be \"{severity}\"",
        case_id = case.case_id(),
        score = case.deterministic_score(),
        severity = Severity::from(case.priority()),
    ))
}

#[async_trait]
impl CaseJudge for JudgeAgent {
    async fn judge(
        &self,
        case: &EvidenceCaseFile,
        report: &CriticReport,
    ) -> Result<ForensicVerdict, AgentError> {
        let case_id = case.case_id();

        let review_reason = review_check(case, report);
        if let Some(reason) = &review_reason {
            info!(case_id, reason = %reason, "Pre-check requires human review");
        }

        let system = self.system_prompt()?;
        let user = build_user_prompt(case, report, review_reason.as_deref())?;

        let mut verdict: ForensicVerdict = self.gateway.generate(&system, &user).await?;

        let corrections = enforce_invariants(&mut verdict, case, review_reason.as_deref());
        if !corrections.is_empty() {
            warn!(
                case_id,
                corrections = corrections.len(),
                "Post-verdict corrections applied"
            );
        }

        info!(
            case_id,
            tampered = verdict.tampered,
            severity = %verdict.severity,
            confidence = verdict.confidence,
            evidence_items = verdict.evidence.len(),
            supporting_evidence = verdict.supporting_evidence().count(),
            flagged_for_human_review = verdict.flagged_for_human_review,
            "Verdict complete"
        );

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::providers::CompletionConfig;
    use crate::testing::{tampered_case, ScriptedProvider, CONFIDENT_REPORT};
    use std::time::Duration;

    fn agent(provider: Arc<ScriptedProvider>) -> JudgeAgent {
        let gateway = ModelGateway::new(
            provider,
            CompletionConfig::default(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
            },
        );
        JudgeAgent::new(gateway, PromptSource::Embedded)
    }

    fn report() -> CriticReport {
        serde_json::from_str(CONFIDENT_REPORT).unwrap()
    }

    fn verdict_json(case_id: &str, score: u8, severity: &str) -> String {
        serde_json::json!({
            "case_id": case_id,
            "tampered": true,
            "severity": severity,
            "deterministic_score": score,
            "confidence": 0.88,
            "confidence_level": "High",
            "explanation": "Metadata, fonts and compression all point to an edit after signing.",
            "evidence": [
                {"source": "metadata", "finding": "creator tool changed", "weight": "Supporting"},
                {"source": "critic", "finding": "no contradictions", "weight": "Neutral"}
            ],
            "flagged_for_human_review": false
        })
        .to_string()
    }

    #[test]
    fn test_user_prompt_has_single_block_and_reminders() {
        let prompt = build_user_prompt(&tampered_case(), &report(), Some("Borderline score (4)")).unwrap();

        assert_eq!(prompt.matches("=== BEGIN INPUT ===").count(), 1);
        let start = prompt.find("=== BEGIN INPUT ===\n").unwrap() + "=== BEGIN INPUT ===\n".len();
        let end = prompt.find("\n=== END INPUT ===").unwrap();
        let block: serde_json::Value = serde_json::from_str(&prompt[start..end]).unwrap();
        assert_eq!(block["case_file"]["case_id"], "TAMPER-001");
        assert_eq!(block["critic_report"]["confidence"], 0.95);

        assert!(prompt.contains("require human review: Borderline score (4)"));
        assert!(prompt.contains("- case_id MUST be \"TAMPER-001\""));
        assert!(prompt.contains("- deterministic_score MUST be 10"));
        assert!(prompt.contains("- severity MUST be \"High\""));
    }

    #[tokio::test]
    async fn test_wrong_fixed_fields_are_corrected() {
        let reply = verdict_json("SOMETHING-ELSE", 3, "Low");
        let provider = ScriptedProvider::new(vec![Ok(reply.as_str())]);

        let verdict = agent(provider).judge(&tampered_case(), &report()).await.unwrap();

        assert_eq!(verdict.case_id, "TAMPER-001");
        assert_eq!(verdict.deterministic_score, 10);
        assert_eq!(verdict.severity, Severity::High);
        assert!(!verdict.flagged_for_human_review);
    }

    #[tokio::test]
    async fn test_review_precheck_forces_flag() {
        let mut report = report();
        report.rerun_recommended = true;
        let reply = verdict_json("TAMPER-001", 10, "High");
        let provider = ScriptedProvider::new(vec![Ok(reply.as_str())]);

        let verdict = agent(provider.clone()).judge(&tampered_case(), &report).await.unwrap();

        assert!(verdict.flagged_for_human_review);
        assert_eq!(
            verdict.review_reason.as_deref(),
            Some("Critic recommended deterministic rerun")
        );
        assert!(provider.user_prompt(0).contains("Critic recommended deterministic rerun"));
    }
}
