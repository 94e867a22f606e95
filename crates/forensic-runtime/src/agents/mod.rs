//! The two model-backed agents.
//!
//! The auditor checks a case file for internal consistency and returns a
//! [`CriticReport`](forensic_core::CriticReport). The judge combines the
//! case file and that report into a
//! [`ForensicVerdict`](forensic_core::ForensicVerdict). Both are reached
//! through traits so the orchestrator can run against stubs.

mod auditor;
mod judge;
mod traits;

pub use auditor::AuditorAgent;
pub use judge::JudgeAgent;
pub use traits::{AgentError, CaseAuditor, CaseJudge};
