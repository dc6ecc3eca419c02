//! Collaborator contracts for the conditional reasoning levels.
//!
//! Context, truth, and risk are external agents reached through narrow
//! typed traits. Every call carries its deadline in-contract; cancellation
//! is cooperative and a missed deadline is a skipped level, never an error
//! that aborts the pipeline.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};

use crate::action::Action;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextReport {
    pub relevant_memories: Vec<String>,
    pub context_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthReport {
    pub truth_score: f64,
    pub confidence: f64,
    pub bias_detected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub execution_feasible: bool,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait ContextCollaborator: Send + Sync {
    fn name(&self) -> &str;
    async fn retrieve_context(
        &self,
        action: &Action,
        originating_agent: &str,
        deadline_ms: u64,
    ) -> Result<ContextReport>;
}

#[async_trait]
pub trait TruthCollaborator: Send + Sync {
    fn name(&self) -> &str;
    async fn verify(&self, action_description: &str, deadline_ms: u64) -> Result<TruthReport>;
}

#[async_trait]
pub trait RiskCollaborator: Send + Sync {
    fn name(&self) -> &str;
    async fn assess_risk(&self, action: &Action, deadline_ms: u64) -> Result<RiskReport>;
}

/// Outcome of one deadline-bounded consultation.
#[derive(Debug)]
pub enum ConsultOutcome<T> {
    Completed(T),
    TimedOut,
    Failed(String),
}

/// Run a consultation against its budget. Returning at the boundary still
/// counts as completed; only overrunning it does not.
pub async fn consult<T>(
    budget_ms: u64,
    fut: impl std::future::Future<Output = Result<T>>,
) -> ConsultOutcome<T> {
    match timeout(Duration::from_millis(budget_ms), fut).await {
        Ok(Ok(value)) => ConsultOutcome::Completed(value),
        Ok(Err(err)) => ConsultOutcome::Failed(err.to_string()),
        Err(_) => ConsultOutcome::TimedOut,
    }
}

// =============================================================================
// Stub collaborators
// =============================================================================
//
// Fixed-answer collaborators for standalone operation and tests. A real
// deployment wires domain agents behind the same traits.

#[derive(Debug, Clone)]
pub struct StubContext {
    pub agent_name: String,
    pub score: f64,
    pub delay_ms: u64,
}

impl StubContext {
    pub fn new(agent_name: &str, score: f64) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            score,
            delay_ms: 0,
        }
    }
}

#[async_trait]
impl ContextCollaborator for StubContext {
    fn name(&self) -> &str {
        &self.agent_name
    }

    async fn retrieve_context(
        &self,
        _action: &Action,
        _originating_agent: &str,
        _deadline_ms: u64,
    ) -> Result<ContextReport> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(ContextReport {
            relevant_memories: Vec::new(),
            context_score: self.score,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StubTruth {
    pub agent_name: String,
    pub truth_score: f64,
    pub confidence: f64,
    pub delay_ms: u64,
}

impl StubTruth {
    pub fn new(agent_name: &str, truth_score: f64, confidence: f64) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            truth_score,
            confidence,
            delay_ms: 0,
        }
    }
}

#[async_trait]
impl TruthCollaborator for StubTruth {
    fn name(&self) -> &str {
        &self.agent_name
    }

    async fn verify(&self, _action_description: &str, _deadline_ms: u64) -> Result<TruthReport> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(TruthReport {
            truth_score: self.truth_score,
            confidence: self.confidence,
            bias_detected: false,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StubRisk {
    pub agent_name: String,
    pub risk_score: f64,
    pub delay_ms: u64,
}

impl StubRisk {
    pub fn new(agent_name: &str, risk_score: f64) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            risk_score,
            delay_ms: 0,
        }
    }

    fn level_for(score: f64) -> RiskLevel {
        if score < 0.33 {
            RiskLevel::Low
        } else if score < 0.66 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

#[async_trait]
impl RiskCollaborator for StubRisk {
    fn name(&self) -> &str {
        &self.agent_name
    }

    async fn assess_risk(&self, _action: &Action, _deadline_ms: u64) -> Result<RiskReport> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(RiskReport {
            risk_level: Self::level_for(self.risk_score),
            risk_score: self.risk_score,
            execution_feasible: self.risk_score < 0.9,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn test_consult_within_budget_completes() {
        let stub = StubContext::new("ContextAgent", 0.8);
        let action = Action::new("trade", Map::new(), "Kyle");
        let outcome = consult(80, stub.retrieve_context(&action, "Kyle", 80)).await;
        assert!(matches!(outcome, ConsultOutcome::Completed(r) if r.context_score == 0.8));
    }

    #[tokio::test]
    async fn test_consult_past_budget_times_out() {
        let mut stub = StubContext::new("ContextAgent", 0.8);
        stub.delay_ms = 200;
        let action = Action::new("trade", Map::new(), "Kyle");
        let outcome = consult(20, stub.retrieve_context(&action, "Kyle", 20)).await;
        assert!(matches!(outcome, ConsultOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_consult_error_reported_as_failed() {
        struct Exploding;
        #[async_trait]
        impl TruthCollaborator for Exploding {
            fn name(&self) -> &str {
                "Exploding"
            }
            async fn verify(&self, _d: &str, _ms: u64) -> Result<TruthReport> {
                anyhow::bail!("verifier crashed")
            }
        }
        let outcome = consult(50, Exploding.verify("claim", 50)).await;
        assert!(matches!(outcome, ConsultOutcome::Failed(msg) if msg.contains("crashed")));
    }
}
