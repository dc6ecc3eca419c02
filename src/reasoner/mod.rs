//! Hierarchical reasoning orchestrator.
//!
//! Every action runs L1 ethics and L5 synthesis. Between them sit three
//! conditional consultations (context, truth, risk) that fire from
//! declarative trigger rules and run concurrently, each against its own
//! deadline, all under the global decide budget. A violation at L1 is an
//! absolute override: nothing later in the pipeline can un-deny it.

pub mod collaborators;
pub mod synthesis;
pub mod triggers;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use futures_util::future::join3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};

use crate::action::Action;
use crate::config::Config;
use crate::ethics::EthicsRegistry;
use crate::logging::{log_decision, log_verdict, ProfileScope};
use crate::watchdog::{HealthMonitor, Observation};
use collaborators::{
    consult, ConsultOutcome, ContextCollaborator, RiskCollaborator, TruthCollaborator,
};
use synthesis::{synthesize, Decision};
use triggers::{FastPathPolicy, LevelTriggers};

const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LevelStatus {
    Completed,
    Skipped { reason: String },
    Failed { reason: String },
}

/// Snapshot of one executed level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelResult {
    pub level: u8,
    pub name: String,
    #[serde(flatten)]
    pub status: LevelStatus,
    pub score: f64,
    pub detail: Value,
}

impl LevelResult {
    fn completed(level: u8, name: &str, score: f64, detail: Value) -> Self {
        Self {
            level,
            name: name.to_string(),
            status: LevelStatus::Completed,
            score,
            detail,
        }
    }

    fn skipped(level: u8, name: &str, reason: &str) -> Self {
        Self {
            level,
            name: name.to_string(),
            status: LevelStatus::Skipped {
                reason: reason.to_string(),
            },
            score: NEUTRAL_SCORE,
            detail: Value::Null,
        }
    }

    fn failed(level: u8, name: &str, reason: &str) -> Self {
        Self {
            level,
            name: name.to_string(),
            status: LevelStatus::Failed {
                reason: reason.to_string(),
            },
            score: NEUTRAL_SCORE,
            detail: Value::Null,
        }
    }
}

/// The auditable record of one decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub correlation_id: String,
    pub action_type: String,
    pub agent: String,
    pub levels_executed: Vec<u8>,
    pub levels: Vec<LevelResult>,
    pub path: Vec<String>,
    pub warnings: Vec<String>,
    pub violations: Vec<String>,
    pub decision: Decision,
    pub confidence: f64,
    pub total_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TraceSummary {
    correlation_id: String,
    decision: Decision,
    confidence: f64,
    compliance: f64,
    duration_ms: f64,
    fast_path: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerStats {
    pub total_decisions: u64,
    pub approved: u64,
    pub denied: u64,
    pub escalated: u64,
    pub fast_path_taken: u64,
    pub avg_duration_ms: f64,
    pub avg_confidence: f64,
    pub avg_compliance: f64,
}

pub struct HierarchicalReasoner {
    cfg: Config,
    ethics: Arc<EthicsRegistry>,
    monitor: Arc<Mutex<HealthMonitor>>,
    fast_path: FastPathPolicy,
    triggers: LevelTriggers,
    context: Option<Arc<dyn ContextCollaborator>>,
    truth: Option<Arc<dyn TruthCollaborator>>,
    risk: Option<Arc<dyn RiskCollaborator>>,
    history: Mutex<VecDeque<TraceSummary>>,
    degraded: AtomicBool,
}

impl HierarchicalReasoner {
    pub fn new(cfg: Config, ethics: Arc<EthicsRegistry>, monitor: Arc<Mutex<HealthMonitor>>) -> Self {
        let fast_path = FastPathPolicy::from_config(&cfg);
        Self {
            cfg,
            ethics,
            monitor,
            fast_path,
            triggers: LevelTriggers::default(),
            context: None,
            truth: None,
            risk: None,
            history: Mutex::new(VecDeque::new()),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn with_context(mut self, c: Arc<dyn ContextCollaborator>) -> Self {
        self.context = Some(c);
        self
    }

    pub fn with_truth(mut self, t: Arc<dyn TruthCollaborator>) -> Self {
        self.truth = Some(t);
        self
    }

    pub fn with_risk(mut self, r: Arc<dyn RiskCollaborator>) -> Self {
        self.risk = Some(r);
        self
    }

    /// Backpressure mode: sample out a share of consultations until the pass
    /// rate recovers.
    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    fn is_isolated(&self, agent_name: &str) -> bool {
        self.monitor
            .lock()
            .map(|m| m.is_isolated(agent_name))
            .unwrap_or(false)
    }

    fn observe(&self, agent_name: &str, success: bool, latency_ms: f64) {
        if let Ok(mut m) = self.monitor.lock() {
            m.record(
                agent_name,
                Observation {
                    success,
                    latency_ms,
                    violation: None,
                },
            );
        }
    }

    /// Decide on one action. Only malformed input errors out; every other
    /// failure is absorbed into the trace.
    pub async fn decide(&self, action: &Action, force_full: bool) -> Result<ReasoningTrace> {
        action.validate()?;
        let started = Instant::now();
        let _prof = ProfileScope::new("decide");

        let mut path: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut levels: Vec<LevelResult> = Vec::new();

        // L1 Ethics, always.
        let verdict = self.ethics.evaluate(action);
        log_verdict(
            &action.correlation_id,
            verdict.approved,
            verdict.compliance_score,
            &verdict.violations,
        );
        path.push("L1 Ethics".to_string());
        warnings.extend(verdict.warnings.iter().cloned());
        let violations = verdict.violations.clone();
        levels.push(LevelResult::completed(
            1,
            "ethics",
            verdict.compliance_score,
            json!(verdict.clone()),
        ));

        // Absolute override: violations deny regardless of anything later.
        if !verdict.approved {
            path.push("L1 violation: absolute override".to_string());
            path.push("L5 Synthesis".to_string());
            levels.push(LevelResult::completed(5, "synthesis", 1.0, Value::Null));
            return Ok(self.finish(
                action,
                levels,
                path,
                warnings,
                violations,
                Decision::Denied,
                1.0,
                started,
                false,
            ));
        }

        // Fast path: clean verdict on a simple read-like action.
        if self.fast_path.eligible(action, &verdict, force_full) {
            path.push("Fast path: no edge cases".to_string());
            path.push("L5 Synthesis".to_string());
            let (decision, confidence) = synthesize(&[(1, verdict.compliance_score)]);
            levels.push(LevelResult::completed(5, "synthesis", confidence, Value::Null));
            return Ok(self.finish(
                action,
                levels,
                path,
                warnings,
                violations,
                decision,
                confidence,
                started,
                true,
            ));
        }

        let l2_fires = force_full || self.fires_sampled(self.triggers.l2_fires(action), force_full);
        let l3_fires = force_full || self.fires_sampled(self.triggers.l3_fires(action), force_full);
        let l4_fires =
            force_full || self.fires_sampled(self.triggers.l4_fires(action, &verdict), force_full);

        // Conditional consultations run concurrently, joined before L5; the
        // whole group shares what remains of the global budget.
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let remaining = Duration::from_millis(self.cfg.reason_budget_ms.saturating_sub(elapsed_ms));
        let consultations = join3(
            self.run_l2(action, l2_fires),
            self.run_l3(action, l3_fires),
            self.run_l4(action, l4_fires),
        );

        let mut budget_exceeded = false;
        match timeout(remaining, consultations).await {
            Ok((r2, r3, r4)) => {
                for result in [r2, r3, r4].into_iter().flatten() {
                    match &result.status {
                        LevelStatus::Completed => {
                            path.push(level_label(result.level).to_string());
                        }
                        LevelStatus::Skipped { reason } => {
                            path.push(format!("{} (skipped)", level_label(result.level)));
                            warnings.push(format!(
                                "L{} skipped: {}, neutral score assumed",
                                result.level, reason
                            ));
                        }
                        LevelStatus::Failed { reason } => {
                            path.push(format!("{} (failed)", level_label(result.level)));
                            warnings.push(format!(
                                "L{} failed: {}, neutral score assumed",
                                result.level, reason
                            ));
                        }
                    }
                    levels.push(result);
                }
            }
            Err(_) => {
                budget_exceeded = true;
                for (level, fires) in [(2u8, l2_fires), (3, l3_fires), (4, l4_fires)] {
                    if fires {
                        path.push(format!("{} (aborted)", level_label(level)));
                        levels.push(LevelResult::skipped(
                            level,
                            level_name(level),
                            "budget_exceeded",
                        ));
                    }
                }
                warnings.push(format!(
                    "global budget of {} ms exceeded, escalating",
                    self.cfg.reason_budget_ms
                ));
            }
        }

        path.push("L5 Synthesis".to_string());
        let scores: Vec<(u8, f64)> = levels.iter().map(|l| (l.level, l.score)).collect();
        let (mut decision, confidence) = synthesize(&scores);
        if budget_exceeded {
            decision = Decision::Escalate;
        }
        levels.push(LevelResult::completed(5, "synthesis", confidence, Value::Null));

        Ok(self.finish(
            action,
            levels,
            path,
            warnings,
            violations,
            decision,
            confidence,
            started,
            false,
        ))
    }

    /// In degraded mode a share of fired consultations is shed to recover
    /// the pass cadence. Never applies to forced-full decisions.
    fn fires_sampled(&self, fires: bool, force_full: bool) -> bool {
        if !fires {
            return false;
        }
        if force_full || !self.degraded.load(Ordering::SeqCst) {
            return true;
        }
        rand::thread_rng().gen_bool(0.5)
    }

    async fn run_l2(&self, action: &Action, fires: bool) -> Option<LevelResult> {
        if !fires {
            return None;
        }
        let Some(collab) = &self.context else {
            return Some(LevelResult::skipped(2, "context", "unavailable"));
        };
        if self.is_isolated(collab.name()) {
            return Some(LevelResult::skipped(2, "context", "agent_isolated"));
        }
        let budget = self.cfg.l2_budget_ms;
        let started = Instant::now();
        let outcome = consult(
            budget,
            collab.retrieve_context(action, &action.agent, budget),
        )
        .await;
        let latency = started.elapsed().as_secs_f64() * 1000.0;
        Some(match outcome {
            ConsultOutcome::Completed(report) => {
                self.observe(collab.name(), true, latency);
                LevelResult::completed(2, "context", report.context_score, json!(report))
            }
            ConsultOutcome::TimedOut => {
                self.observe(collab.name(), false, latency);
                LevelResult::skipped(2, "context", "timeout")
            }
            ConsultOutcome::Failed(reason) => {
                self.observe(collab.name(), false, latency);
                LevelResult::failed(2, "context", &reason)
            }
        })
    }

    async fn run_l3(&self, action: &Action, fires: bool) -> Option<LevelResult> {
        if !fires {
            return None;
        }
        let Some(collab) = &self.truth else {
            return Some(LevelResult::skipped(3, "truth", "unavailable"));
        };
        if self.is_isolated(collab.name()) {
            return Some(LevelResult::skipped(3, "truth", "agent_isolated"));
        }
        let budget = self.cfg.l3_budget_ms;
        let started = Instant::now();
        let outcome = consult(budget, collab.verify(&action.text(), budget)).await;
        let latency = started.elapsed().as_secs_f64() * 1000.0;
        Some(match outcome {
            ConsultOutcome::Completed(report) => {
                self.observe(collab.name(), true, latency);
                let score = report.truth_score * report.confidence;
                LevelResult::completed(3, "truth", score, json!(report))
            }
            ConsultOutcome::TimedOut => {
                self.observe(collab.name(), false, latency);
                LevelResult::skipped(3, "truth", "timeout")
            }
            ConsultOutcome::Failed(reason) => {
                self.observe(collab.name(), false, latency);
                LevelResult::failed(3, "truth", &reason)
            }
        })
    }

    async fn run_l4(&self, action: &Action, fires: bool) -> Option<LevelResult> {
        if !fires {
            return None;
        }
        let Some(collab) = &self.risk else {
            return Some(LevelResult::skipped(4, "risk", "unavailable"));
        };
        if self.is_isolated(collab.name()) {
            return Some(LevelResult::skipped(4, "risk", "agent_isolated"));
        }
        let budget = self.cfg.l4_budget_ms;
        let started = Instant::now();
        let outcome = consult(budget, collab.assess_risk(action, budget)).await;
        let latency = started.elapsed().as_secs_f64() * 1000.0;
        Some(match outcome {
            ConsultOutcome::Completed(report) => {
                self.observe(collab.name(), true, latency);
                let score = 1.0 - report.risk_score;
                LevelResult::completed(4, "risk", score, json!(report))
            }
            ConsultOutcome::TimedOut => {
                self.observe(collab.name(), false, latency);
                LevelResult::skipped(4, "risk", "timeout")
            }
            ConsultOutcome::Failed(reason) => {
                self.observe(collab.name(), false, latency);
                LevelResult::failed(4, "risk", &reason)
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        action: &Action,
        levels: Vec<LevelResult>,
        path: Vec<String>,
        warnings: Vec<String>,
        violations: Vec<String>,
        decision: Decision,
        confidence: f64,
        started: Instant,
        fast_path: bool,
    ) -> ReasoningTrace {
        let total_duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let levels_executed: Vec<u8> = levels.iter().map(|l| l.level).collect();
        let compliance = levels
            .iter()
            .find(|l| l.level == 1)
            .map(|l| l.score)
            .unwrap_or(0.0);

        let trace = ReasoningTrace {
            correlation_id: action.correlation_id.clone(),
            action_type: action.action_type.clone(),
            agent: action.agent.clone(),
            levels_executed,
            levels,
            path,
            warnings,
            violations,
            decision,
            confidence,
            total_duration_ms,
        };

        log_decision(
            &trace.correlation_id,
            &trace.agent,
            trace.decision.as_str(),
            trace.confidence,
            &trace.levels_executed,
            &trace.path,
            &action.input_hash(),
        );

        if let Ok(mut history) = self.history.lock() {
            if history.len() >= self.cfg.trace_history_cap {
                history.pop_front();
            }
            history.push_back(TraceSummary {
                correlation_id: trace.correlation_id.clone(),
                decision: trace.decision,
                confidence: trace.confidence,
                compliance,
                duration_ms: trace.total_duration_ms,
                fast_path,
            });
        }

        trace
    }

    pub fn stats(&self) -> ReasonerStats {
        let Ok(history) = self.history.lock() else {
            return ReasonerStats {
                total_decisions: 0,
                approved: 0,
                denied: 0,
                escalated: 0,
                fast_path_taken: 0,
                avg_duration_ms: 0.0,
                avg_confidence: 0.0,
                avg_compliance: 0.0,
            };
        };
        let total = history.len() as u64;
        let mut stats = ReasonerStats {
            total_decisions: total,
            approved: 0,
            denied: 0,
            escalated: 0,
            fast_path_taken: 0,
            avg_duration_ms: 0.0,
            avg_confidence: 0.0,
            avg_compliance: 0.0,
        };
        if total == 0 {
            return stats;
        }
        for entry in history.iter() {
            match entry.decision {
                Decision::Approved => stats.approved += 1,
                Decision::Denied => stats.denied += 1,
                Decision::Escalate => stats.escalated += 1,
            }
            if entry.fast_path {
                stats.fast_path_taken += 1;
            }
            stats.avg_duration_ms += entry.duration_ms;
            stats.avg_confidence += entry.confidence;
            stats.avg_compliance += entry.compliance;
        }
        stats.avg_duration_ms /= total as f64;
        stats.avg_confidence /= total as f64;
        stats.avg_compliance /= total as f64;
        stats
    }

    /// Average compliance over the recent history window, for the compliance
    /// monitor task.
    pub fn recent_compliance(&self) -> Option<(f64, usize)> {
        let history = self.history.lock().ok()?;
        if history.is_empty() {
            return None;
        }
        let sum: f64 = history.iter().map(|t| t.compliance).sum();
        Some((sum / history.len() as f64, history.len()))
    }
}

fn level_label(level: u8) -> &'static str {
    match level {
        1 => "L1 Ethics",
        2 => "L2 Context",
        3 => "L3 Truth",
        4 => "L4 Risk",
        5 => "L5 Synthesis",
        _ => "L? Unknown",
    }
}

fn level_name(level: u8) -> &'static str {
    match level {
        2 => "context",
        3 => "truth",
        4 => "risk",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::collaborators::{StubContext, StubRisk, StubTruth};
    use super::*;
    use serde_json::{json, Map};

    fn reasoner_with_stubs(cfg: Config) -> HierarchicalReasoner {
        let ethics = Arc::new(EthicsRegistry::load(&cfg).expect("rules load"));
        let monitor = Arc::new(Mutex::new(HealthMonitor::new(cfg.clone())));
        HierarchicalReasoner::new(cfg, ethics, monitor)
            .with_context(Arc::new(StubContext::new("ContextAgent", 0.8)))
            .with_truth(Arc::new(StubTruth::new("TruthAgent", 0.9, 0.9)))
            .with_risk(Arc::new(StubRisk::new("RiskAgent", 0.3)))
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> Map<String, serde_json::Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_invalid_action_is_an_error_not_a_denial() {
        let r = reasoner_with_stubs(Config::default());
        let bad = Action::new("", Map::new(), "Kyle");
        assert!(r.decide(&bad, false).await.is_err());
    }

    #[tokio::test]
    async fn test_fast_path_runs_only_l1_and_l5() {
        let r = reasoner_with_stubs(Config::default());
        let action = Action::new("query", params(&[("operation", json!("read"))]), "Kyle");
        let trace = r.decide(&action, false).await.unwrap();
        assert_eq!(trace.levels_executed, vec![1, 5]);
        assert_eq!(trace.decision, Decision::Approved);
        assert!(trace.confidence >= 0.9);
    }

    #[tokio::test]
    async fn test_force_full_runs_all_levels() {
        let r = reasoner_with_stubs(Config::default());
        let action = Action::new("query", Map::new(), "Kyle");
        let trace = r.decide(&action, true).await.unwrap();
        for level in [2u8, 3, 4] {
            assert!(
                trace.levels_executed.contains(&level),
                "missing level {} in {:?}",
                level,
                trace.levels_executed
            );
        }
    }

    #[tokio::test]
    async fn test_denial_is_absolute_override() {
        let r = reasoner_with_stubs(Config::default());
        let action = Action::new(
            "trade",
            params(&[
                ("position_size_pct", json!(0.15)),
                ("leverage", json!(5.0)),
                ("stop_loss", serde_json::Value::Null),
            ]),
            "Kyle",
        );
        let trace = r.decide(&action, false).await.unwrap();
        assert_eq!(trace.decision, Decision::Denied);
        assert_eq!(trace.confidence, 1.0);
        assert_eq!(trace.levels_executed, vec![1, 5]);
    }

    #[tokio::test]
    async fn test_timeout_becomes_skipped_neutral() {
        let mut cfg = Config::default();
        cfg.l4_budget_ms = 20;
        let ethics = Arc::new(EthicsRegistry::load(&cfg).expect("rules load"));
        let monitor = Arc::new(Mutex::new(HealthMonitor::new(cfg.clone())));
        let mut slow = StubRisk::new("RiskAgent", 0.3);
        slow.delay_ms = 200;
        let r = HierarchicalReasoner::new(cfg, ethics, monitor)
            .with_context(Arc::new(StubContext::new("ContextAgent", 0.8)))
            .with_risk(Arc::new(slow));

        let action = Action::new(
            "trade",
            params(&[
                ("position_size_pct", json!(0.05)),
                ("stop_loss", json!(45000.0)),
            ]),
            "Kyle",
        );
        let trace = r.decide(&action, false).await.unwrap();
        let l4 = trace.levels.iter().find(|l| l.level == 4).expect("L4 ran");
        assert!(matches!(&l4.status, LevelStatus::Skipped { reason } if reason == "timeout"));
        assert_eq!(l4.score, NEUTRAL_SCORE);
        assert!(trace.warnings.iter().any(|w| w.contains("L4 skipped")));
    }

    #[tokio::test]
    async fn test_isolated_collaborator_skipped() {
        let cfg = Config::default();
        let r = reasoner_with_stubs(cfg);
        if let Ok(mut m) = r.monitor.lock() {
            m.isolate("RiskAgent", "manual");
        }
        let action = Action::new(
            "trade",
            params(&[
                ("position_size_pct", json!(0.05)),
                ("stop_loss", json!(45000.0)),
            ]),
            "Kyle",
        );
        let trace = r.decide(&action, false).await.unwrap();
        let l4 = trace.levels.iter().find(|l| l.level == 4).expect("L4 ran");
        assert!(
            matches!(&l4.status, LevelStatus::Skipped { reason } if reason == "agent_isolated")
        );
    }

    #[tokio::test]
    async fn test_missing_collaborator_skipped_not_fatal() {
        let cfg = Config::default();
        let ethics = Arc::new(EthicsRegistry::load(&cfg).expect("rules load"));
        let monitor = Arc::new(Mutex::new(HealthMonitor::new(cfg.clone())));
        let r = HierarchicalReasoner::new(cfg, ethics, monitor);
        let action = Action::new("trade", params(&[("stop_loss", json!(1.0))]), "Kyle");
        let trace = r.decide(&action, false).await.unwrap();
        assert!(trace
            .levels
            .iter()
            .any(|l| matches!(&l.status, LevelStatus::Skipped { reason } if reason == "unavailable")));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let mut cfg = Config::default();
        cfg.trace_history_cap = 5;
        let r = reasoner_with_stubs(cfg);
        let action = Action::new("query", Map::new(), "Kyle");
        for _ in 0..12 {
            r.decide(&action, false).await.unwrap();
        }
        assert_eq!(r.stats().total_decisions, 5);
    }

    #[tokio::test]
    async fn test_stats_aggregate_decisions() {
        let r = reasoner_with_stubs(Config::default());
        let good = Action::new("query", Map::new(), "Kyle");
        let bad = Action::new(
            "trade",
            params(&[("position_size_pct", json!(0.5)), ("stop_loss", serde_json::Value::Null)]),
            "Kyle",
        );
        r.decide(&good, false).await.unwrap();
        r.decide(&bad, false).await.unwrap();
        let stats = r.stats();
        assert_eq!(stats.total_decisions, 2);
        assert_eq!(stats.approved, 1);
        assert_eq!(stats.denied, 1);
        assert_eq!(stats.fast_path_taken, 1);
    }
}
