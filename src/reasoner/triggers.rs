//! Declarative triggering for the adaptive pipeline.
//!
//! The fast-path predicate and the per-level triggers are data, not code
//! branches in the orchestrator: each is a small rule set that can be tuned
//! through configuration and tested on its own.

use crate::action::Action;
use crate::config::Config;
use crate::ethics::EthicsVerdict;

/// When the pipeline may run L1 → L5 directly.
#[derive(Debug, Clone)]
pub struct FastPathPolicy {
    pub min_compliance: f64,
    pub max_compliance: f64,
    pub action_types: Vec<String>,
    pub max_rules_checked: usize,
}

impl FastPathPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            min_compliance: cfg.fastpath_min_compliance,
            max_compliance: cfg.fastpath_max_compliance,
            action_types: cfg.fastpath_actions.clone(),
            max_rules_checked: cfg.fastpath_max_rules,
        }
    }

    /// Fast path requires a clean approval on a simple, read-like action.
    pub fn eligible(&self, action: &Action, verdict: &EthicsVerdict, force_full: bool) -> bool {
        !force_full
            && verdict.approved
            && verdict.warnings.is_empty()
            && verdict.compliance_score >= self.min_compliance
            && verdict.compliance_score <= self.max_compliance
            && self.action_types.iter().any(|t| t == &action.action_type)
            && verdict.rules_checked.len() <= self.max_rules_checked
    }
}

/// Conditional-level trigger rules.
#[derive(Debug, Clone)]
pub struct LevelTriggers {
    pub l2_action_types: Vec<String>,
    pub l3_claim_markers: Vec<String>,
    pub l4_action_types: Vec<String>,
}

impl Default for LevelTriggers {
    fn default() -> Self {
        Self {
            l2_action_types: ["trade", "strategic_decision", "policy_change"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            l3_claim_markers: ["shows", "proves", "demonstrates", "indicates"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            l4_action_types: ["trade", "execute", "delete"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl LevelTriggers {
    /// L2 Context: consequential action types, or the caller flagged the
    /// action as complex.
    pub fn l2_fires(&self, action: &Action) -> bool {
        self.l2_action_types.iter().any(|t| t == &action.action_type)
            || action.param_bool("complex") == Some(true)
    }

    /// L3 Truth: the action carries claim language worth verifying.
    pub fn l3_fires(&self, action: &Action) -> bool {
        let text = action.text();
        self.l3_claim_markers.iter().any(|m| text.contains(m.as_str()))
    }

    /// L4 Risk: L1 produced warnings, or the action type is inherently risky.
    pub fn l4_fires(&self, action: &Action, verdict: &EthicsVerdict) -> bool {
        !verdict.warnings.is_empty()
            || self.l4_action_types.iter().any(|t| t == &action.action_type)
    }
}
