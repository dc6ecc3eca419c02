//! Immutable ethics registry.
//!
//! The rule set is loaded once at startup and never mutated afterwards.
//! Every proposed action is evaluated against the applicable rules and the
//! result is folded into a single verdict; evaluation itself never fails.
//! A rule that errors mid-check is reported as a warning on the verdict,
//! not propagated.

use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::config::Config;

/// What a single rule says about an action.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Ok,
    Warning(String),
    Violation(String),
}

/// Worst outcome a rule can emit. Warning-class rules never deny on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Violation,
}

/// Which action types a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Applicability {
    /// Applies to every action, including unknown action types.
    Any,
    /// Applies only to the listed action types.
    Types(Vec<String>),
}

impl Applicability {
    fn matches(&self, action_type: &str) -> bool {
        match self {
            Applicability::Any => true,
            Applicability::Types(list) => list.iter().any(|t| t == action_type),
        }
    }
}

/// How a rule inspects an action. Builtin rules are compiled predicates;
/// overlay rules match keywords against the action's free text.
#[derive(Clone)]
pub enum RuleCheck {
    Builtin(fn(&Action) -> Result<RuleOutcome>),
    Keyword { any_of: Vec<String>, reason: String },
}

#[derive(Clone)]
pub struct Rule {
    pub rule_id: String,
    pub category: String,
    pub applies_to: Applicability,
    pub severity: Severity,
    pub check: RuleCheck,
}

impl Rule {
    fn evaluate(&self, action: &Action) -> Result<RuleOutcome> {
        match &self.check {
            RuleCheck::Builtin(f) => f(action),
            RuleCheck::Keyword { any_of, reason } => {
                let text = action.text();
                let hit = any_of.iter().any(|kw| text.contains(kw.as_str()));
                if !hit {
                    return Ok(RuleOutcome::Ok);
                }
                Ok(match self.severity {
                    Severity::Warning => RuleOutcome::Warning(reason.clone()),
                    Severity::Violation => RuleOutcome::Violation(reason.clone()),
                })
            }
        }
    }
}

/// Compliance verdict for one action. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthicsVerdict {
    pub approved: bool,
    pub compliance_score: f64,
    pub rules_checked: Vec<String>,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub elapsed_ms: f64,
}

/// Overlay rule definition for `RULES_PATH`. Keyword rules only; a malformed
/// file aborts startup.
#[derive(Debug, Deserialize)]
struct OverlayRule {
    rule_id: String,
    category: String,
    #[serde(default)]
    applies_to: Vec<String>,
    severity: Severity,
    keywords: Vec<String>,
    reason: String,
}

pub struct EthicsRegistry {
    rules: Vec<Rule>,
}

impl EthicsRegistry {
    /// Load the builtin rule table plus an optional overlay file.
    /// If the same rule_id appears twice, the first definition wins.
    pub fn load(cfg: &Config) -> Result<Self> {
        let mut rules = builtin_rules();
        if let Some(path) = &cfg.rules_path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read rules overlay {}", path))?;
            let overlay: Vec<OverlayRule> =
                serde_json::from_str(&raw).with_context(|| format!("malformed rules overlay {}", path))?;
            for def in overlay {
                rules.push(Rule {
                    rule_id: def.rule_id,
                    category: def.category,
                    applies_to: if def.applies_to.is_empty()
                        || def.applies_to.iter().any(|t| t == "any")
                    {
                        Applicability::Any
                    } else {
                        Applicability::Types(def.applies_to)
                    },
                    severity: def.severity,
                    check: RuleCheck::Keyword {
                        any_of: def.keywords.into_iter().map(|k| k.to_lowercase()).collect(),
                        reason: def.reason,
                    },
                });
            }
        }
        // First definition wins; later duplicates are dropped.
        let mut seen = std::collections::HashSet::new();
        rules.retain(|r| seen.insert(r.rule_id.clone()));
        Ok(Self { rules })
    }

    /// Evaluate an action against every applicable rule. Never fails: a rule
    /// that errors is folded into the verdict as a warning.
    pub fn evaluate(&self, action: &Action) -> EthicsVerdict {
        let started = Instant::now();
        let mut rules_checked = Vec::new();
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for rule in &self.rules {
            if !rule.applies_to.matches(&action.action_type) {
                continue;
            }
            rules_checked.push(rule.rule_id.clone());
            match rule.evaluate(action) {
                Ok(RuleOutcome::Ok) => {}
                Ok(RuleOutcome::Warning(reason)) => {
                    warnings.push(format!("{}: {}", rule.rule_id, reason));
                }
                Ok(RuleOutcome::Violation(reason)) => {
                    violations.push(rule.rule_id.clone());
                    warnings.push(format!("{} violated: {}", rule.rule_id, reason));
                }
                Err(err) => {
                    warnings.push(format!("{} check failed: {}", rule.rule_id, err));
                }
            }
        }

        let applicable = rules_checked.len().max(1) as f64;
        let penalty = violations.len() as f64 + 0.25 * warnings_only(&warnings, &violations) as f64;
        let compliance_score = (1.0 - penalty / applicable).clamp(0.0, 1.0);

        EthicsVerdict {
            approved: violations.is_empty(),
            compliance_score,
            rules_checked,
            violations,
            warnings,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Copies of the loaded rules, optionally filtered by category.
    pub fn get_rules(&self, category: Option<&str>) -> Vec<Rule> {
        self.rules
            .iter()
            .filter(|r| category.map_or(true, |c| r.category == c))
            .cloned()
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Warnings that are not the echo of a violation. Violations already carry
/// their full penalty; double-counting their explanatory warning would skew
/// the score.
fn warnings_only(warnings: &[String], violations: &[String]) -> usize {
    warnings
        .iter()
        .filter(|w| !violations.iter().any(|v| w.starts_with(&format!("{} violated", v))))
        .count()
}

// =============================================================================
// Builtin rule table
// =============================================================================

const POSITION_SIZE_CAP: f64 = 0.10;
const POSITION_SIZE_WARN: f64 = 0.08;
const LEVERAGE_CAP: f64 = 2.0;
const LEVERAGE_WARN: f64 = 1.5;

fn builtin_rules() -> Vec<Rule> {
    vec![
        Rule {
            rule_id: "harm_prevention".to_string(),
            category: "safety".to_string(),
            applies_to: Applicability::Any,
            severity: Severity::Violation,
            check: RuleCheck::Keyword {
                any_of: ["sabotage", "weaponize", "attack the", "destroy user"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                reason: "action describes deliberate harm".to_string(),
            },
        },
        Rule {
            rule_id: "truthfulness".to_string(),
            category: "integrity".to_string(),
            applies_to: Applicability::Any,
            severity: Severity::Violation,
            check: RuleCheck::Keyword {
                any_of: ["fabricate", "falsify", "mislead", "deceive"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                reason: "action describes deception".to_string(),
            },
        },
        Rule {
            rule_id: "privacy".to_string(),
            category: "privacy".to_string(),
            applies_to: Applicability::Any,
            severity: Severity::Violation,
            check: RuleCheck::Keyword {
                any_of: ["exfiltrate", "leak personal", "dox "]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                reason: "action touches personal data without consent".to_string(),
            },
        },
        Rule {
            rule_id: "authorization".to_string(),
            category: "safety".to_string(),
            applies_to: Applicability::Any,
            severity: Severity::Violation,
            check: RuleCheck::Builtin(check_authorization),
        },
        Rule {
            rule_id: "position_size".to_string(),
            category: "trading".to_string(),
            applies_to: Applicability::Types(vec!["trade".to_string()]),
            severity: Severity::Violation,
            check: RuleCheck::Builtin(check_position_size),
        },
        Rule {
            rule_id: "leverage".to_string(),
            category: "trading".to_string(),
            applies_to: Applicability::Types(vec!["trade".to_string()]),
            severity: Severity::Violation,
            check: RuleCheck::Builtin(check_leverage),
        },
        Rule {
            rule_id: "stop_loss".to_string(),
            category: "trading".to_string(),
            applies_to: Applicability::Types(vec!["trade".to_string()]),
            severity: Severity::Violation,
            check: RuleCheck::Builtin(check_stop_loss),
        },
        Rule {
            rule_id: "destructive_scope".to_string(),
            category: "system".to_string(),
            applies_to: Applicability::Types(vec![
                "delete".to_string(),
                "execute".to_string(),
            ]),
            severity: Severity::Violation,
            check: RuleCheck::Builtin(check_destructive_scope),
        },
    ]
}

fn check_authorization(action: &Action) -> Result<RuleOutcome> {
    if action.param_bool("bypass_authorization") == Some(true) {
        return Ok(RuleOutcome::Violation(
            "attempts to bypass authorization".to_string(),
        ));
    }
    if action.param_bool("skip_review") == Some(true) {
        return Ok(RuleOutcome::Warning("review skipped by request".to_string()));
    }
    Ok(RuleOutcome::Ok)
}

fn check_position_size(action: &Action) -> Result<RuleOutcome> {
    let Some(pct) = action.param_f64("position_size_pct") else {
        return Ok(RuleOutcome::Warning(
            "trade without declared position size".to_string(),
        ));
    };
    if pct > POSITION_SIZE_CAP {
        return Ok(RuleOutcome::Violation(format!(
            "position size {:.2}% exceeds {:.0}% cap",
            pct * 100.0,
            POSITION_SIZE_CAP * 100.0
        )));
    }
    if pct >= POSITION_SIZE_WARN {
        return Ok(RuleOutcome::Warning(
            "near position size threshold".to_string(),
        ));
    }
    Ok(RuleOutcome::Ok)
}

fn check_leverage(action: &Action) -> Result<RuleOutcome> {
    let Some(lev) = action.param_f64("leverage") else {
        return Ok(RuleOutcome::Ok); // unleveraged trade
    };
    if lev > LEVERAGE_CAP {
        return Ok(RuleOutcome::Violation(format!(
            "leverage {:.1}x exceeds {:.1}x cap",
            lev, LEVERAGE_CAP
        )));
    }
    if lev >= LEVERAGE_WARN {
        return Ok(RuleOutcome::Warning("leverage approaching cap".to_string()));
    }
    Ok(RuleOutcome::Ok)
}

fn check_stop_loss(action: &Action) -> Result<RuleOutcome> {
    if action.param_is_null("stop_loss") || action.param_f64("stop_loss").is_none() {
        return Ok(RuleOutcome::Violation(
            "trade proposed without a stop loss".to_string(),
        ));
    }
    Ok(RuleOutcome::Ok)
}

fn check_destructive_scope(action: &Action) -> Result<RuleOutcome> {
    const PROTECTED: &[&str] = &["/", "/etc", "/usr", "/bin", "/boot", "/var"];
    if let Some(target) = action.param_str("target") {
        if PROTECTED.iter().any(|p| target == *p) {
            return Ok(RuleOutcome::Violation(format!(
                "target {} is a protected system path",
                target
            )));
        }
    }
    if action.param_bool("confirmed") != Some(true) {
        return Ok(RuleOutcome::Warning(
            "destructive action without confirmation".to_string(),
        ));
    }
    Ok(RuleOutcome::Ok)
}

// =============================================================================
// Tests
// =============================================================================
