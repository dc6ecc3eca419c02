//! Proposed actions submitted to the kernel for a decision.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::logging::content_hash;

/// A structured proposal (type + parameters) from a named agent.
/// Immutable for the duration of evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub agent: String,
    pub correlation_id: String,
}

impl Action {
    pub fn new(action_type: &str, parameters: Map<String, Value>, agent: &str) -> Self {
        let correlation_id = format!(
            "C-{}-{}",
            crate::logging::ts_epoch_ms(),
            content_hash(&format!("{}:{}", agent, action_type))
        );
        Self {
            action_type: action_type.to_string(),
            parameters,
            agent: agent.to_string(),
            correlation_id,
        }
    }

    /// Reject malformed input before it enters the pipeline. This is the one
    /// failure that surfaces to the caller as an error instead of a denial.
    pub fn validate(&self) -> Result<()> {
        if self.action_type.trim().is_empty() {
            bail!("invalid action: missing action_type");
        }
        if self.agent.trim().is_empty() {
            bail!("invalid action: missing originating agent");
        }
        Ok(())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(|v| v.as_f64())
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(|v| v.as_bool())
    }

    /// True when the key is present but explicitly null.
    pub fn param_is_null(&self, key: &str) -> bool {
        matches!(self.parameters.get(key), Some(Value::Null))
    }

    /// Lowercased free text of all string-valued parameters, for keyword
    /// rules and claim-indicator triggers.
    pub fn text(&self) -> String {
        let mut out = self.action_type.to_lowercase();
        for value in self.parameters.values() {
            if let Some(s) = value.as_str() {
                out.push(' ');
                out.push_str(&s.to_lowercase());
            }
        }
        out
    }

    /// Stable hash of the full input, for audit correlation.
    pub fn input_hash(&self) -> String {
        content_hash(&format!(
            "{}|{}|{}",
            self.action_type,
            Value::Object(self.parameters.clone()),
            self.agent
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_validate_rejects_empty_type() {
        let a = Action::new("", Map::new(), "Kyle");
        assert!(a.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let a = Action::new("query", params(&[("operation", json!("read"))]), "Kyle");
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_param_is_null_distinguishes_missing() {
        let a = Action::new("trade", params(&[("stop_loss", Value::Null)]), "Kyle");
        assert!(a.param_is_null("stop_loss"));
        assert!(!a.param_is_null("leverage"));
    }

    #[test]
    fn test_text_includes_string_params() {
        let a = Action::new(
            "report",
            params(&[("description", json!("Data PROVES the trend"))]),
            "Kyle",
        );
        assert!(a.text().contains("proves"));
    }

    #[test]
    fn test_input_hash_stable() {
        let a = Action::new("query", Map::new(), "Kyle");
        assert_eq!(a.input_hash(), a.input_hash());
    }
}
