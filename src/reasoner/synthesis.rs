//! L5 synthesis: weighted combination of level scores into one decision.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Denied,
    Escalate,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Denied => "denied",
            Decision::Escalate => "escalate",
        }
    }
}

/// Ethics anchors the decision; the consultations refine it.
pub fn weight_for(level: u8) -> f64 {
    match level {
        1 => 1.0,
        2 => 0.3,
        3 => 0.5,
        4 => 0.7,
        _ => 0.0,
    }
}

pub const APPROVE_THRESHOLD: f64 = 0.70;
pub const DENY_THRESHOLD: f64 = 0.40;

/// Score a level contributed to synthesis: a (level, score) pair.
pub type LevelScore = (u8, f64);

/// Weighted confidence over the executed levels, then the decision bands.
pub fn synthesize(scores: &[LevelScore]) -> (Decision, f64) {
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for (level, score) in scores {
        let w = weight_for(*level);
        weighted += w * score;
        weight_sum += w;
    }
    let confidence = if weight_sum > 0.0 {
        weighted / weight_sum
    } else {
        0.0
    };

    let decision = if confidence >= APPROVE_THRESHOLD {
        Decision::Approved
    } else if confidence >= DENY_THRESHOLD {
        Decision::Escalate
    } else {
        Decision::Denied
    };
    (decision, confidence)
}
