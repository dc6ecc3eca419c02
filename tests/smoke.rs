//! Smoke tests: end-to-end scenarios through the full kernel.
//!
//! These exercise the public caller surface the way an upstream component
//! would, and are the gate between "code compiles" and "kernel behaves".

use std::sync::Arc;

use serde_json::{json, Map, Value};

use arbiter::kernel::{Collaborators, Kernel};
use arbiter::memory::extract::Fact;
use arbiter::memory::{MemoryCandidate, SortBy};
use arbiter::reasoner::collaborators::{StubContext, StubRisk, StubTruth};
use arbiter::watchdog::Observation;
use arbiter::{Action, Config, Decision};

fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn kernel_with_risk_agent(risk_agent: &str) -> Kernel {
    let collaborators = Collaborators {
        context: Some(Arc::new(StubContext::new("ContextAgent", 0.8))),
        truth: Some(Arc::new(StubTruth::new("TruthAgent", 0.9, 0.9))),
        risk: Some(Arc::new(StubRisk::new(risk_agent, 0.3))),
    };
    Kernel::new(Config::default(), collaborators).expect("kernel builds")
}

fn kernel() -> Kernel {
    kernel_with_risk_agent("RiskAgent")
}

// ---------------------------------------------------------------------------
// S01: Safe query takes the fast path
// ---------------------------------------------------------------------------
#[tokio::test]
async fn s01_safe_query_fast_path() {
    let k = kernel();
    let action = Action::new(
        "query",
        params(&[
            ("operation", json!("read")),
            ("description", json!("Read market data")),
        ]),
        "Kyle",
    );
    let trace = k.decide(&action, false).await.unwrap();
    assert_eq!(trace.decision, Decision::Approved);
    assert_eq!(trace.levels_executed, vec![1, 5]);
    assert!(trace.confidence >= 0.90, "confidence {}", trace.confidence);
    assert!(trace.warnings.is_empty(), "warnings {:?}", trace.warnings);
}

// ---------------------------------------------------------------------------
// S02: Trade near the limits triggers the full path but still passes
// ---------------------------------------------------------------------------
#[tokio::test]
async fn s02_trade_at_edge_full_path() {
    let k = kernel();
    let action = Action::new(
        "trade",
        params(&[
            ("symbol", json!("BTC/USD")),
            ("direction", json!("long")),
            ("position_size_pct", json!(0.09)),
            ("leverage", json!(1.9)),
            ("stop_loss", json!(45000.0)),
        ]),
        "Kyle",
    );
    let trace = k.decide(&action, false).await.unwrap();
    assert_eq!(trace.decision, Decision::Approved);
    assert!(trace.levels_executed.contains(&2), "levels {:?}", trace.levels_executed);
    assert!(trace.levels_executed.contains(&4), "levels {:?}", trace.levels_executed);
    assert!(
        trace.confidence >= 0.7 && trace.confidence <= 0.9,
        "confidence {}",
        trace.confidence
    );
    assert!(trace
        .warnings
        .iter()
        .any(|w| w.contains("near position size threshold")));
}

// ---------------------------------------------------------------------------
// S03: Ethics violations short-circuit the pipeline
// ---------------------------------------------------------------------------
#[tokio::test]
async fn s03_ethics_violation_short_circuit() {
    let k = kernel();
    let action = Action::new(
        "trade",
        params(&[
            ("position_size_pct", json!(0.15)),
            ("leverage", json!(5.0)),
            ("stop_loss", Value::Null),
        ]),
        "Kyle",
    );
    let trace = k.decide(&action, false).await.unwrap();
    assert_eq!(trace.decision, Decision::Denied);
    assert_eq!(trace.levels_executed, vec![1, 5]);
    assert_eq!(trace.confidence, 1.0);
    for rule in ["position_size", "leverage", "stop_loss"] {
        assert!(
            trace.violations.iter().any(|v| v == rule),
            "missing violation {}",
            rule
        );
        assert!(
            trace.warnings.iter().any(|w| w.contains(rule)),
            "no warning mentions {}",
            rule
        );
    }
}

// ---------------------------------------------------------------------------
// S04: The memory filter drops a greeting
// ---------------------------------------------------------------------------
#[tokio::test]
async fn s04_filter_drops_greeting() {
    let k = kernel();
    let outcome = k.ingest(&MemoryCandidate {
        user_text: "hi".to_string(),
        agent_text: "hello, what do you need?".to_string(),
        topics: Vec::new(),
        sentiment: 0.0,
    });
    assert!(outcome.memory_id.is_none());
    assert!(outcome
        .rejection_reason
        .unwrap()
        .starts_with("low_quality"));
}

// ---------------------------------------------------------------------------
// S05: A definition is stored with its extracted fact
// ---------------------------------------------------------------------------
#[tokio::test]
async fn s05_definition_stored() {
    let k = kernel();
    let outcome = k.ingest(&MemoryCandidate {
        user_text: "Entropy is a measure of disorder in a system".to_string(),
        agent_text: "Yes, specifically in thermodynamics and information theory".to_string(),
        topics: vec!["entropy".to_string()],
        sentiment: 0.2,
    });
    assert!(outcome.memory_id.is_some());
    assert!(outcome.importance >= 70, "importance {}", outcome.importance);

    let result = k.query_memory("entropy", 10, 0, SortBy::Importance, false);
    assert_eq!(result.total, 1);
    let memory = &result.memories[0];
    assert!(memory.facts.iter().any(|f| matches!(
        f,
        Fact::Definition { subject, value, .. }
            if subject == "entropy" && value.contains("disorder")
    )));
}

// ---------------------------------------------------------------------------
// S06: Duplicate suppression leaves the count unchanged
// ---------------------------------------------------------------------------
#[tokio::test]
async fn s06_duplicate_suppressed() {
    let k = kernel();
    let candidate = MemoryCandidate {
        user_text: "Entropy is a measure of disorder in a system".to_string(),
        agent_text: "Yes, specifically in thermodynamics and information theory".to_string(),
        topics: vec!["entropy".to_string()],
        sentiment: 0.2,
    };
    assert!(k.ingest(&candidate).memory_id.is_some());
    let before = k.health().memory_stats.total_memories;

    let second = k.ingest(&candidate);
    assert!(second.memory_id.is_none());
    assert_eq!(second.rejection_reason.as_deref(), Some("duplicate"));
    assert_eq!(k.health().memory_stats.total_memories, before);
}

// ---------------------------------------------------------------------------
// S07: Sustained failure isolates an agent, and L4 then skips it
// ---------------------------------------------------------------------------
#[tokio::test]
async fn s07_isolation_under_failure() {
    let k = kernel_with_risk_agent("Kenny");
    for _ in 0..25 {
        k.record_agent(
            "Kenny",
            Observation {
                success: false,
                latency_ms: 6000.0,
                violation: None,
            },
        );
    }
    k.monitor_cycle();
    let health = k.health();
    assert!(health.agents["Kenny"].isolated);

    // A risky action that would normally consult Kenny at L4
    let action = Action::new(
        "trade",
        params(&[
            ("position_size_pct", json!(0.05)),
            ("stop_loss", json!(45000.0)),
        ]),
        "Kyle",
    );
    let trace = k.decide(&action, false).await.unwrap();
    assert!(trace
        .warnings
        .iter()
        .any(|w| w.contains("agent_isolated")),
        "warnings {:?}",
        trace.warnings
    );
}
