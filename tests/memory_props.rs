//! Memory-engine properties: boundaries, round trips, and durability.

use arbiter::config::Config;
use arbiter::memory::extract;
use arbiter::memory::quality::{self, QualityDecision};
use arbiter::memory::store::MemoryStore;
use arbiter::memory::{MemoryCandidate, MemoryEngine, SortBy};

fn candidate(user: &str, agent: &str, topics: &[&str]) -> MemoryCandidate {
    MemoryCandidate {
        user_text: user.to_string(),
        agent_text: agent.to_string(),
        topics: topics.iter().map(|s| s.to_string()).collect(),
        sentiment: 0.0,
    }
}

// Distinct statements so similarity-based duplicate detection stays quiet.
const STATEMENTS: &[&str] = &[
    "the first law concerns conservation of energy across closed systems",
    "the second law states entropy never decreases spontaneously",
    "heat engines convert thermal gradients into mechanical work",
    "absolute zero is the floor temperature no process reaches",
    "free energy measures work obtainable at constant temperature",
    "enthalpy tracks heat content under constant pressure conditions",
    "carnot efficiency bounds every reversible engine performance",
    "phase transitions absorb latent heat without temperature change",
];

fn varied(topic: &str, n: usize) -> MemoryCandidate {
    candidate(
        &format!("Remember that {}", STATEMENTS[n % STATEMENTS.len()]),
        "Good point, filed away",
        &[topic],
    )
}

// ---------------------------------------------------------------------------
// Importance threshold boundary: 55 stores, 54 rejects
// ---------------------------------------------------------------------------
#[test]
fn importance_exactly_at_threshold_stores() {
    let cfg = Config::default();
    assert_eq!(
        quality::decide(&cfg, 55, false, None).decision,
        QualityDecision::Store
    );
    assert_eq!(
        quality::decide(&cfg, 54, false, None).decision,
        QualityDecision::RejectLowQuality
    );
}

// ---------------------------------------------------------------------------
// Every stored memory stays reachable through its topics
// ---------------------------------------------------------------------------
#[test]
fn stored_memories_never_silently_lost() {
    let mut engine = MemoryEngine::new(Config::default());
    let mut ids = Vec::new();
    for n in 0..STATEMENTS.len() {
        let out = engine.ingest(&varied("thermodynamics", n));
        ids.push(out.memory_id.expect("stored"));
    }
    // Retrieval (with feedback side effects) never drops anything
    for _ in 0..5 {
        let result = engine.retrieve("thermodynamics", 100, 0, SortBy::Date, false);
        assert_eq!(result.total, STATEMENTS.len());
    }
    for id in &ids {
        assert!(engine.get(id).is_some());
    }
}

// ---------------------------------------------------------------------------
// Importance stays within [0, 100] under any feedback sequence
// ---------------------------------------------------------------------------
#[test]
fn importance_bounded_under_feedback() {
    let mut engine = MemoryEngine::new(Config::default());
    let id = engine.ingest(&varied("entropy", 0)).memory_id.unwrap();
    for _ in 0..50 {
        engine.boost(&id, "spam boost");
    }
    let m = engine.get(&id).unwrap();
    assert!(m.effective_importance() <= 100);
    for _ in 0..100 {
        engine.demote(&id, "spam demote");
    }
    let m = engine.get(&id).unwrap();
    assert!(m.effective_importance() >= 0);
}

// ---------------------------------------------------------------------------
// Boost then demote round-trips when no clamp is hit
// ---------------------------------------------------------------------------
#[test]
fn boost_demote_round_trip() {
    let mut engine = MemoryEngine::new(Config::default());
    let id = engine.ingest(&varied("entropy", 0)).memory_id.unwrap();
    let before = engine.get(&id).unwrap().effective_importance();
    assert!(engine.boost(&id, "helpful"));
    assert!(engine.demote(&id, "helpful"));
    assert_eq!(engine.get(&id).unwrap().effective_importance(), before);
}

// ---------------------------------------------------------------------------
// Consolidation is idempotent between stores
// ---------------------------------------------------------------------------
#[test]
fn consolidation_idempotent() {
    let mut engine = MemoryEngine::new(Config::default());
    for n in 0..6 {
        engine.ingest(&varied("entropy", n));
    }
    let first = engine.consolidate();
    assert_eq!(first, 1);
    let snapshot = engine.compressed_for("entropy").unwrap().clone();
    assert_eq!(engine.consolidate(), 0);
    let after = engine.compressed_for("entropy").unwrap();
    assert_eq!(snapshot.total_references, after.total_references);
    assert_eq!(snapshot.key_insights.len(), after.key_insights.len());

    // A new memory re-arms it
    engine.ingest(&varied("entropy", 7));
    assert_eq!(engine.consolidate(), 1);
}

// ---------------------------------------------------------------------------
// Extraction is deterministic
// ---------------------------------------------------------------------------
#[test]
fn extraction_deterministic() {
    let user = "Photosynthesis is the conversion of light into chemical energy, \
                because chlorophyll absorbs photons at 680 nm";
    let agent = "Right, and that process leads to oxygen release";
    let (facts_a, summary_a) = extract::extract(user, agent);
    let (facts_b, summary_b) = extract::extract(user, agent);
    assert_eq!(facts_a, facts_b);
    assert_eq!(summary_a, summary_b);
    assert!(!facts_a.is_empty());
}

// ---------------------------------------------------------------------------
// Durable round trip through sqlite
// ---------------------------------------------------------------------------
#[test]
fn sqlite_round_trip_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arbiter.sqlite");
    let mut store = MemoryStore::open(path.to_str().unwrap()).unwrap();
    store.init().unwrap();

    let mut engine = MemoryEngine::with_store(Config::default(), store);
    let out = engine.ingest(&candidate(
        "Entropy is a measure of disorder in a system",
        "Yes, specifically in thermodynamics",
        &["entropy", "physics"],
    ));
    assert!(out.memory_id.is_some());

    // Reopen the database and verify body + index landed together
    let verify = MemoryStore::open(path.to_str().unwrap()).unwrap();
    assert_eq!(verify.memory_count().unwrap(), 1);
    assert_eq!(verify.index_count().unwrap(), 2);
}
