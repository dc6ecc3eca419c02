//! Quality-filtered infinite memory.
//!
//! Every conversational turn is offered to the quality filter; survivors are
//! extracted into typed facts and stored forever. Memories are append-only:
//! the only mutations allowed after a store are the feedback counters and
//! the user importance adjustment, and nothing is ever deleted. Retrieval
//! goes through an inverted topic index whose per-topic order is the store
//! order.

pub mod consolidate;
pub mod extract;
pub mod quality;
pub mod store;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::Config;
use crate::events::KernelEvent;
use crate::logging::{content_hash, json_log, log_rejection, obj, ts_epoch, v_num, v_str};
use consolidate::CompressedKnowledge;
use extract::Fact;
use quality::{Classification, QualityDecision, RepetitionCounter, StoredDigest};
use store::MemoryStore;

const USER_ADJUSTMENT_MIN: i32 = -30;
const USER_ADJUSTMENT_MAX: i32 = 30;
const ADJUSTMENT_STEP: i32 = 10;
const AUTO_BOOST_EVERY: u32 = 3;
const CONSOLIDATE_MIN_REFS: usize = 5;

/// One persisted conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub memory_id: String,
    pub user_text: String,
    pub agent_text: String,
    pub summary: String,
    pub facts: Vec<Fact>,
    pub topics: Vec<String>,
    pub keywords: Vec<String>,
    pub sentiment: f64,
    pub base_importance: i32,
    pub user_adjustment: i32,
    pub knowledge_density: f64,
    pub retrievals: u32,
    pub boosts: u32,
    pub created_at: u64,
    pub insertion_order: u64,
}

impl Memory {
    /// Importance after the user adjustment, always within [0, 100].
    pub fn effective_importance(&self) -> i32 {
        (self.base_importance + self.user_adjustment).clamp(0, 100)
    }
}

/// Candidate turn offered for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCandidate {
    pub user_text: String,
    pub agent_text: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub sentiment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub memory_id: Option<String>,
    pub importance: i32,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Relevance,
    Date,
    Importance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResult {
    pub memories: Vec<Memory>,
    pub total: usize,
    pub compressed: Option<CompressedKnowledge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub memory: Memory,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub total_topics: usize,
    pub top_topics: Vec<(String, usize)>,
    pub compressed_topics: usize,
    pub last_consolidated_total: u64,
}

pub struct MemoryEngine {
    cfg: Config,
    memories: HashMap<String, Memory>,
    index: BTreeMap<String, Vec<String>>,
    digests: Vec<StoredDigest>,
    // Single owner of the process-wide repetition counts; all updates funnel
    // through ingest.
    repetition: RepetitionCounter,
    compressed: BTreeMap<String, CompressedKnowledge>,
    store: Option<MemoryStore>,
    events: Option<UnboundedSender<KernelEvent>>,
    insertion_seq: u64,
    last_consolidated_total: u64,
}

impl MemoryEngine {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            memories: HashMap::new(),
            index: BTreeMap::new(),
            digests: Vec::new(),
            repetition: RepetitionCounter::new(),
            compressed: BTreeMap::new(),
            store: None,
            events: None,
            insertion_seq: 0,
            last_consolidated_total: 0,
        }
    }

    pub fn with_store(cfg: Config, store: MemoryStore) -> Self {
        let mut engine = Self::new(cfg);
        engine.store = Some(store);
        engine
    }

    pub fn set_event_sender(&mut self, tx: UnboundedSender<KernelEvent>) {
        self.events = Some(tx);
    }

    fn emit(&self, event: KernelEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn count(&self) -> usize {
        self.memories.len()
    }

    pub fn get(&self, memory_id: &str) -> Option<&Memory> {
        self.memories.get(memory_id)
    }

    // =========================================================================
    // Ingest
    // =========================================================================

    /// Offer one conversational turn. Returns the new memory id, or `None`
    /// with a rejection reason. The repetition counter is updated whether or
    /// not the candidate is stored.
    pub fn ingest(&mut self, candidate: &MemoryCandidate) -> IngestOutcome {
        let topics: Vec<String> = candidate
            .topics
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let low_quality = quality::low_quality_reason(&candidate.user_text);

        let combined = format!("{} {}", candidate.user_text, candidate.agent_text);
        let sig = quality::signature(&candidate.user_text);
        let words = quality::word_set(&combined);
        let topic_set: HashSet<String> = topics.iter().cloned().collect();
        let duplicate = self
            .digests
            .iter()
            .any(|d| quality::is_duplicate(&self.cfg, &sig, &topic_set, &words, d));

        let novel = topics.iter().all(|t| self.repetition.strength(t) < 2);
        let now = ts_epoch();
        let mut repetition_boost = 0;
        for topic in &topics {
            let count = self.repetition.increment(topic, now);
            repetition_boost += RepetitionCounter::boost_for(count);
        }

        let importance = quality::importance_score(
            &candidate.user_text,
            &candidate.agent_text,
            &topics,
            novel,
            repetition_boost,
        );
        let classification: Classification =
            quality::decide(&self.cfg, importance, duplicate, low_quality);

        match classification.decision {
            QualityDecision::Store => {}
            QualityDecision::RejectLowQuality | QualityDecision::RejectDuplicate => {
                let reason = classification
                    .rejection_reason
                    .unwrap_or_else(|| "rejected".to_string());
                log_rejection(&reason, importance as i64, &sig);
                return IngestOutcome {
                    memory_id: None,
                    importance,
                    rejection_reason: Some(reason),
                };
            }
        }

        let (facts, summary) = extract::extract(&candidate.user_text, &candidate.agent_text);
        let memory_id = format!(
            "M-{}",
            content_hash(&format!("{}|{}", sig, self.insertion_seq))
        );
        let memory = Memory {
            memory_id: memory_id.clone(),
            user_text: candidate.user_text.clone(),
            agent_text: candidate.agent_text.clone(),
            summary,
            knowledge_density: knowledge_density(&facts, &combined),
            facts,
            topics: topics.clone(),
            keywords: keywords(&combined),
            sentiment: candidate.sentiment,
            base_importance: importance,
            user_adjustment: 0,
            retrievals: 0,
            boosts: 0,
            created_at: now,
            insertion_order: self.insertion_seq,
        };

        // Body and index land together or not at all; a storage failure is
        // reported as a null id and leaves the in-memory state untouched.
        if let Some(db) = &mut self.store {
            let positions: Vec<(String, u64)> = topics
                .iter()
                .map(|t| {
                    let pos = self.index.get(t).map(|ids| ids.len()).unwrap_or(0) as u64;
                    (t.clone(), pos)
                })
                .collect();
            if let Err(err) = db.persist_memory(&memory, &positions) {
                self.emit(KernelEvent::StorageWarning {
                    operation: "persist_memory".to_string(),
                    error: err.to_string(),
                });
                return IngestOutcome {
                    memory_id: None,
                    importance,
                    rejection_reason: Some("storage_error".to_string()),
                };
            }
        }

        self.insertion_seq += 1;
        for topic in &topics {
            self.index.entry(topic.clone()).or_default().push(memory_id.clone());
        }
        self.digests.push(StoredDigest {
            signature: sig,
            topics: topic_set,
            words,
        });
        self.memories.insert(memory_id.clone(), memory);

        json_log(
            "memory_store",
            obj(&[
                ("memory_id", v_str(&memory_id)),
                ("importance", v_num(importance as f64)),
                ("topics", v_num(topics.len() as f64)),
            ]),
        );

        if self.cfg.consolidate_every > 0
            && self.memories.len() as u64 % self.cfg.consolidate_every == 0
        {
            self.consolidate();
        }

        IngestOutcome {
            memory_id: Some(memory_id),
            importance,
            rejection_reason: None,
        }
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Topic lookup. Every returned memory gets a retrieval recorded; every
    /// third retrieval of a memory triggers an automatic boost.
    pub fn retrieve(
        &mut self,
        topic: &str,
        limit: usize,
        min_importance: i32,
        sort_by: SortBy,
        include_compressed: bool,
    ) -> RetrieveResult {
        let topic = topic.trim().to_lowercase();
        let ids: Vec<String> = self.index.get(&topic).cloned().unwrap_or_default();

        let mut matching: Vec<&Memory> = ids
            .iter()
            .filter_map(|id| self.memories.get(id))
            .filter(|m| m.effective_importance() >= min_importance)
            .collect();
        let total = matching.len();

        match sort_by {
            SortBy::Relevance => matching.sort_by(|a, b| {
                let ra = a.effective_importance() as i64 + 2 * a.retrievals as i64;
                let rb = b.effective_importance() as i64 + 2 * b.retrievals as i64;
                rb.cmp(&ra).then_with(|| b.insertion_order.cmp(&a.insertion_order))
            }),
            SortBy::Date => matching.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.insertion_order.cmp(&a.insertion_order))
            }),
            SortBy::Importance => matching.sort_by(|a, b| {
                b.effective_importance()
                    .cmp(&a.effective_importance())
                    .then_with(|| b.insertion_order.cmp(&a.insertion_order))
            }),
        }

        let selected: Vec<String> = matching
            .into_iter()
            .take(limit)
            .map(|m| m.memory_id.clone())
            .collect();

        // Feedback is applied before returning so the next retrieve observes
        // the updated counters.
        for id in &selected {
            self.record_retrieval(id);
        }

        let memories: Vec<Memory> = selected
            .iter()
            .filter_map(|id| self.memories.get(id).cloned())
            .collect();
        let compressed = if include_compressed {
            self.compressed.get(&topic).cloned()
        } else {
            None
        };

        RetrieveResult {
            memories,
            total,
            compressed,
        }
    }

    fn record_retrieval(&mut self, memory_id: &str) {
        let auto_boost = {
            let Some(memory) = self.memories.get_mut(memory_id) else {
                return;
            };
            memory.retrievals += 1;
            memory.retrievals % AUTO_BOOST_EVERY == 0
        };
        if auto_boost {
            self.boost(memory_id, "frequent_retrieval");
        } else {
            self.persist_feedback(memory_id);
        }
    }

    /// Free-text search across keywords, topics, and importance.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        const SCORE_THRESHOLD: f64 = 0.3;
        let query_words = quality::word_set(query);

        let mut hits: Vec<SearchHit> = self
            .memories
            .values()
            .map(|m| {
                let keyword_hits = m
                    .keywords
                    .iter()
                    .filter(|k| query_words.contains(k.as_str()))
                    .count() as f64
                    * 0.2;
                let topic_hits = m
                    .topics
                    .iter()
                    .filter(|t| query_words.contains(t.as_str()))
                    .count() as f64
                    * 0.3;
                let importance = m.effective_importance() as f64 / 100.0 * 0.2;
                SearchHit {
                    memory: m.clone(),
                    score: keyword_hits + topic_hits + importance,
                }
            })
            .filter(|h| h.score >= SCORE_THRESHOLD)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.insertion_order.cmp(&a.memory.insertion_order))
        });
        hits.truncate(limit);
        hits
    }

    // =========================================================================
    // Feedback
    // =========================================================================

    pub fn boost(&mut self, memory_id: &str, reason: &str) -> bool {
        self.adjust(memory_id, ADJUSTMENT_STEP, reason)
    }

    pub fn demote(&mut self, memory_id: &str, reason: &str) -> bool {
        self.adjust(memory_id, -ADJUSTMENT_STEP, reason)
    }

    fn adjust(&mut self, memory_id: &str, delta: i32, reason: &str) -> bool {
        let Some(memory) = self.memories.get_mut(memory_id) else {
            return false;
        };
        memory.user_adjustment =
            (memory.user_adjustment + delta).clamp(USER_ADJUSTMENT_MIN, USER_ADJUSTMENT_MAX);
        if delta > 0 {
            memory.boosts += 1;
        }
        json_log(
            "memory_feedback",
            obj(&[
                ("memory_id", v_str(memory_id)),
                ("delta", v_num(delta as f64)),
                ("reason", v_str(reason)),
                ("effective", v_num(self.memories[memory_id].effective_importance() as f64)),
            ]),
        );
        self.persist_feedback(memory_id);
        true
    }

    fn persist_feedback(&mut self, memory_id: &str) {
        let Some(memory) = self.memories.get(memory_id).cloned() else {
            return;
        };
        if let Some(db) = &mut self.store {
            if let Err(err) = db.update_feedback(&memory) {
                self.emit(KernelEvent::StorageWarning {
                    operation: "update_feedback".to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    // =========================================================================
    // Consolidation
    // =========================================================================

    /// Rebuild compressed knowledge for every topic with enough references.
    /// A no-op (and thus idempotent) when nothing was stored since the last
    /// run. Returns the number of topics rebuilt.
    pub fn consolidate(&mut self) -> usize {
        let total = self.memories.len() as u64;
        if total == self.last_consolidated_total {
            return 0;
        }
        let edges = consolidate::co_occurrence_edges(&self.index, &self.memories);
        let mut rebuilt = 0;
        let topics: Vec<(String, Vec<String>)> = self
            .index
            .iter()
            .filter(|(_, ids)| ids.len() >= CONSOLIDATE_MIN_REFS)
            .map(|(t, ids)| (t.clone(), ids.clone()))
            .collect();
        for (topic, ids) in topics {
            let knowledge = consolidate::build_for_topic(&topic, &ids, &self.memories, &edges);
            if let Some(db) = &mut self.store {
                match serde_json::to_string(&knowledge) {
                    Ok(payload) => {
                        if let Err(err) = db.upsert_compressed(&topic, &payload) {
                            self.emit(KernelEvent::StorageWarning {
                                operation: "upsert_compressed".to_string(),
                                error: err.to_string(),
                            });
                        }
                    }
                    Err(err) => self.emit(KernelEvent::StorageWarning {
                        operation: "serialize_compressed".to_string(),
                        error: err.to_string(),
                    }),
                }
            }
            self.compressed.insert(topic, knowledge);
            rebuilt += 1;
        }
        self.last_consolidated_total = total;
        json_log(
            "memory_consolidate",
            obj(&[
                ("topics_rebuilt", v_num(rebuilt as f64)),
                ("total_memories", v_num(total as f64)),
            ]),
        );
        rebuilt
    }

    pub fn compressed_for(&self, topic: &str) -> Option<&CompressedKnowledge> {
        self.compressed.get(&topic.trim().to_lowercase())
    }

    pub fn stats(&self) -> MemoryStats {
        let mut top_topics: Vec<(String, usize)> = self
            .index
            .iter()
            .map(|(t, ids)| (t.clone(), ids.len()))
            .collect();
        top_topics.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_topics.truncate(10);
        MemoryStats {
            total_memories: self.memories.len(),
            total_topics: self.index.len(),
            top_topics,
            compressed_topics: self.compressed.len(),
            last_consolidated_total: self.last_consolidated_total,
        }
    }
}

/// Rough share of the text that survived as structured knowledge.
fn knowledge_density(facts: &[Fact], combined: &str) -> f64 {
    if combined.trim().is_empty() {
        return 0.0;
    }
    let fact_chars: usize = facts.iter().map(|f| f.render().chars().count()).sum();
    (fact_chars as f64 / combined.chars().count() as f64).min(1.0)
}

const STOPWORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "have", "has", "was", "were", "are", "is",
    "for", "not", "you", "your", "what", "when", "where", "which", "there", "their", "they",
    "about", "into", "over", "then", "than", "them", "some", "such", "very", "just", "also",
];

fn keywords(combined: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for word in quality::normalize(combined).split_whitespace() {
        if word.chars().count() <= 3 || STOPWORDS.contains(&word) {
            continue;
        }
        if seen.insert(word.to_string()) {
            out.push(word.to_string());
        }
        if out.len() >= 10 {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MemoryEngine {
        MemoryEngine::new(Config::default())
    }

    fn candidate(user: &str, agent: &str, topics: &[&str]) -> MemoryCandidate {
        MemoryCandidate {
            user_text: user.to_string(),
            agent_text: agent.to_string(),
            topics: topics.iter().map(|s| s.to_string()).collect(),
            sentiment: 0.0,
        }
    }

    // Distinct wordings so successive candidates do not trip the duplicate
    // detector's similarity check.
    fn definition(topic: &str, n: usize) -> MemoryCandidate {
        let statements = [
            "the first law concerns conservation of energy across closed systems",
            "the second law states entropy never decreases spontaneously",
            "heat engines convert thermal gradients into mechanical work",
            "absolute zero is the floor temperature no process reaches",
            "free energy measures work obtainable at constant temperature",
            "enthalpy tracks heat content under constant pressure conditions",
            "carnot efficiency bounds every reversible engine performance",
            "phase transitions absorb latent heat without temperature change",
        ];
        candidate(
            &format!("Remember that {}", statements[n % statements.len()]),
            "Good point, filed away",
            &[topic],
        )
    }

    #[test]
    fn test_greeting_rejected_low_quality() {
        let mut e = engine();
        let out = e.ingest(&candidate("hi", "hello, what do you need?", &[]));
        assert!(out.memory_id.is_none());
        assert!(out.rejection_reason.unwrap().starts_with("low_quality"));
        assert_eq!(e.count(), 0);
    }

    #[test]
    fn test_definition_stored_and_indexed() {
        let mut e = engine();
        let out = e.ingest(&candidate(
            "Entropy is a measure of disorder in a system",
            "Yes, specifically in thermodynamics and information theory",
            &["entropy"],
        ));
        let id = out.memory_id.expect("stored");
        assert!(out.importance >= 70, "importance {}", out.importance);
        let m = e.get(&id).unwrap();
        assert!(m
            .facts
            .iter()
            .any(|f| matches!(f, Fact::Definition { subject, value, .. }
                if subject == "entropy" && value.contains("disorder"))));
        let result = e.retrieve("entropy", 10, 0, SortBy::Date, false);
        assert_eq!(result.total, 1);
        assert_eq!(result.memories[0].memory_id, id);
    }

    #[test]
    fn test_duplicate_ingest_rejected() {
        let mut e = engine();
        let c = candidate(
            "Entropy is a measure of disorder in a system",
            "Yes, specifically in thermodynamics and information theory",
            &["entropy"],
        );
        assert!(e.ingest(&c).memory_id.is_some());
        let second = e.ingest(&c);
        assert!(second.memory_id.is_none());
        assert_eq!(second.rejection_reason.as_deref(), Some("duplicate"));
        assert_eq!(e.count(), 1);
    }

    #[test]
    fn test_memories_never_deleted_and_always_reachable() {
        let mut e = engine();
        let mut ids = Vec::new();
        for n in 0..8 {
            let out = e.ingest(&definition("thermodynamics", n));
            ids.push(out.memory_id.expect("stored"));
        }
        let result = e.retrieve("thermodynamics", 100, 0, SortBy::Date, false);
        assert_eq!(result.total, 8);
        for id in &ids {
            assert!(result.memories.iter().any(|m| &m.memory_id == id));
        }
    }

    #[test]
    fn test_retrieval_records_feedback_and_auto_boosts() {
        let mut e = engine();
        let id = e
            .ingest(&candidate(
                "Entropy is a measure of disorder in a system",
                "Yes, specifically in thermodynamics",
                &["entropy"],
            ))
            .memory_id
            .unwrap();
        for _ in 0..3 {
            e.retrieve("entropy", 10, 0, SortBy::Importance, false);
        }
        let m = e.get(&id).unwrap();
        assert_eq!(m.retrievals, 3);
        assert_eq!(m.boosts, 1, "third retrieval auto-boosts");
        assert_eq!(m.user_adjustment, 10);
    }

    #[test]
    fn test_boost_then_demote_round_trips() {
        let mut e = engine();
        let id = e
            .ingest(&candidate(
                "Entropy is a measure of disorder in a system",
                "Yes, specifically in thermodynamics",
                &["entropy"],
            ))
            .memory_id
            .unwrap();
        let before = e.get(&id).unwrap().effective_importance();
        assert!(e.boost(&id, "useful"));
        assert!(e.demote(&id, "changed my mind"));
        assert_eq!(e.get(&id).unwrap().effective_importance(), before);
    }

    #[test]
    fn test_adjustment_clamped() {
        let mut e = engine();
        let id = e
            .ingest(&candidate(
                "Entropy is a measure of disorder in a system",
                "Yes, specifically in thermodynamics",
                &["entropy"],
            ))
            .memory_id
            .unwrap();
        for _ in 0..10 {
            e.boost(&id, "love it");
        }
        assert_eq!(e.get(&id).unwrap().user_adjustment, USER_ADJUSTMENT_MAX);
        for _ in 0..10 {
            e.demote(&id, "never mind");
        }
        assert_eq!(e.get(&id).unwrap().user_adjustment, USER_ADJUSTMENT_MIN);
    }

    #[test]
    fn test_feedback_on_unknown_id_returns_false() {
        let mut e = engine();
        assert!(!e.boost("M-nope", "reason"));
        assert!(!e.demote("M-nope", "reason"));
    }

    #[test]
    fn test_search_ranks_topic_matches() {
        let mut e = engine();
        e.ingest(&candidate(
            "Entropy is a measure of disorder in a system",
            "Yes, specifically in thermodynamics",
            &["entropy"],
        ));
        e.ingest(&candidate(
            "Gravity is the curvature of spacetime caused by mass",
            "Right, as described by general relativity",
            &["gravity"],
        ));
        let hits = e.search("tell me about entropy", 5);
        assert!(!hits.is_empty());
        assert!(hits[0].memory.topics.contains(&"entropy".to_string()));
    }

    #[test]
    fn test_consolidation_builds_compressed_knowledge() {
        let mut e = engine();
        for n in 0..6 {
            e.ingest(&definition("entropy", n));
        }
        let rebuilt = e.consolidate();
        assert_eq!(rebuilt, 1);
        let ck = e.compressed_for("entropy").expect("compressed exists");
        assert_eq!(ck.total_references, 6);
        assert!(ck.key_insights.len() <= 10);
    }

    #[test]
    fn test_consolidation_idempotent_without_new_memories() {
        let mut e = engine();
        for n in 0..6 {
            e.ingest(&definition("entropy", n));
        }
        assert_eq!(e.consolidate(), 1);
        assert_eq!(e.consolidate(), 0, "no new memory, nothing rebuilt");
    }

    #[test]
    fn test_related_topics_from_co_occurrence() {
        let mut e = engine();
        for n in 0..6 {
            let mut c = definition("entropy", n);
            c.topics.push("physics".to_string());
            e.ingest(&c);
        }
        e.consolidate();
        let ck = e.compressed_for("entropy").unwrap();
        assert!(ck.related_topics.iter().any(|r| r.topic == "physics"));
    }

    #[test]
    fn test_stats_reports_top_topics() {
        let mut e = engine();
        for n in 0..3 {
            e.ingest(&definition("entropy", n));
        }
        e.ingest(&definition("gravity", 0));
        let stats = e.stats();
        assert_eq!(stats.total_memories, 4);
        assert_eq!(stats.top_topics[0].0, "entropy");
        assert_eq!(stats.top_topics[0].1, 3);
    }

    #[test]
    fn test_repetition_counter_updates_even_on_rejection() {
        let mut e = engine();
        // Status requests are rejected before scoring, yet still count as
        // topic mentions.
        for _ in 0..3 {
            e.ingest(&candidate("show me your status", "all green", &["smalltalk"]));
        }
        assert_eq!(e.count(), 0);
        assert_eq!(e.repetition.strength("smalltalk"), 3);
    }

    #[test]
    fn test_storage_error_leaves_engine_consistent() {
        // A store whose schema was never initialized fails every insert.
        let store = MemoryStore::open_in_memory().unwrap();
        let mut e = MemoryEngine::with_store(Config::default(), store);
        let out = e.ingest(&candidate(
            "Entropy is a measure of disorder in a system",
            "Yes, specifically in thermodynamics",
            &["entropy"],
        ));
        assert!(out.memory_id.is_none());
        assert_eq!(out.rejection_reason.as_deref(), Some("storage_error"));
        assert_eq!(e.count(), 0);
        assert!(e.retrieve("entropy", 10, 0, SortBy::Date, false).memories.is_empty());
    }
}
