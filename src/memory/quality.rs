//! Quality gate for memory ingestion.
//!
//! A candidate is scored additively from content signals, penalized for
//! noise, then admitted only above the importance threshold. Low-quality
//! templates and duplicates are rejected outright, before scoring matters.
//! The filter is a pure function over (candidate, stored digests, repetition
//! counts); it owns no durable state of its own.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDecision {
    Store,
    RejectLowQuality,
    RejectDuplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub decision: QualityDecision,
    pub importance: i32,
    pub rejection_reason: Option<String>,
}

/// Minimal view of an already-stored memory, enough for duplicate checks.
#[derive(Debug, Clone)]
pub struct StoredDigest {
    pub signature: String,
    pub topics: HashSet<String>,
    pub words: HashSet<String>,
}

/// Process-wide topic repetition counter. Owned by the memory engine and
/// updated on every candidate, stored or not; repeated mention of a topic
/// is itself a signal the topic matters.
#[derive(Debug, Default)]
pub struct RepetitionCounter {
    counts: HashMap<String, (u32, u64)>,
}

impl RepetitionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-increment strength of a topic.
    pub fn strength(&self, topic: &str) -> u32 {
        self.counts.get(topic).map(|(c, _)| *c).unwrap_or(0)
    }

    /// Increment and return the post-increment count.
    pub fn increment(&mut self, topic: &str, now: u64) -> u32 {
        let entry = self.counts.entry(topic.to_string()).or_insert((0, now));
        entry.0 += 1;
        entry.1 = now;
        entry.0
    }

    /// Step-function boost for one topic's post-increment count.
    pub fn boost_for(count: u32) -> i32 {
        match count {
            0 | 1 => 0,
            2 => 10,
            3 | 4 => 15,
            5..=9 => 20,
            _ => 30,
        }
    }
}

// =============================================================================
// Normalization and similarity
// =============================================================================

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First 50 chars of the normalized text: the duplicate signature.
pub fn signature(text: &str) -> String {
    normalize(text).chars().take(50).collect()
}

pub fn word_set(text: &str) -> HashSet<String> {
    normalize(text)
        .split_whitespace()
        .map(|w| w.to_string())
        .collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn topic_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Duplicate test against one stored digest: identical signature, or high
/// topic overlap combined with high word similarity. Similarity exactly at
/// the threshold counts as duplicate.
pub fn is_duplicate(
    cfg: &Config,
    candidate_sig: &str,
    candidate_topics: &HashSet<String>,
    candidate_words: &HashSet<String>,
    stored: &StoredDigest,
) -> bool {
    if !candidate_sig.is_empty() && candidate_sig == stored.signature {
        return true;
    }
    topic_overlap(candidate_topics, &stored.topics) >= cfg.duplicate_topic_overlap
        && jaccard(candidate_words, &stored.words) >= cfg.duplicate_similarity
}

// =============================================================================
// Low-quality templates
// =============================================================================

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "good morning", "good evening", "good afternoon", "yo", "sup",
];
const THANKS: &[&str] = &["thanks", "thank you", "thx", "ty", "much appreciated"];
const GOODBYES: &[&str] = &["bye", "goodbye", "see you", "later", "good night"];
const STATUS_REQUESTS: &[&str] = &[
    "show me your status",
    "show me your index",
    "show me your log",
    "show status",
    "show index",
    "show log",
];

fn matches_template(norm: &str, templates: &[&str]) -> bool {
    templates.iter().any(|t| norm == *t)
}

/// Purely-low-quality utterances are rejected before scoring.
pub fn low_quality_reason(user_text: &str) -> Option<&'static str> {
    let norm = normalize(user_text);
    if norm.chars().count() < 10 {
        return Some("too_short");
    }
    if matches_template(&norm, GREETINGS) {
        return Some("greeting_only");
    }
    if matches_template(&norm, THANKS) {
        return Some("thanks_only");
    }
    if matches_template(&norm, GOODBYES) {
        return Some("goodbye_only");
    }
    if STATUS_REQUESTS.iter().any(|t| norm.starts_with(t)) {
        return Some("status_request");
    }
    None
}

// =============================================================================
// Importance scoring
// =============================================================================

const LEARNING_MARKERS: &[&str] = &["teach", "learn", "lesson", "explain to me", "explain how"];
const FACTUAL_MARKERS: &[&str] = &[" is ", " are ", " means ", " causes "];
const CAUSAL_MARKERS: &[&str] = &["because", "therefore", "if ", " then "];
const PROCEDURAL_MARKERS: &[&str] = &["how to", "steps to"];
const EMPHASIS_MARKERS: &[&str] = &["remember", "important", "must "];
const QUESTION_STARTS: &[&str] = &["what ", "why ", "how ", "when ", "where ", "which "];
const INSTRUCTION_MARKERS: &[&str] = &["you should", "make sure", "always ", "never ", "configure", "install"];
const ANECDOTE_MARKERS: &[&str] = &["i went", "i saw", "i met", "yesterday i", "my friend"];
const OPINION_MARKERS: &[&str] = &["i think", "i feel", "in my opinion", "i believe"];
const DATE_MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may ", "june", "july", "august", "september",
    "october", "november", "december",
];

fn any_marker(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}

/// yyyy-mm-dd anywhere in the text.
fn has_iso_date(text: &str) -> bool {
    text.split_whitespace().any(|token| {
        let parts: Vec<&str> = token.split('-').collect();
        parts.len() == 3
            && parts[0].len() == 4
            && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    })
}

fn has_proper_name(original: &str) -> bool {
    // A capitalized word that does not open a sentence.
    let mut sentence_start = true;
    for word in original.split_whitespace() {
        let capitalized = word
            .chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false);
        if capitalized && !sentence_start {
            return true;
        }
        sentence_start = word.ends_with('.') || word.ends_with('!') || word.ends_with('?');
    }
    false
}

/// Additive importance score for one candidate, before clamping the final
/// value to [0, 100]. `repetition_boost` is computed by the caller from the
/// post-increment counter values (the counter is shared state, the scoring
/// is not).
pub fn importance_score(
    user_text: &str,
    agent_text: &str,
    topics: &[String],
    novel: bool,
    repetition_boost: i32,
) -> i32 {
    let combined_original = format!("{} {}", user_text, agent_text);
    let text = combined_original.to_lowercase();
    let mut score: i32 = 20;

    if any_marker(&text, LEARNING_MARKERS) {
        score += 40;
    }
    if any_marker(&text, FACTUAL_MARKERS) {
        score += 25;
    }
    if any_marker(&text, CAUSAL_MARKERS) {
        score += 20;
    }
    if any_marker(&text, PROCEDURAL_MARKERS) {
        score += 25;
    }
    if any_marker(&text, EMPHASIS_MARKERS) {
        score += 30;
    }
    if novel {
        score += 20;
    }
    let user_lower = user_text.to_lowercase();
    if user_lower.contains('?') || QUESTION_STARTS.iter().any(|q| user_lower.starts_with(q)) {
        score += 15;
    }

    let len = combined_original.chars().count();
    if len > 50 {
        score += 10;
    }
    if len > 100 {
        score += 10;
    }
    if len > 200 {
        score += 5;
    }

    score += (6 * topics.len() as i32).min(20);

    if text.chars().any(|c| c.is_ascii_digit()) {
        score += 8;
    }
    if any_marker(&text, DATE_MONTHS) || has_iso_date(&text) {
        score += 10;
    }
    if text.contains("http") || text.contains("www.") {
        score += 12;
    }
    if has_proper_name(&combined_original) {
        score += 8;
    }
    if any_marker(&text, INSTRUCTION_MARKERS) {
        score += 15;
    }
    score += repetition_boost.min(40);

    // Penalties. Opinion and anecdote are independent signals; a rambling
    // opinionated story takes both hits.
    let factual = any_marker(&text, FACTUAL_MARKERS);
    if any_marker(&text, ANECDOTE_MARKERS) && !factual {
        score -= 25;
    }
    if user_text.chars().count() < 15 {
        score -= 25;
    }
    if matches_template(&normalize(user_text), GREETINGS)
        || matches_template(&normalize(user_text), THANKS)
        || matches_template(&normalize(user_text), GOODBYES)
    {
        score -= 35;
    }
    if STATUS_REQUESTS.iter().any(|t| normalize(user_text).starts_with(t)) {
        score -= 20;
    }
    if any_marker(&text, OPINION_MARKERS) && !factual {
        score -= 15;
    }

    score.clamp(0, 100)
}

/// Final admission decision once importance, duplicate, and template checks
/// are in hand.
pub fn decide(cfg: &Config, importance: i32, duplicate: bool, low_quality: Option<&str>) -> Classification {
    if let Some(reason) = low_quality {
        return Classification {
            decision: QualityDecision::RejectLowQuality,
            importance,
            rejection_reason: Some(format!("low_quality:{}", reason)),
        };
    }
    if duplicate {
        return Classification {
            decision: QualityDecision::RejectDuplicate,
            importance,
            rejection_reason: Some("duplicate".to_string()),
        };
    }
    if importance >= cfg.importance_threshold {
        Classification {
            decision: QualityDecision::Store,
            importance,
            rejection_reason: None,
        }
    } else {
        Classification {
            decision: QualityDecision::RejectLowQuality,
            importance,
            rejection_reason: Some("low_value".to_string()),
        }
    }
}
