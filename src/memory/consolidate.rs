//! Periodic consolidation: per-topic compressed knowledge.
//!
//! Consolidation never touches the underlying memories; it regenerates an
//! aggregate view per topic and overwrites the previous aggregate for that
//! topic. Related topics are modeled as directed co-occurrence edges keyed
//! by (from, to), so the topic graph can be cyclic without any ownership
//! cycle in the data structures.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::Memory;
use crate::logging::ts_epoch;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInsight {
    pub memory_id: String,
    pub summary: String,
    pub importance: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedTopic {
    pub topic: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedKnowledge {
    pub topic: String,
    pub total_references: usize,
    pub first_seen: u64,
    pub last_seen: u64,
    pub average_importance: f64,
    pub key_insights: Vec<KeyInsight>,
    pub related_topics: Vec<RelatedTopic>,
    pub compression_ratio: f64,
    pub last_compressed_at: u64,
}

const KEY_INSIGHT_CAP: usize = 10;
const RELATED_TOPIC_CAP: usize = 10;

/// Directed co-occurrence edges across the whole store: (from, to) → count.
pub fn co_occurrence_edges(
    index: &BTreeMap<String, Vec<String>>,
    memories: &HashMap<String, Memory>,
) -> BTreeMap<(String, String), u32> {
    let mut edges = BTreeMap::new();
    for ids in index.values() {
        for id in ids {
            let Some(memory) = memories.get(id) else { continue };
            for from in &memory.topics {
                for to in &memory.topics {
                    if from != to {
                        *edges.entry((from.clone(), to.clone())).or_insert(0) += 1;
                    }
                }
            }
        }
    }
    edges
}

/// Rebuild the compressed view of one topic from its indexed memories.
/// Deterministic for a fixed store state: ties sort by memory id.
pub fn build_for_topic(
    topic: &str,
    ids: &[String],
    memories: &HashMap<String, Memory>,
    edges: &BTreeMap<(String, String), u32>,
) -> CompressedKnowledge {
    let mut refs: Vec<&Memory> = ids.iter().filter_map(|id| memories.get(id)).collect();

    let first_seen = refs.iter().map(|m| m.created_at).min().unwrap_or(0);
    let last_seen = refs.iter().map(|m| m.created_at).max().unwrap_or(0);
    let average_importance = if refs.is_empty() {
        0.0
    } else {
        refs.iter().map(|m| m.effective_importance() as f64).sum::<f64>() / refs.len() as f64
    };

    refs.sort_by(|a, b| {
        b.effective_importance()
            .cmp(&a.effective_importance())
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
    let key_insights: Vec<KeyInsight> = refs
        .iter()
        .take(KEY_INSIGHT_CAP)
        .map(|m| KeyInsight {
            memory_id: m.memory_id.clone(),
            summary: m.summary.clone(),
            importance: m.effective_importance(),
        })
        .collect();

    let mut related: Vec<RelatedTopic> = edges
        .iter()
        .filter(|((from, _), _)| from == topic)
        .map(|((_, to), weight)| RelatedTopic {
            topic: to.clone(),
            weight: *weight,
        })
        .collect();
    related.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.topic.cmp(&b.topic)));
    related.truncate(RELATED_TOPIC_CAP);

    let original_chars: usize = refs
        .iter()
        .map(|m| m.user_text.chars().count() + m.agent_text.chars().count())
        .sum();
    let summary_chars: usize = refs.iter().map(|m| m.summary.chars().count()).sum();
    let compression_ratio = if original_chars == 0 {
        1.0
    } else {
        summary_chars as f64 / original_chars as f64
    };

    CompressedKnowledge {
        topic: topic.to_string(),
        total_references: ids.len(),
        first_seen,
        last_seen,
        average_importance,
        key_insights,
        related_topics: related,
        compression_ratio,
        last_compressed_at: ts_epoch(),
    }
}
