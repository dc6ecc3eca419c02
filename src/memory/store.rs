//! Durable persistence for the memory engine.
//!
//! One row per memory, one master topic index, one compressed-knowledge
//! table, plus audit and health-snapshot tables for the kernel. Rows are
//! only ever inserted or updated in place; nothing is deleted once written,
//! and schema changes must be additive.
//!
//! A memory and its index entries are written in one transaction, so a
//! failed write rolls back whole: the caller sees an error and the index
//! never references a missing body.

use anyhow::Result;
use rusqlite::{params, Connection};

use super::Memory;
use crate::logging::ts_epoch;

pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS memories (
                memory_id TEXT PRIMARY KEY,
                user_text TEXT NOT NULL,
                agent_text TEXT NOT NULL,
                summary TEXT NOT NULL,
                facts_json TEXT NOT NULL,
                topics_json TEXT NOT NULL,
                keywords_json TEXT NOT NULL,
                sentiment REAL NOT NULL,
                base_importance INTEGER NOT NULL,
                user_adjustment INTEGER NOT NULL,
                knowledge_density REAL NOT NULL,
                retrievals INTEGER NOT NULL,
                boosts INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS topic_index (
                topic TEXT NOT NULL,
                memory_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_topic ON topic_index(topic);
            CREATE TABLE IF NOT EXISTS compressed_knowledge (
                topic TEXT PRIMARY KEY,
                payload_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS decision_audit (
                corr_id TEXT NOT NULL,
                input_hash TEXT NOT NULL,
                decision TEXT NOT NULL,
                confidence REAL NOT NULL,
                levels_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS health_snapshots (
                ts INTEGER NOT NULL,
                payload_json TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Persist a memory body and its topic-index entries atomically.
    pub fn persist_memory(&mut self, memory: &Memory, positions: &[(String, u64)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO memories (memory_id, user_text, agent_text, summary, facts_json,
                topics_json, keywords_json, sentiment, base_importance, user_adjustment,
                knowledge_density, retrievals, boosts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                memory.memory_id,
                memory.user_text,
                memory.agent_text,
                memory.summary,
                serde_json::to_string(&memory.facts)?,
                serde_json::to_string(&memory.topics)?,
                serde_json::to_string(&memory.keywords)?,
                memory.sentiment,
                memory.base_importance,
                memory.user_adjustment,
                memory.knowledge_density,
                memory.retrievals,
                memory.boosts,
                memory.created_at as i64,
                memory.created_at as i64,
            ],
        )?;
        for (topic, position) in positions {
            tx.execute(
                "INSERT INTO topic_index (topic, memory_id, position, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![topic, memory.memory_id, *position as i64, memory.created_at as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Feedback mutations: importance adjustment and usage counters only.
    pub fn update_feedback(&mut self, memory: &Memory) -> Result<()> {
        self.conn.execute(
            "UPDATE memories
             SET user_adjustment = ?2, retrievals = ?3, boosts = ?4, updated_at = ?5
             WHERE memory_id = ?1",
            params![
                memory.memory_id,
                memory.user_adjustment,
                memory.retrievals,
                memory.boosts,
                ts_epoch() as i64,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_compressed(&mut self, topic: &str, payload_json: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO compressed_knowledge (topic, payload_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(topic) DO UPDATE SET payload_json = ?2, updated_at = ?3",
            params![topic, payload_json, ts_epoch() as i64],
        )?;
        Ok(())
    }

    pub fn persist_audit(
        &mut self,
        corr_id: &str,
        input_hash: &str,
        decision: &str,
        confidence: f64,
        levels: &[u8],
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO decision_audit (corr_id, input_hash, decision, confidence, levels_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                corr_id,
                input_hash,
                decision,
                confidence,
                serde_json::to_string(levels)?,
                ts_epoch() as i64,
            ],
        )?;
        Ok(())
    }

    pub fn persist_health(&mut self, payload_json: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO health_snapshots (ts, payload_json) VALUES (?1, ?2)",
            params![ts_epoch() as i64, payload_json],
        )?;
        Ok(())
    }

    pub fn memory_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn index_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM topic_index", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Memory;
    use super::*;

    fn sample_memory(id: &str, topics: &[&str]) -> Memory {
        Memory {
            memory_id: id.to_string(),
            user_text: "Entropy is a measure of disorder".to_string(),
            agent_text: "Indeed".to_string(),
            summary: "entropy is a measure of disorder".to_string(),
            facts: Vec::new(),
            topics: topics.iter().map(|s| s.to_string()).collect(),
            keywords: vec!["entropy".to_string()],
            sentiment: 0.0,
            base_importance: 70,
            user_adjustment: 0,
            knowledge_density: 0.5,
            retrievals: 0,
            boosts: 0,
            created_at: 1_700_000_000,
            insertion_order: 0,
        }
    }

    #[test]
    fn test_persist_and_count() {
        let mut store = MemoryStore::open_in_memory().unwrap();
        store.init().unwrap();
        let m = sample_memory("M-1", &["entropy", "physics"]);
        store
            .persist_memory(&m, &[("entropy".to_string(), 0), ("physics".to_string(), 0)])
            .unwrap();
        assert_eq!(store.memory_count().unwrap(), 1);
        assert_eq!(store.index_count().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_primary_key_rolls_back_index() {
        let mut store = MemoryStore::open_in_memory().unwrap();
        store.init().unwrap();
        let m = sample_memory("M-1", &["entropy"]);
        store
            .persist_memory(&m, &[("entropy".to_string(), 0)])
            .unwrap();
        // Second insert with the same id fails before any index write lands
        let err = store.persist_memory(&m, &[("entropy".to_string(), 1)]);
        assert!(err.is_err());
        assert_eq!(store.memory_count().unwrap(), 1);
        assert_eq!(store.index_count().unwrap(), 1, "index stays consistent");
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut store = MemoryStore::open_in_memory().unwrap();
        store.init().unwrap();
        store.init().unwrap();
    }

    #[test]
    fn test_upsert_compressed_overwrites() {
        let mut store = MemoryStore::open_in_memory().unwrap();
        store.init().unwrap();
        store.upsert_compressed("entropy", "{\"v\":1}").unwrap();
        store.upsert_compressed("entropy", "{\"v\":2}").unwrap();
        let payload: String = store
            .conn
            .query_row(
                "SELECT payload_json FROM compressed_knowledge WHERE topic = 'entropy'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(payload, "{\"v\":2}");
    }
}
