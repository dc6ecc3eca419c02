//! Structured logging for the reasoning kernel.
//!
//! Every pass leaves a replayable trail: JSONL records with a run id, a
//! monotone sequence number, a domain tag for filtering, and content hashes
//! so a decision can be correlated with its exact input. Records fan out to
//! per-run files (events / trace / metrics) and to stdout.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn from_env() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or(Level::Info)
    }

    fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" => Level::Warn,
            "error" => Level::Error,
            "fatal" => Level::Fatal,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

/// Record categories, filterable via LOG_DOMAINS (comma list or "all").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Reason,
    Ethics,
    Memory,
    Quality,
    Watchdog,
    System,
    Profile,
    Audit,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Reason => "reason",
            Domain::Ethics => "ethics",
            Domain::Memory => "memory",
            Domain::Quality => "quality",
            Domain::Watchdog => "watchdog",
            Domain::System => "system",
            Domain::Profile => "profile",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(list) => list.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

/// Which per-run file a record lands in.
#[derive(Clone, Copy)]
enum Stream {
    Events = 0,
    Trace = 1,
    Metrics = 2,
}

const STREAM_FILES: [&str; 3] = ["events.jsonl", "trace.jsonl", "metrics.jsonl"];

struct Sink {
    run_id: String,
    writers: [Mutex<BufWriter<File>>; 3],
}

impl Sink {
    fn write(&self, stream: Stream, line: &str) {
        if let Ok(mut w) = self.writers[stream as usize].lock() {
            let _ = writeln!(w, "{}", line);
        }
    }
}

static SINK: OnceLock<Sink> = OnceLock::new();
static SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);

fn sink() -> &'static Sink {
    SINK.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let run_dir: PathBuf = [base.as_str(), run_id.as_str()].iter().collect();
        if let Err(err) = std::fs::create_dir_all(&run_dir) {
            eprintln!("[log] cannot create {}: {}", run_dir.display(), err);
        }

        let manifest = json!({
            "run_id": run_id,
            "started": ts_now(),
            "pid": process::id(),
        });
        let _ = std::fs::write(run_dir.join("manifest.json"), manifest.to_string());

        let open = |name: &str| -> Mutex<BufWriter<File>> {
            let file = File::create(run_dir.join(name)).unwrap_or_else(|err| {
                eprintln!("[log] cannot create {}: {}", name, err);
                File::create(format!("/tmp/arbiter-{}", name)).expect("log fallback")
            });
            Mutex::new(BufWriter::new(file))
        };

        Sink {
            run_id,
            writers: [
                open(STREAM_FILES[Stream::Events as usize]),
                open(STREAM_FILES[Stream::Trace as usize]),
                open(STREAM_FILES[Stream::Metrics as usize]),
            ],
        }
    })
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// RFC3339 with millisecond precision.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub fn ts_epoch() -> u64 {
    Utc::now().timestamp() as u64
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// Keys promoted out of `data` to the record's top level, so the common
/// correlation fields are grep-able without unpacking.
const PROMOTED: [&str; 5] = ["corr_id", "agent", "memory_id", "topic", "msg"];

/// Emit one structured record.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit(level, domain.as_str(), event, fields);
}

/// Info-level shorthand named after its module, the workhorse call.
pub fn json_log(module: &str, fields: Map<String, Value>) {
    emit(Level::Info, module, module, fields);
}

fn emit(level: Level, component: &str, event: &str, mut fields: Map<String, Value>) {
    let sink = sink();

    let mut record = Map::new();
    record.insert("ts".into(), json!(ts_now()));
    record.insert("run_id".into(), json!(sink.run_id));
    record.insert("seq".into(), json!(SEQ.fetch_add(1, Ordering::SeqCst)));
    record.insert("lvl".into(), json!(level.as_str().to_uppercase()));
    record.insert("component".into(), json!(component));
    record.insert("event".into(), json!(event));
    for key in PROMOTED {
        if let Some(value) = fields.remove(key) {
            record.insert(key.into(), value);
        }
    }
    record.insert("data".into(), Value::Object(fields));

    let line = Value::Object(record).to_string();
    if component == "metrics" || event.starts_with("metrics.") {
        sink.write(Stream::Metrics, &line);
    }
    let stream = if level <= Level::Debug {
        Stream::Trace
    } else {
        Stream::Events
    };
    sink.write(stream, &line);
    println!("{}", line);
}

// ---------------------------------------------------------------------------
// Domain helpers
// ---------------------------------------------------------------------------

/// One completed decision, enough to replay the path taken.
pub fn log_decision(
    corr_id: &str,
    agent: &str,
    decision: &str,
    confidence: f64,
    levels: &[u8],
    path: &[String],
    input_hash: &str,
) {
    log(
        Level::Info,
        Domain::Reason,
        "decision",
        obj(&[
            ("corr_id", v_str(corr_id)),
            ("agent", v_str(agent)),
            ("decision", v_str(decision)),
            ("confidence", v_num(confidence)),
            ("levels", json!(levels)),
            ("path", json!(path)),
            ("input_hash", v_str(input_hash)),
        ]),
    );
}

pub fn log_verdict(corr_id: &str, approved: bool, score: f64, violations: &[String]) {
    log(
        Level::Info,
        Domain::Ethics,
        "verdict",
        obj(&[
            ("corr_id", v_str(corr_id)),
            ("approved", Value::Bool(approved)),
            ("compliance_score", v_num(score)),
            ("violations", json!(violations)),
        ]),
    );
}

pub fn log_rejection(reason: &str, importance: i64, signature: &str) {
    log(
        Level::Debug,
        Domain::Quality,
        "rejected",
        obj(&[
            ("reason", v_str(reason)),
            ("importance", json!(importance)),
            ("signature", v_str(signature)),
        ]),
    );
}

pub fn log_isolation(agent: &str, reason: &str, health_score: f64) {
    log(
        Level::Warn,
        Domain::Watchdog,
        "isolated",
        obj(&[
            ("agent", v_str(agent)),
            ("reason", v_str(reason)),
            ("health_score", v_num(health_score)),
        ]),
    );
}

pub fn log_audit(event_type: &str, input_hash: &str, output_hash: &str) {
    log(
        Level::Info,
        Domain::Audit,
        event_type,
        obj(&[
            ("input_hash", v_str(input_hash)),
            ("output_hash", v_str(output_hash)),
        ]),
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Stable sha256 content hash, hex, truncated to 16 chars. Stable across
/// runs and hosts, unlike a hasher seeded per process.
pub fn content_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// ---------------------------------------------------------------------------
// Profiling
// ---------------------------------------------------------------------------

/// RAII timing scope; emits a trace-level record on drop. Sampling rate is
/// controlled by PROFILE_SAMPLE in [0, 1].
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::build(label, None)
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self::build(label, Some(obj(fields)))
    }

    fn build(label: &'static str, context: Option<Map<String, Value>>) -> Self {
        let enabled = Self::sampled();
        Self {
            label,
            context: if enabled { context } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn sampled() -> bool {
        let Some(rate) = std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
        else {
            return true;
        };
        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        let bucket = (PROFILE_SEQ.fetch_add(1, Ordering::SeqCst) % 10_000) as f64 / 10_000.0;
        bucket < rate
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".into(), v_str(self.label));
        fields.insert(
            "elapsed_ms".into(),
            v_num(self.started.elapsed().as_secs_f64() * 1000.0),
        );
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering_and_parse() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Warn < Level::Error);
        assert_eq!(Level::parse("warn"), Some(Level::Warn));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn test_content_hash_is_stable_and_short() {
        assert_eq!(content_hash("test-input"), content_hash("test-input"));
        assert_eq!(content_hash("test-input").len(), 16);
        assert_ne!(content_hash("a"), content_hash("b"));
    }

    #[test]
    fn test_obj_builds_a_map() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_seq_is_monotone() {
        let a = SEQ.fetch_add(1, Ordering::SeqCst);
        let b = SEQ.fetch_add(1, Ordering::SeqCst);
        assert!(b > a);
    }
}
