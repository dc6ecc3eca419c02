//! Kernel runner: one JSON command per stdin line, one pass per second.
//!
//! This is wiring, not a transport layer. Upstream components speak the
//! kernel's caller surface (decide / ingest / query / feedback / health)
//! encoded as JSONL; results come back as structured log lines.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, Duration, Instant};

use arbiter::kernel::{Collaborators, FeedbackKind, Kernel};
use arbiter::logging::{json_log, obj, v_num, v_str};
use arbiter::memory::{MemoryCandidate, SortBy};
use arbiter::reasoner::collaborators::{StubContext, StubRisk, StubTruth};
use arbiter::{Action, Config};

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
enum Command {
    Decide {
        action_type: String,
        #[serde(default)]
        parameters: Map<String, Value>,
        agent: String,
        #[serde(default)]
        force_full: bool,
    },
    Ingest {
        user_text: String,
        agent_text: String,
        #[serde(default)]
        topics: Vec<String>,
        #[serde(default)]
        sentiment: f64,
    },
    Query {
        topic: String,
        #[serde(default = "default_limit")]
        limit: usize,
        #[serde(default)]
        min_importance: i32,
        #[serde(default = "default_sort")]
        sort_by: SortBy,
        #[serde(default)]
        include_compressed: bool,
    },
    Feedback {
        memory_id: String,
        kind: FeedbackKind,
        #[serde(default)]
        reason: String,
    },
    Health,
}

fn default_limit() -> usize {
    10
}

fn default_sort() -> SortBy {
    SortBy::Relevance
}

async fn handle(kernel: &Kernel, command: Command) {
    match command {
        Command::Decide {
            action_type,
            parameters,
            agent,
            force_full,
        } => {
            let action = Action::new(&action_type, parameters, &agent);
            match kernel.decide(&action, force_full).await {
                Ok(trace) => json_log(
                    "result",
                    obj(&[
                        ("cmd", v_str("decide")),
                        ("corr_id", v_str(&trace.correlation_id)),
                        ("decision", v_str(trace.decision.as_str())),
                        ("confidence", v_num(trace.confidence)),
                        ("trace", json!(trace)),
                    ]),
                ),
                Err(err) => json_log(
                    "result",
                    obj(&[
                        ("cmd", v_str("decide")),
                        ("error", v_str(&err.to_string())),
                    ]),
                ),
            }
        }
        Command::Ingest {
            user_text,
            agent_text,
            topics,
            sentiment,
        } => {
            let outcome = kernel.ingest(&MemoryCandidate {
                user_text,
                agent_text,
                topics,
                sentiment,
            });
            json_log(
                "result",
                obj(&[("cmd", v_str("ingest")), ("outcome", json!(outcome))]),
            );
        }
        Command::Query {
            topic,
            limit,
            min_importance,
            sort_by,
            include_compressed,
        } => {
            let result =
                kernel.query_memory(&topic, limit, min_importance, sort_by, include_compressed);
            json_log(
                "result",
                obj(&[
                    ("cmd", v_str("query")),
                    ("topic", v_str(&topic)),
                    ("total", v_num(result.total as f64)),
                    ("result", json!(result)),
                ]),
            );
        }
        Command::Feedback {
            memory_id,
            kind,
            reason,
        } => {
            let applied = kernel.feedback(&memory_id, kind, &reason);
            json_log(
                "result",
                obj(&[
                    ("cmd", v_str("feedback")),
                    ("memory_id", v_str(&memory_id)),
                    ("applied", Value::Bool(applied)),
                ]),
            );
        }
        Command::Health => {
            json_log(
                "result",
                obj(&[("cmd", v_str("health")), ("health", json!(kernel.health()))]),
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Standalone runs get fixed-answer collaborators; a deployment replaces
    // these with its domain agents behind the same traits.
    let collaborators = Collaborators {
        context: Some(Arc::new(StubContext::new("ContextAgent", 0.7))),
        truth: Some(Arc::new(StubTruth::new("TruthAgent", 0.8, 0.8))),
        risk: Some(Arc::new(StubRisk::new("RiskAgent", 0.3))),
    };
    let kernel = Arc::new(Kernel::with_persistence(cfg, collaborators)?);
    let monitors = kernel.spawn_monitors();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    // One pass per second: each command is handled, then the loop sleeps out
    // the remainder of its second.
    while let Some(line) = lines.next_line().await? {
        let pass_started = Instant::now();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Command>(trimmed) {
            Ok(command) => handle(&kernel, command).await,
            Err(err) => json_log(
                "result",
                obj(&[
                    ("error", v_str("unparseable command")),
                    ("detail", v_str(&err.to_string())),
                ]),
            ),
        }
        kernel.drain_events();
        let elapsed = pass_started.elapsed();
        if elapsed < Duration::from_secs(1) {
            sleep(Duration::from_secs(1) - elapsed).await;
        }
    }

    json_log("kernel_stop", obj(&[("reason", v_str("stdin closed"))]));
    for handle in monitors {
        handle.abort();
    }
    Ok(())
}
