//! The kernel: wiring between reasoner, memory, ethics, and watchdog.
//!
//! This is the caller surface upstream components talk to. One instance per
//! process; components live behind short-lived locks and nothing suspends
//! while holding one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::action::Action;
use crate::config::Config;
use crate::ethics::EthicsRegistry;
use crate::events::{self, EventBus, KernelEvent};
use crate::logging::{content_hash, json_log, log_audit, obj, v_num, v_str};
use crate::memory::store::MemoryStore;
use crate::memory::{
    IngestOutcome, MemoryCandidate, MemoryEngine, MemoryStats, RetrieveResult, SearchHit, SortBy,
};
use crate::reasoner::collaborators::{
    ContextCollaborator, RiskCollaborator, TruthCollaborator,
};
use crate::reasoner::synthesis::Decision;
use crate::reasoner::{HierarchicalReasoner, ReasonerStats, ReasoningTrace};
use crate::watchdog::{AgentHealth, HealthMonitor, Observation};

/// External collaborators for the conditional levels. Any of them may be
/// absent; the matching level is then skipped with a neutral score.
#[derive(Default)]
pub struct Collaborators {
    pub context: Option<Arc<dyn ContextCollaborator>>,
    pub truth: Option<Arc<dyn TruthCollaborator>>,
    pub risk: Option<Arc<dyn RiskCollaborator>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Boost,
    Demote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub agents: std::collections::BTreeMap<String, AgentHealth>,
    pub reasoner_stats: ReasonerStats,
    pub memory_stats: MemoryStats,
    pub emergency_halted: bool,
    pub halt_reason: Option<String>,
}

/// EWMA of pass durations; sustained overrun flips the reasoner into
/// degraded (consultation-sampling) mode and raises a watchdog warning.
struct PassTracker {
    ewma_ms: f64,
    above_since: Option<Instant>,
    warned: bool,
}

impl PassTracker {
    fn new() -> Self {
        Self {
            ewma_ms: 0.0,
            above_since: None,
            warned: false,
        }
    }

    /// Returns Some(sustained_secs) when the threshold has been exceeded
    /// long enough to warrant a warning.
    fn update(&mut self, duration_ms: f64, threshold_ms: f64, sustain_secs: u64) -> Option<u64> {
        self.ewma_ms = if self.ewma_ms == 0.0 {
            duration_ms
        } else {
            0.9 * self.ewma_ms + 0.1 * duration_ms
        };
        if self.ewma_ms > threshold_ms {
            let since = *self.above_since.get_or_insert_with(Instant::now);
            let sustained = since.elapsed().as_secs();
            if sustained >= sustain_secs && !self.warned {
                self.warned = true;
                return Some(sustained);
            }
        } else {
            self.above_since = None;
            self.warned = false;
        }
        None
    }
}

pub struct Kernel {
    cfg: Config,
    reasoner: Arc<HierarchicalReasoner>,
    memory: Mutex<MemoryEngine>,
    monitor: Arc<Mutex<HealthMonitor>>,
    events_rx: Mutex<UnboundedReceiver<KernelEvent>>,
    bus: EventBus,
    audit_store: Option<Mutex<MemoryStore>>,
    pass_tracker: Mutex<PassTracker>,
    degraded: AtomicBool,
}

impl Kernel {
    /// In-memory kernel (no sqlite), for tests and ephemeral runs.
    pub fn new(cfg: Config, collaborators: Collaborators) -> Result<Self> {
        Self::build(cfg, collaborators, false)
    }

    /// Kernel with durable memory and audit storage at `cfg.sqlite_path`.
    pub fn with_persistence(cfg: Config, collaborators: Collaborators) -> Result<Self> {
        Self::build(cfg, collaborators, true)
    }

    fn build(cfg: Config, collaborators: Collaborators, persist: bool) -> Result<Self> {
        // A malformed rule source is fatal; nothing runs without ethics.
        let ethics = Arc::new(EthicsRegistry::load(&cfg)?);
        let (bus, events_rx) = EventBus::new();
        let monitor = Arc::new(Mutex::new(HealthMonitor::with_events(
            cfg.clone(),
            bus.clone(),
        )));

        let mut memory = if persist {
            let mut store = MemoryStore::open(&cfg.sqlite_path)?;
            store.init()?;
            MemoryEngine::with_store(cfg.clone(), store)
        } else {
            MemoryEngine::new(cfg.clone())
        };
        memory.set_event_sender(bus.sender());

        let audit_store = if persist {
            let mut store = MemoryStore::open(&cfg.sqlite_path)?;
            store.init()?;
            Some(Mutex::new(store))
        } else {
            None
        };

        let mut reasoner = HierarchicalReasoner::new(cfg.clone(), ethics, monitor.clone());
        if let Some(c) = collaborators.context {
            reasoner = reasoner.with_context(c);
        }
        if let Some(t) = collaborators.truth {
            reasoner = reasoner.with_truth(t);
        }
        if let Some(r) = collaborators.risk {
            reasoner = reasoner.with_risk(r);
        }

        json_log(
            "kernel_start",
            obj(&[
                ("persist", v_str(if persist { "sqlite" } else { "memory" })),
                ("budget_ms", v_num(cfg.reason_budget_ms as f64)),
            ]),
        );

        Ok(Self {
            cfg,
            reasoner: Arc::new(reasoner),
            memory: Mutex::new(memory),
            monitor,
            events_rx: Mutex::new(events_rx),
            bus,
            audit_store,
            pass_tracker: Mutex::new(PassTracker::new()),
            degraded: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // Caller surface
    // =========================================================================

    /// Run one reasoning pass over a proposed action.
    pub async fn decide(&self, action: &Action, force_full: bool) -> Result<ReasoningTrace> {
        let started = Instant::now();
        let mut trace = self.reasoner.decide(action, force_full).await?;

        // During an emergency halt nothing may be approved; the verdict and
        // trace still run so the caller can see why.
        if self.is_halted() && trace.decision == Decision::Approved {
            trace.decision = Decision::Escalate;
            trace
                .warnings
                .push("emergency halt active, approval withheld".to_string());
        }

        // The watchdog sees every decision: denials count against the
        // originating agent, with the violated rule attached.
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.record(
                &action.agent,
                Observation {
                    success: trace.decision != Decision::Denied,
                    latency_ms: duration_ms,
                    violation: trace.violations.first().cloned(),
                },
            );
        }

        let output_hash = content_hash(&format!(
            "{}|{:.3}|{:?}",
            trace.decision.as_str(),
            trace.confidence,
            trace.levels_executed
        ));
        log_audit("decision", &action.input_hash(), &output_hash);
        if let Some(store) = &self.audit_store {
            if let Ok(mut store) = store.lock() {
                let _ = store.persist_audit(
                    &trace.correlation_id,
                    &action.input_hash(),
                    trace.decision.as_str(),
                    trace.confidence,
                    &trace.levels_executed,
                );
            }
        }

        self.track_pass(duration_ms);
        Ok(trace)
    }

    /// Offer one conversational turn to the memory pipeline.
    pub fn ingest(&self, candidate: &MemoryCandidate) -> IngestOutcome {
        match self.memory.lock() {
            Ok(mut memory) => memory.ingest(candidate),
            Err(_) => IngestOutcome {
                memory_id: None,
                importance: 0,
                rejection_reason: Some("engine_unavailable".to_string()),
            },
        }
    }

    pub fn query_memory(
        &self,
        topic: &str,
        limit: usize,
        min_importance: i32,
        sort_by: SortBy,
        include_compressed: bool,
    ) -> RetrieveResult {
        match self.memory.lock() {
            Ok(mut memory) => {
                memory.retrieve(topic, limit, min_importance, sort_by, include_compressed)
            }
            Err(_) => RetrieveResult {
                memories: Vec::new(),
                total: 0,
                compressed: None,
            },
        }
    }

    pub fn search_memory(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        self.memory
            .lock()
            .map(|m| m.search(query, limit))
            .unwrap_or_default()
    }

    pub fn feedback(&self, memory_id: &str, kind: FeedbackKind, reason: &str) -> bool {
        let Ok(mut memory) = self.memory.lock() else {
            return false;
        };
        match kind {
            FeedbackKind::Boost => memory.boost(memory_id, reason),
            FeedbackKind::Demote => memory.demote(memory_id, reason),
        }
    }

    pub fn health(&self) -> HealthReport {
        let agents = self
            .monitor
            .lock()
            .map(|mut m| m.status_all())
            .unwrap_or_default();
        let (emergency_halted, halt_reason) = self
            .monitor
            .lock()
            .map(|m| (m.is_halted(), m.halt_reason().map(|s| s.to_string())))
            .unwrap_or((false, None));
        let memory_stats = self
            .memory
            .lock()
            .map(|m| m.stats())
            .unwrap_or_else(|_| MemoryStats {
                total_memories: 0,
                total_topics: 0,
                top_topics: Vec::new(),
                compressed_topics: 0,
                last_consolidated_total: 0,
            });
        HealthReport {
            agents,
            reasoner_stats: self.reasoner.stats(),
            memory_stats,
            emergency_halted,
            halt_reason,
        }
    }

    // =========================================================================
    // Watchdog pass-throughs
    // =========================================================================

    pub fn record_agent(&self, agent_name: &str, obs: Observation) {
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.record(agent_name, obs);
        }
    }

    pub fn isolate_agent(&self, agent_name: &str, reason: &str) {
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.isolate(agent_name, reason);
        }
    }

    pub fn restore_agent(&self, agent_name: &str) -> bool {
        self.monitor
            .lock()
            .map(|mut m| m.restore(agent_name))
            .unwrap_or(false)
    }

    pub fn emergency_halt(&self, reason: &str) {
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.emergency_halt(reason);
        }
    }

    pub fn is_halted(&self) -> bool {
        self.monitor.lock().map(|m| m.is_halted()).unwrap_or(false)
    }

    /// One watchdog cycle: isolation triggers plus the kill-file check.
    /// Public so tests and the runner can drive it deterministically.
    pub fn monitor_cycle(&self) {
        if std::path::Path::new(&self.cfg.kill_file).exists() {
            self.emergency_halt("kill file present");
        }
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.cycle();
        }
    }

    /// Drain pending watchdog/storage events into the structured log.
    pub fn drain_events(&self) -> usize {
        self.events_rx
            .lock()
            .map(|mut rx| events::drain(&mut rx))
            .unwrap_or(0)
    }

    fn track_pass(&self, duration_ms: f64) {
        let warning = self.pass_tracker.lock().ok().and_then(|mut t| {
            t.update(
                duration_ms,
                self.cfg.backpressure_avg_ms,
                self.cfg.backpressure_sustain_secs,
            )
            .map(|sustained| (t.ewma_ms, sustained))
        });
        if let Some((avg, sustained)) = warning {
            self.degraded.store(true, Ordering::SeqCst);
            self.reasoner.set_degraded(true);
            self.bus.emit(KernelEvent::BackpressureWarning {
                avg_pass_ms: avg,
                sustained_secs: sustained,
            });
        } else if self.degraded.load(Ordering::SeqCst) {
            let recovered = self
                .pass_tracker
                .lock()
                .map(|t| t.ewma_ms <= self.cfg.backpressure_avg_ms)
                .unwrap_or(false);
            if recovered {
                self.degraded.store(false, Ordering::SeqCst);
                self.reasoner.set_degraded(false);
            }
        }
    }

    // =========================================================================
    // Periodic monitor tasks
    // =========================================================================

    /// Spawn the four cooperative monitor tasks. Each is idempotent per tick
    /// and dies with its JoinHandle (abort on shutdown).
    pub fn spawn_monitors(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        // Agent health + kill file
        let kernel = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(kernel.cfg.health_interval_secs.max(1)));
            loop {
                tick.tick().await;
                kernel.monitor_cycle();
            }
        }));

        // Queue depth
        let kernel = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(kernel.cfg.queue_interval_secs.max(1)));
            loop {
                tick.tick().await;
                let depth = kernel.events_rx.lock().map(|rx| rx.len()).unwrap_or(0);
                json_log(
                    "metrics",
                    obj(&[("metric", v_str("event_queue_depth")), ("depth", v_num(depth as f64))]),
                );
            }
        }));

        // Compliance
        let kernel = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(
                kernel.cfg.compliance_interval_secs.max(1),
            ));
            loop {
                tick.tick().await;
                if let Some((avg, window)) = kernel.reasoner.recent_compliance() {
                    json_log(
                        "metrics",
                        obj(&[
                            ("metric", v_str("avg_compliance")),
                            ("value", v_num(avg)),
                            ("window", v_num(window as f64)),
                        ]),
                    );
                    if avg < 0.7 {
                        json_log(
                            "compliance_warning",
                            obj(&[("avg_compliance", v_num(avg)), ("window", v_num(window as f64))]),
                        );
                    }
                }
                if let Some(store) = &kernel.audit_store {
                    let payload = json!(kernel.health()).to_string();
                    if let Ok(mut store) = store.lock() {
                        let _ = store.persist_health(&payload);
                    }
                }
            }
        }));

        // Event drain
        let kernel = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                kernel.drain_events();
            }
        }));

        handles
    }
}
