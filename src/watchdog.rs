//! Agent health monitor.
//!
//! Tracks per-agent latency, failure, and ethics-violation metrics, and
//! isolates agents whose behavior degrades past hard thresholds. Isolation
//! is advisory to the pipeline: the reasoner refuses to consult an isolated
//! agent, but `record` keeps updating metrics so a restored agent resumes
//! with fresh data rather than a stale window.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::events::{EventBus, KernelEvent};
use crate::logging::{log_isolation, ts_epoch};

/// Rolling window of recent observations with an online mean.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    max_size: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl RollingWindow {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            values: VecDeque::with_capacity(max_size),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.max_size {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Snapshot of one agent's health. External consumers always receive copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_name: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub avg_latency_ms: f64,
    pub failure_rate: f64,
    pub health_score: f64,
    pub isolated: bool,
    pub isolation_reason: Option<String>,
    pub violations_last_minute: u32,
    pub last_activity: u64,
}

struct AgentState {
    success_count: u64,
    failure_count: u64,
    consecutive_failures: u32,
    latencies: RollingWindow,
    outcomes: VecDeque<bool>, // true = success, same window as latencies
    violation_ts: VecDeque<u64>,
    isolated: bool,
    isolation_reason: Option<String>,
    last_activity: u64,
}

impl AgentState {
    fn new(window: usize) -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            latencies: RollingWindow::new(window),
            outcomes: VecDeque::with_capacity(window),
            violation_ts: VecDeque::new(),
            isolated: false,
            isolation_reason: None,
            last_activity: 0,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }

    fn violations_last_minute(&mut self, now: u64) -> u32 {
        while let Some(front) = self.violation_ts.front() {
            if now.saturating_sub(*front) >= 60 {
                self.violation_ts.pop_front();
            } else {
                break;
            }
        }
        self.violation_ts.len() as u32
    }
}

/// One observation reported to the monitor.
#[derive(Debug, Clone)]
pub struct Observation {
    pub success: bool,
    pub latency_ms: f64,
    pub violation: Option<String>,
}

pub struct HealthMonitor {
    cfg: Config,
    agents: BTreeMap<String, AgentState>,
    halted: bool,
    halt_reason: Option<String>,
    events: Option<EventBus>,
}

impl HealthMonitor {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            agents: BTreeMap::new(),
            halted: false,
            halt_reason: None,
            events: None,
        }
    }

    pub fn with_events(cfg: Config, events: EventBus) -> Self {
        let mut m = Self::new(cfg);
        m.events = Some(events);
        m
    }

    /// Record one observation. Metrics keep updating while isolated.
    pub fn record(&mut self, agent_name: &str, obs: Observation) {
        let window = self.cfg.latency_window;
        let state = self
            .agents
            .entry(agent_name.to_string())
            .or_insert_with(|| AgentState::new(window));

        state.last_activity = ts_epoch();
        state.latencies.push(obs.latency_ms);
        if state.outcomes.len() >= window {
            state.outcomes.pop_front();
        }
        state.outcomes.push_back(obs.success);

        if obs.success {
            state.success_count += 1;
            state.consecutive_failures = 0;
        } else {
            state.failure_count += 1;
            state.consecutive_failures += 1;
        }
        if obs.violation.is_some() {
            state.violation_ts.push_back(ts_epoch());
        }
    }

    fn health_score(&self, state: &AgentState) -> f64 {
        let fail_factor = (1.0 - state.failure_rate() / self.cfg.failure_rate_threshold)
            .clamp(0.0, 1.0);
        let latency_factor =
            (1.0 - state.latencies.mean() / self.cfg.latency_threshold_ms).clamp(0.0, 1.0);
        let consec_factor = (1.0
            - state.consecutive_failures as f64 / self.cfg.consecutive_failure_threshold as f64)
            .clamp(0.0, 1.0);
        fail_factor * latency_factor * consec_factor
    }

    /// One monitor cycle: apply the automatic isolation triggers to every
    /// agent. Idempotent; re-running without new observations changes nothing.
    pub fn cycle(&mut self) {
        let now = ts_epoch();
        let mut to_isolate: Vec<(String, String, f64)> = Vec::new();

        for (name, state) in self.agents.iter_mut() {
            if state.isolated {
                continue;
            }
            let violations = state.violations_last_minute(now);
            let reason = if state.failure_rate() >= self.cfg.failure_rate_threshold {
                Some("failure_rate")
            } else if !state.latencies.is_empty()
                && state.latencies.mean() >= self.cfg.latency_threshold_ms
            {
                Some("latency")
            } else if state.consecutive_failures >= self.cfg.consecutive_failure_threshold {
                Some("consecutive_failures")
            } else if violations >= self.cfg.violations_per_minute_threshold {
                Some("violations_per_minute")
            } else {
                None
            };
            if let Some(reason) = reason {
                to_isolate.push((name.clone(), reason.to_string(), 0.0));
            }
        }

        for (name, reason, _) in to_isolate {
            self.isolate(&name, &reason);
        }
    }

    pub fn isolate(&mut self, agent_name: &str, reason: &str) {
        let window = self.cfg.latency_window;
        let state = self
            .agents
            .entry(agent_name.to_string())
            .or_insert_with(|| AgentState::new(window));
        if state.isolated {
            return;
        }
        state.isolated = true;
        state.isolation_reason = Some(reason.to_string());

        let score = self
            .agents
            .get(agent_name)
            .map(|s| self.health_score(s))
            .unwrap_or(0.0);
        log_isolation(agent_name, reason, score);
        if let Some(events) = &self.events {
            events.emit(KernelEvent::AgentIsolated {
                agent: agent_name.to_string(),
                reason: reason.to_string(),
                health_score: score,
            });
        }
    }

    /// Manual restore: clears isolation and resets the failure window so the
    /// agent is judged on post-restore behavior.
    pub fn restore(&mut self, agent_name: &str) -> bool {
        let Some(state) = self.agents.get_mut(agent_name) else {
            return false;
        };
        state.isolated = false;
        state.isolation_reason = None;
        state.consecutive_failures = 0;
        state.outcomes.clear();
        state.latencies = RollingWindow::new(self.cfg.latency_window);
        state.violation_ts.clear();
        if let Some(events) = &self.events {
            events.emit(KernelEvent::AgentRestored {
                agent: agent_name.to_string(),
            });
        }
        true
    }

    pub fn emergency_halt(&mut self, reason: &str) {
        if self.halted {
            return;
        }
        self.halted = true;
        self.halt_reason = Some(reason.to_string());
        if let Some(events) = &self.events {
            events.emit(KernelEvent::EmergencyHalt {
                reason: reason.to_string(),
            });
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    pub fn is_isolated(&self, agent_name: &str) -> bool {
        self.agents
            .get(agent_name)
            .map(|s| s.isolated)
            .unwrap_or(false)
    }

    pub fn status(&mut self, agent_name: &str) -> Option<AgentHealth> {
        let score = self
            .agents
            .get(agent_name)
            .map(|state| self.health_score(state))?;
        let now = ts_epoch();
        let state = self.agents.get_mut(agent_name)?;
        Some(AgentHealth {
            agent_name: agent_name.to_string(),
            success_count: state.success_count,
            failure_count: state.failure_count,
            consecutive_failures: state.consecutive_failures,
            avg_latency_ms: state.latencies.mean(),
            failure_rate: state.failure_rate(),
            health_score: score,
            isolated: state.isolated,
            isolation_reason: state.isolation_reason.clone(),
            violations_last_minute: state.violations_last_minute(now),
            last_activity: state.last_activity,
        })
    }

    pub fn status_all(&mut self) -> BTreeMap<String, AgentHealth> {
        let names: Vec<String> = self.agents.keys().cloned().collect();
        names
            .into_iter()
            .filter_map(|n| self.status(&n).map(|h| (n, h)))
            .collect()
    }
}
