//! Kernel event surface.
//!
//! Watchdog and storage failures never abort a pass; they surface here and
//! are drained by the event-drain monitor task into the structured log.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::logging::{json_log, obj, v_num, v_str};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KernelEvent {
    AgentIsolated {
        agent: String,
        reason: String,
        health_score: f64,
    },
    AgentRestored {
        agent: String,
    },
    EmergencyHalt {
        reason: String,
    },
    StorageWarning {
        operation: String,
        error: String,
    },
    BackpressureWarning {
        avg_pass_ms: f64,
        sustained_secs: u64,
    },
    ComplianceWarning {
        avg_compliance: f64,
        window: usize,
    },
}

impl KernelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            KernelEvent::AgentIsolated { .. } => "agent_isolated",
            KernelEvent::AgentRestored { .. } => "agent_restored",
            KernelEvent::EmergencyHalt { .. } => "emergency_halt",
            KernelEvent::StorageWarning { .. } => "storage_warning",
            KernelEvent::BackpressureWarning { .. } => "backpressure_warning",
            KernelEvent::ComplianceWarning { .. } => "compliance_warning",
        }
    }
}

/// Unbounded in-process channel. Senders are cheap clones; the kernel owns
/// the single receiver and drains it from a monitor task.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<KernelEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<KernelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: KernelEvent) {
        // A closed receiver means shutdown is in progress; dropping the
        // event is the correct behavior then.
        let _ = self.tx.send(event);
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<KernelEvent> {
        self.tx.clone()
    }
}

/// Drain everything currently queued, logging each event. Returns how many
/// events were drained. Idempotent: an empty queue is a no-op.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<KernelEvent>) -> usize {
    let mut drained = 0;
    while let Ok(event) = rx.try_recv() {
        drained += 1;
        match &event {
            KernelEvent::AgentIsolated {
                agent,
                reason,
                health_score,
            } => json_log(
                "watchdog_event",
                obj(&[
                    ("event", v_str(event.kind())),
                    ("agent", v_str(agent)),
                    ("reason", v_str(reason)),
                    ("health_score", v_num(*health_score)),
                ]),
            ),
            KernelEvent::AgentRestored { agent } => json_log(
                "watchdog_event",
                obj(&[("event", v_str(event.kind())), ("agent", v_str(agent))]),
            ),
            KernelEvent::EmergencyHalt { reason } => json_log(
                "watchdog_event",
                obj(&[("event", v_str(event.kind())), ("reason", v_str(reason))]),
            ),
            KernelEvent::StorageWarning { operation, error } => json_log(
                "memory_event",
                obj(&[
                    ("event", v_str(event.kind())),
                    ("operation", v_str(operation)),
                    ("error", v_str(error)),
                ]),
            ),
            KernelEvent::BackpressureWarning {
                avg_pass_ms,
                sustained_secs,
            } => json_log(
                "reasoner_event",
                obj(&[
                    ("event", v_str(event.kind())),
                    ("avg_pass_ms", v_num(*avg_pass_ms)),
                    ("sustained_secs", v_num(*sustained_secs as f64)),
                ]),
            ),
            KernelEvent::ComplianceWarning {
                avg_compliance,
                window,
            } => json_log(
                "reasoner_event",
                obj(&[
                    ("event", v_str(event.kind())),
                    ("avg_compliance", v_num(*avg_compliance)),
                    ("window", v_num(*window as f64)),
                ]),
            ),
        }
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_drain() {
        let (bus, mut rx) = EventBus::new();
        bus.emit(KernelEvent::EmergencyHalt {
            reason: "test".to_string(),
        });
        bus.emit(KernelEvent::AgentRestored {
            agent: "Kenny".to_string(),
        });
        assert_eq!(drain(&mut rx), 2);
        assert_eq!(drain(&mut rx), 0, "drain is idempotent on empty queue");
    }

    #[test]
    fn test_emit_after_receiver_drop_is_silent() {
        let (bus, rx) = EventBus::new();
        drop(rx);
        bus.emit(KernelEvent::AgentRestored {
            agent: "Kenny".to_string(),
        });
    }
}
