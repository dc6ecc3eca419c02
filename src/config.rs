//! Kernel configuration, one env var per key.
//!
//! Defaults follow the operating contract: a 1 Hz pass cadence, a 1000 ms
//! decide budget with per-level consultation budgets summing well under it,
//! and watchdog thresholds tuned for isolation within one monitor cycle.

#[derive(Clone, Debug)]
pub struct Config {
    // Memory / quality filter
    pub importance_threshold: i32,
    pub duplicate_similarity: f64,
    pub duplicate_topic_overlap: f64,
    pub consolidate_every: u64,
    pub sqlite_path: String,

    // Reasoner
    pub reason_budget_ms: u64,
    pub l2_budget_ms: u64,
    pub l3_budget_ms: u64,
    pub l4_budget_ms: u64,
    pub fastpath_min_compliance: f64,
    pub fastpath_max_compliance: f64,
    pub fastpath_actions: Vec<String>,
    pub fastpath_max_rules: usize,
    pub trace_history_cap: usize,

    // Watchdog
    pub failure_rate_threshold: f64,
    pub latency_threshold_ms: f64,
    pub consecutive_failure_threshold: u32,
    pub violations_per_minute_threshold: u32,
    pub latency_window: usize,
    pub health_interval_secs: u64,
    pub queue_interval_secs: u64,
    pub compliance_interval_secs: u64,

    // Backpressure
    pub backpressure_avg_ms: f64,
    pub backpressure_sustain_secs: u64,

    // Operational
    pub kill_file: String,
    pub rules_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            importance_threshold: std::env::var("IMPORTANCE_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(55),
            duplicate_similarity: std::env::var("DUP_SIMILARITY").ok().and_then(|v| v.parse().ok()).unwrap_or(0.85),
            duplicate_topic_overlap: std::env::var("DUP_TOPIC_OVERLAP").ok().and_then(|v| v.parse().ok()).unwrap_or(0.80),
            consolidate_every: std::env::var("CONSOLIDATE_EVERY").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./arbiter.sqlite".to_string()),
            reason_budget_ms: std::env::var("REASON_BUDGET_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(1000),
            l2_budget_ms: std::env::var("L2_BUDGET_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(80),
            l3_budget_ms: std::env::var("L3_BUDGET_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            l4_budget_ms: std::env::var("L4_BUDGET_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(120),
            fastpath_min_compliance: std::env::var("FASTPATH_MIN_COMPLIANCE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.95),
            fastpath_max_compliance: std::env::var("FASTPATH_MAX_COMPLIANCE").ok().and_then(|v| v.parse().ok()).unwrap_or(1.0),
            fastpath_actions: std::env::var("FASTPATH_ACTIONS")
                .unwrap_or_else(|_| "read,query,analyze,report".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            fastpath_max_rules: std::env::var("FASTPATH_MAX_RULES").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            trace_history_cap: std::env::var("TRACE_HISTORY_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(1000),
            failure_rate_threshold: std::env::var("FAILURE_RATE_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(0.20),
            latency_threshold_ms: std::env::var("LATENCY_TH_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(5000.0),
            consecutive_failure_threshold: std::env::var("CONSEC_FAIL_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            violations_per_minute_threshold: std::env::var("VIOLATIONS_PER_MIN_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            latency_window: std::env::var("LATENCY_WINDOW").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            health_interval_secs: std::env::var("HEALTH_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            queue_interval_secs: std::env::var("QUEUE_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(2),
            compliance_interval_secs: std::env::var("COMPLIANCE_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            backpressure_avg_ms: std::env::var("BACKPRESSURE_AVG_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(500.0),
            backpressure_sustain_secs: std::env::var("BACKPRESSURE_SUSTAIN_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60),
            kill_file: std::env::var("KILL_FILE").unwrap_or_else(|_| "/tmp/ARBITER_STOP".to_string()),
            rules_path: std::env::var("RULES_PATH").ok(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // Defaults only; does not consult the environment, so tests stay
        // deterministic regardless of the shell they run in.
        Self {
            importance_threshold: 55,
            duplicate_similarity: 0.85,
            duplicate_topic_overlap: 0.80,
            consolidate_every: 100,
            sqlite_path: "./arbiter.sqlite".to_string(),
            reason_budget_ms: 1000,
            l2_budget_ms: 80,
            l3_budget_ms: 100,
            l4_budget_ms: 120,
            fastpath_min_compliance: 0.95,
            fastpath_max_compliance: 1.0,
            fastpath_actions: ["read", "query", "analyze", "report"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fastpath_max_rules: 5,
            trace_history_cap: 1000,
            failure_rate_threshold: 0.20,
            latency_threshold_ms: 5000.0,
            consecutive_failure_threshold: 5,
            violations_per_minute_threshold: 10,
            latency_window: 100,
            health_interval_secs: 5,
            queue_interval_secs: 2,
            compliance_interval_secs: 10,
            backpressure_avg_ms: 500.0,
            backpressure_sustain_secs: 60,
            kill_file: "/tmp/ARBITER_STOP".to_string(),
            rules_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.importance_threshold, 55);
        assert_eq!(cfg.duplicate_similarity, 0.85);
        assert_eq!(cfg.reason_budget_ms, 1000);
        assert_eq!(cfg.l2_budget_ms + cfg.l3_budget_ms + cfg.l4_budget_ms, 300);
        assert!(cfg.fastpath_actions.contains(&"query".to_string()));
    }
}
