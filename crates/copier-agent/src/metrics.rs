use serde::{Deserialize, Serialize};

/// Lifetime counters for the agent, logged periodically and persisted
/// across restarts through the audit store's state table.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub messages_seen: u64,
    pub messages_ignored: u64,
    pub signals_parsed: u64,
    pub parse_failures: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub orders_submitted: u64,
    pub tp_hits: u64,
    pub sl_hits: u64,
    pub manual_closes: u64,
}

impl AgentMetrics {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Restore counters from a persisted snapshot; ignores unknown or
    /// malformed input so a schema change never blocks startup.
    pub fn restore_from_json(&mut self, json: &str) {
        if let Ok(saved) = serde_json::from_str::<AgentMetrics>(json) {
            *self = saved;
        }
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            "Metrics: {} messages ({} ignored), {} parsed / {} rejected, {} trades ({} failed, {} orders), closures: {} tp / {} sl / {} manual",
            self.messages_seen,
            self.messages_ignored,
            self.signals_parsed,
            self.parse_failures,
            self.trades_executed,
            self.trades_failed,
            self.orders_submitted,
            self.tp_hits,
            self.sl_hits,
            self.manual_closes,
        );
    }
}
