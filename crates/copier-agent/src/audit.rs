use anyhow::Result;
use chrono::{DateTime, Utc};

use signal_parser::ParsedSignal;

use crate::types::{ChannelContext, ExecutionOutcome};

/// Append-only audit of every processed signal, plus a key/value state
/// table for metrics snapshots. One row per inbound message that reached
/// the parser; execution columns are filled in when the outcome lands.
pub struct AuditStore {
    pool: sqlx::AnyPool,
}

impl AuditStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS signal_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                received_at TEXT NOT NULL,
                channel_id INTEGER NOT NULL,
                channel_name TEXT NOT NULL,
                raw_message TEXT NOT NULL,
                parsed_json TEXT,
                parse_error TEXT,
                outcome_success INTEGER,
                outcome_reason TEXT,
                tickets TEXT,
                total_volume REAL,
                completed_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_channel ON signal_audit(channel_id)")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_received ON signal_audit(received_at)")
            .execute(&self.pool)
            .await
            .ok();

        Ok(())
    }

    /// Record a message the parser rejected. Terminal row — no execution
    /// columns will follow.
    pub async fn record_rejected(
        &self,
        received_at: DateTime<Utc>,
        context_id: i64,
        channel_name: &str,
        raw_message: &str,
        reason: &str,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO signal_audit (received_at, channel_id, channel_name, raw_message, parse_error)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(received_at.to_rfc3339())
        .bind(context_id)
        .bind(channel_name)
        .bind(raw_message)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Record a successfully parsed signal awaiting execution.
    pub async fn record_parsed(
        &self,
        received_at: DateTime<Utc>,
        context: &ChannelContext,
        raw_message: &str,
        signal: &ParsedSignal,
    ) -> Result<i64> {
        let parsed_json = serde_json::to_string(signal)?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO signal_audit (received_at, channel_id, channel_name, raw_message, parsed_json)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(received_at.to_rfc3339())
        .bind(context.channel_id)
        .bind(&context.name)
        .bind(raw_message)
        .bind(parsed_json)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Attach the execution outcome to an audit row.
    pub async fn record_outcome(&self, audit_id: i64, outcome: &ExecutionOutcome) -> Result<()> {
        let tickets = serde_json::to_string(&outcome.tickets)?;

        sqlx::query(
            "UPDATE signal_audit
             SET outcome_success = ?, outcome_reason = ?, tickets = ?, total_volume = ?, completed_at = ?
             WHERE id = ?",
        )
        .bind(if outcome.success { 1 } else { 0 })
        .bind(&outcome.reason)
        .bind(tickets)
        .bind(outcome.total_volume)
        .bind(Utc::now().to_rfc3339())
        .bind(audit_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Save a state key-value pair.
    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load a state value by key.
    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelContext;
    use signal_parser::{Parser, ParserConfig};

    async fn setup() -> AuditStore {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite");

        let store = AuditStore::new(pool);
        store.init_tables().await.unwrap();
        store
    }

    fn context() -> ChannelContext {
        ChannelContext {
            channel_id: -1001979633557,
            name: "Adam Trader".to_string(),
            trust_tier: crate::types::TrustTier::High,
            full_margin: false,
        }
    }

    #[tokio::test]
    async fn audit_rows_carry_the_outcome() {
        let store = setup().await;
        let signal = Parser::new(ParserConfig::default())
            .parse("BUY XAUUSD Entry: 3340 SL: 3335 TP: 3350")
            .unwrap();

        let id = store
            .record_parsed(Utc::now(), &context(), "BUY XAUUSD ...", &signal)
            .await
            .unwrap();

        let outcome = ExecutionOutcome {
            success: true,
            reason: "filled".to_string(),
            tickets: vec![42],
            total_volume: 0.01,
        };
        store.record_outcome(id, &outcome).await.unwrap();

        let (success, tickets): (i64, String) = sqlx::query_as(
            "SELECT outcome_success, tickets FROM signal_audit WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&store.pool)
        .await
        .unwrap();

        assert_eq!(success, 1);
        assert_eq!(tickets, "[42]");
    }

    #[tokio::test]
    async fn state_round_trips() {
        let store = setup().await;
        store.save_state("metrics", "{\"messages_seen\":3}").await.unwrap();
        store.save_state("metrics", "{\"messages_seen\":5}").await.unwrap();

        let loaded = store.load_state("metrics").await.unwrap().unwrap();
        assert_eq!(loaded, "{\"messages_seen\":5}");
        assert!(store.load_state("missing").await.unwrap().is_none());
    }
}
