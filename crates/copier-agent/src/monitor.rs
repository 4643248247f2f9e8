use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, Notify};

use signal_parser::Parser;

use crate::audit::AuditStore;
use crate::config::ChannelDirectory;
use crate::metrics::AgentMetrics;
use crate::types::{ExecutionRequest, InboundMessage};

/// Consumes the inbound message stream: allow-list filter, display-name
/// resolution, parsing, audit, and hand-off to the execution queue.
///
/// Signals are enqueued in arrival order; execution happens on its own
/// task so a slow full-margin submission never blocks message intake.
pub struct ChannelMonitor {
    directory: ChannelDirectory,
    parser: Parser,
    full_margin_enabled: bool,
    audit: Arc<AuditStore>,
    metrics: Arc<Mutex<AgentMetrics>>,
    exec_tx: mpsc::Sender<ExecutionRequest>,
}

impl ChannelMonitor {
    pub fn new(
        directory: ChannelDirectory,
        parser: Parser,
        full_margin_enabled: bool,
        audit: Arc<AuditStore>,
        metrics: Arc<Mutex<AgentMetrics>>,
        exec_tx: mpsc::Sender<ExecutionRequest>,
    ) -> Self {
        Self {
            directory,
            parser,
            full_margin_enabled,
            audit,
            metrics,
            exec_tx,
        }
    }

    /// Main monitor loop. Every per-message failure is caught and logged;
    /// nothing here may kill the loop.
    pub async fn run(self, mut rx: broadcast::Receiver<InboundMessage>, shutdown: Arc<Notify>) {
        tracing::info!(
            "Monitoring {} allow-listed channels",
            self.directory.len()
        );

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!("Channel monitor stopping");
                    break;
                }
                msg = rx.recv() => match msg {
                    Ok(message) => {
                        if let Err(e) = self.handle_message(message).await {
                            tracing::error!("Error processing message: {:#}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Monitor lagged behind the stream, {} messages dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Message stream closed");
                        break;
                    }
                }
            }
        }
        // Dropping exec_tx here lets the execution task drain and stop.
    }

    async fn handle_message(&self, message: InboundMessage) -> Result<()> {
        self.metrics.lock().unwrap().messages_seen += 1;

        let Some(context) = self
            .directory
            .resolve(message.channel_id, self.full_margin_enabled)
        else {
            self.metrics.lock().unwrap().messages_ignored += 1;
            tracing::debug!("Ignoring message from unlisted channel {}", message.channel_id);
            return Ok(());
        };

        match self.parser.parse(&message.text) {
            Ok(signal) => {
                self.metrics.lock().unwrap().signals_parsed += 1;
                tracing::info!(
                    "Signal from {} ({:?} tier): {} {} sl={} tp={:?} (confidence {:.2})",
                    context.name,
                    context.trust_tier,
                    signal.action,
                    signal.symbol,
                    signal.stop_loss,
                    signal.take_profits,
                    signal.confidence,
                );

                let audit_id = match self
                    .audit
                    .record_parsed(message.received_at, &context, &message.text, &signal)
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!("Failed to audit signal: {}", e);
                        -1
                    }
                };

                if self
                    .exec_tx
                    .send(ExecutionRequest {
                        signal,
                        context,
                        audit_id,
                    })
                    .await
                    .is_err()
                {
                    tracing::error!("Execution queue is gone, dropping signal");
                }
            }
            Err(err) => {
                // Not a signal (or an inconsistent one) — dropped without
                // a trade and without an operator alert.
                self.metrics.lock().unwrap().parse_failures += 1;
                tracing::debug!("No signal in message from {}: {}", context.name, err);

                if let Err(e) = self
                    .audit
                    .record_rejected(
                        message.received_at,
                        context.channel_id,
                        &context.name,
                        &message.text,
                        &err.to_string(),
                    )
                    .await
                {
                    tracing::warn!("Failed to audit rejected message: {}", e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    use crate::types::{ChannelInfo, TrustTier};
    use signal_parser::ParserConfig;

    struct Fixture {
        monitor: ChannelMonitor,
        exec_rx: mpsc::Receiver<crate::types::ExecutionRequest>,
        metrics: Arc<Mutex<AgentMetrics>>,
    }

    async fn fixture() -> Fixture {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite");
        let audit = Arc::new(AuditStore::new(pool));
        audit.init_tables().await.unwrap();

        let mut channels = HashMap::new();
        channels.insert(
            -100,
            ChannelInfo {
                name: "Gold Channel".to_string(),
                trust_tier: TrustTier::Standard,
                full_margin: false,
            },
        );

        let metrics = Arc::new(Mutex::new(AgentMetrics::default()));
        let (exec_tx, exec_rx) = mpsc::channel(8);
        let monitor = ChannelMonitor::new(
            ChannelDirectory::from_map(channels),
            Parser::new(ParserConfig::default()),
            false,
            audit,
            Arc::clone(&metrics),
            exec_tx,
        );

        Fixture {
            monitor,
            exec_rx,
            metrics,
        }
    }

    fn message(channel_id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            channel_id,
            text: text.to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unlisted_channel_is_ignored() {
        let mut f = fixture().await;

        f.monitor
            .handle_message(message(-999, "BUY XAUUSD Entry: 3340 SL: 3335 TP: 3350"))
            .await
            .unwrap();

        assert_eq!(f.metrics.lock().unwrap().messages_ignored, 1);
        assert!(f.exec_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn parsed_signal_is_queued_with_its_audit_row() {
        let mut f = fixture().await;

        f.monitor
            .handle_message(message(-100, "BUY XAUUSD Entry: 3340 SL: 3335 TP: 3350"))
            .await
            .unwrap();

        let request = f.exec_rx.try_recv().unwrap();
        assert_eq!(request.context.name, "Gold Channel");
        assert_eq!(request.signal.symbol, "XAUUSD");
        assert!(request.audit_id >= 1);
        assert_eq!(f.metrics.lock().unwrap().signals_parsed, 1);
    }

    #[tokio::test]
    async fn non_signal_chatter_is_dropped_without_execution() {
        let mut f = fixture().await;

        f.monitor
            .handle_message(message(-100, "Good morning traders, big news day ahead!"))
            .await
            .unwrap();

        assert_eq!(f.metrics.lock().unwrap().parse_failures, 1);
        assert!(f.exec_rx.try_recv().is_err());
    }
}
