use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use notification_service::{Alert, AlertType, NotificationService};

use crate::types::InboundMessage;

/// Bounded exponential backoff for gateway reconnects.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based): doubles each
    /// attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor as u32)
            .min(self.max_delay)
    }
}

enum StreamEnd {
    Shutdown,
    Disconnected,
}

/// WebSocket consumer of the message-source bridge. The bridge owns the
/// actual messaging-client session; this end only observes connection
/// state and fans messages out on a broadcast channel.
pub struct GatewayClient {
    url: String,
    tx: broadcast::Sender<InboundMessage>,
    shutdown: Arc<Notify>,
    policy: ReconnectPolicy,
}

impl GatewayClient {
    pub fn new(
        url: String,
        policy: ReconnectPolicy,
    ) -> (Self, broadcast::Receiver<InboundMessage>) {
        let (tx, rx) = broadcast::channel(256);
        let client = Self {
            url,
            tx,
            shutdown: Arc::new(Notify::new()),
            policy,
        };
        (client, rx)
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Connect-and-stream loop. Reconnects with bounded exponential
    /// backoff; after `max_attempts` consecutive failures the gateway is
    /// declared dead and the operator is alerted — it never retries
    /// forever silently.
    pub async fn run(self: Arc<Self>, notifications: Arc<NotificationService>) {
        let mut attempts: u32 = 0;

        loop {
            match self.connect_and_stream(&mut attempts).await {
                Ok(StreamEnd::Shutdown) => {
                    tracing::info!("Gateway shutdown requested");
                    return;
                }
                Ok(StreamEnd::Disconnected) => {
                    tracing::warn!("Gateway connection lost");
                }
                Err(e) => {
                    tracing::warn!("Gateway error: {}", e);
                }
            }

            attempts += 1;
            if attempts > self.policy.max_attempts {
                tracing::error!(
                    "Gateway unreachable after {} attempts, giving up",
                    self.policy.max_attempts
                );
                notifications
                    .send_alert_async(&Alert::new(
                        AlertType::ConnectivityLost {
                            component: "message gateway".to_string(),
                        },
                        "Message Gateway Down",
                        format!(
                            "Could not reach the message gateway after {} attempts. \
                             Signal intake has stopped — operator action required.",
                            self.policy.max_attempts
                        ),
                    ))
                    .await;
                return;
            }

            let delay = self.policy.delay_for(attempts);
            tracing::info!(
                "Reconnecting to gateway in {:.0}s (attempt {}/{})",
                delay.as_secs_f64(),
                attempts,
                self.policy.max_attempts
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => {
                    tracing::info!("Gateway shutdown requested during backoff");
                    return;
                }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        attempts: &mut u32,
    ) -> Result<StreamEnd, Box<dyn std::error::Error + Send + Sync>> {
        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("Connected to message gateway at {}", self.url);
        *attempts = 0;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("Gateway closed the connection");
                            return Ok(StreamEnd::Disconnected);
                        }
                        Some(Err(e)) => {
                            return Err(Box::new(e));
                        }
                        _ => {}
                    }
                }
                _ = self.shutdown.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(StreamEnd::Shutdown);
                }
            }
        }
    }

    fn handle_message(&self, text: &str) {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => {
                tracing::debug!(
                    "Message from channel {} ({} chars)",
                    message.channel_id,
                    message.text.len()
                );
                let _ = self.tx.send(message);
            }
            Err(e) => {
                tracing::debug!("Ignoring non-message gateway frame: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_the_maximum() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 20,
        };

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(20), Duration::from_secs(30));
    }
}
