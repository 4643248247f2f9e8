mod pushover;
mod smtp;
mod telegram;

pub use pushover::PushoverNotifier;
pub use smtp::SmtpNotifier;
pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Alert types that trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlertType {
    TradeExecuted {
        symbol: String,
        action: String,
        orders: usize,
        total_volume: f64,
    },
    TradeFailed {
        symbol: String,
        reason: String,
    },
    TakeProfitHit {
        symbol: String,
        profit: f64,
    },
    StopLossHit {
        symbol: String,
        loss: f64,
    },
    TradeClosedManually {
        symbol: String,
        profit: f64,
    },
    ConnectivityLost {
        component: String,
    },
    AgentStatus,
}

/// A notification alert to be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            timestamp: chrono::Utc::now(),
            title: title.into(),
            message: message.into(),
        }
    }

    /// Urgent alerts get pushed louder (Pushover high priority).
    pub fn is_urgent(&self) -> bool {
        matches!(
            self.alert_type,
            AlertType::StopLossHit { .. } | AlertType::ConnectivityLost { .. }
        )
    }
}

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

/// Errors from the notification system.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Telegram error: {0}")]
    Telegram(String),
    #[error("Pushover error: {0}")]
    Pushover(String),
    #[error("SMTP error: {0}")]
    Smtp(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for the notification service.
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub pushover_app_token: Option<String>,
    pub pushover_user_key: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_to: Vec<String>,
}

impl NotificationConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let smtp_to = std::env::var("NOTIFICATION_EMAIL_TO")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            telegram_bot_token: std::env::var("NOTIFICATION_TELEGRAM_BOT_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
            telegram_chat_id: std::env::var("NOTIFICATION_CHAT_ID")
                .ok()
                .filter(|s| !s.is_empty()),
            pushover_app_token: std::env::var("PUSHOVER_APP_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
            pushover_user_key: std::env::var("PUSHOVER_USER_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            smtp_host: std::env::var("SMTP_HOST").ok().filter(|s| !s.is_empty()),
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(465),
            smtp_username: std::env::var("SMTP_USERNAME")
                .ok()
                .filter(|s| !s.is_empty()),
            smtp_password: std::env::var("SMTP_PASSWORD")
                .ok()
                .filter(|s| !s.is_empty()),
            smtp_from: std::env::var("SMTP_FROM_ADDRESS")
                .ok()
                .filter(|s| !s.is_empty()),
            smtp_to,
        }
    }
}

/// The main notification service — dispatches alerts to all configured
/// channels. Delivery is best-effort: failures are logged, never
/// propagated to the caller.
pub struct NotificationService {
    channels: std::sync::Arc<Vec<Box<dyn NotificationChannel>>>,
}

impl NotificationService {
    pub fn new(config: &NotificationConfig) -> Self {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

        if let (Some(token), Some(chat_id)) =
            (&config.telegram_bot_token, &config.telegram_chat_id)
        {
            channels.push(Box::new(TelegramNotifier::new(
                token.clone(),
                chat_id.clone(),
            )));
            tracing::info!("Telegram notifications enabled");
        }

        if let (Some(app_token), Some(user_key)) =
            (&config.pushover_app_token, &config.pushover_user_key)
        {
            channels.push(Box::new(PushoverNotifier::new(
                app_token.clone(),
                user_key.clone(),
            )));
            tracing::info!("Pushover notifications enabled");
        }

        if config.smtp_host.is_some() && config.smtp_from.is_some() && !config.smtp_to.is_empty() {
            match SmtpNotifier::new(config) {
                Ok(notifier) => {
                    tracing::info!(
                        "Email notifications enabled (SMTP -> {} recipients)",
                        config.smtp_to.len()
                    );
                    channels.push(Box::new(notifier));
                }
                Err(e) => {
                    tracing::warn!("Failed to initialize SMTP notifier: {}", e);
                }
            }
        }

        if channels.is_empty() {
            tracing::info!(
                "No notification channels configured (set NOTIFICATION_TELEGRAM_BOT_TOKEN, PUSHOVER_APP_TOKEN or SMTP_HOST)"
            );
        }

        Self {
            channels: std::sync::Arc::new(channels),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send an alert to all configured channels (fire-and-forget).
    pub fn send_alert(&self, alert: Alert) {
        let channels = self.channels.clone();
        tokio::spawn(async move {
            for channel in channels.iter() {
                match channel.send(&alert).await {
                    Ok(()) => tracing::debug!("Sent notification via {}", channel.name()),
                    Err(e) => {
                        tracing::warn!("Failed to send notification via {}: {}", channel.name(), e)
                    }
                }
            }
        });
    }

    /// Send alert to all channels, awaiting completion. Used at startup
    /// and shutdown where the process may exit right after.
    pub async fn send_alert_async(&self, alert: &Alert) {
        for channel in self.channels.iter() {
            match channel.send(alert).await {
                Ok(()) => tracing::debug!("Sent notification via {}", channel.name()),
                Err(e) => {
                    tracing::warn!("Failed to send notification via {}: {}", channel.name(), e)
                }
            }
        }
    }
}
