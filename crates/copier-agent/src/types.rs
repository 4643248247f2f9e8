use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use broker_trait::OrderSide;
use signal_parser::TradeAction;

/// One message delivered by the gateway stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: i64,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

/// Trust classification of a source channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    #[default]
    Standard,
    High,
}

/// One allow-listed channel from the channels file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    #[serde(default)]
    pub trust_tier: TrustTier,
    #[serde(default)]
    pub full_margin: bool,
}

/// Resolved identity of the channel a signal came from.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub channel_id: i64,
    pub name: String,
    pub trust_tier: TrustTier,
    pub full_margin: bool,
}

/// A parsed signal queued for execution, tied to its audit row.
#[derive(Debug)]
pub struct ExecutionRequest {
    pub signal: signal_parser::ParsedSignal,
    pub context: ChannelContext,
    pub audit_id: i64,
}

/// Result of one execution attempt. Reported exactly once per signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub reason: String,
    pub tickets: Vec<u64>,
    pub total_volume: f64,
}

impl ExecutionOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            tickets: Vec::new(),
            total_volume: 0.0,
        }
    }
}

/// A broker ticket under active supervision by the position tracker.
#[derive(Debug, Clone)]
pub struct TrackedPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub channel_name: String,
    pub opened_at: DateTime<Utc>,
}

pub fn action_to_side(action: TradeAction) -> OrderSide {
    match action {
        TradeAction::Buy => OrderSide::Buy,
        TradeAction::Sell => OrderSide::Sell,
    }
}
