use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Unified broker types (broker-agnostic)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current top-of-book prices for one symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    /// Price at which a new order in the given direction would fill.
    pub fn entry_side(&self, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => self.ask,
            OrderSide::Sell => self.bid,
        }
    }
}

/// One concrete order submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: Option<f64>,
    /// Maximum tolerated slippage, in broker points.
    pub deviation_points: u32,
    /// Free-form tag recorded with the order (source channel).
    pub comment: String,
}

/// Broker response to an order submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub accepted: bool,
    pub ticket: Option<u64>,
    pub reason: String,
}

/// An open position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub profit: f64,
    pub opened_at: DateTime<Utc>,
}

/// A closed deal from the broker's trade history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    /// Position this deal belongs to (entry and exit deals share it).
    pub position_id: u64,
    pub symbol: String,
    pub profit: f64,
    pub executed_at: DateTime<Utc>,
}

/// Account-level balances used for margin checks and risk sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSummary {
    pub balance: f64,
    pub equity: f64,
    pub margin_free: f64,
}

/// Per-symbol trading constraints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolSpec {
    /// Smallest price increment.
    pub point: f64,
    /// Units of the underlying per 1.0 lot.
    pub contract_size: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    /// Broker-mandated minimum distance between price and SL/TP, in points.
    pub min_stop_distance_points: u32,
}

impl SymbolSpec {
    /// Minimum stop distance expressed in price units.
    pub fn min_stop_distance(&self) -> f64 {
        self.min_stop_distance_points as f64 * self.point
    }
}

// ---------------------------------------------------------------------------
// Broker trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establish (or re-establish) the terminal session.
    async fn connect(&self) -> Result<bool>;

    /// Whether the terminal session is currently usable.
    async fn is_connected(&self) -> bool;

    /// Current bid/ask for a symbol.
    async fn get_quote(&self, symbol: &str) -> Result<Quote>;

    /// Look the symbol up and make it tradable (select it in the terminal
    /// if it is not already visible). Returns its trading constraints.
    async fn ensure_symbol(&self, symbol: &str) -> Result<SymbolSpec>;

    /// Submit a market order. A rejection is an Ok(OrderResult) with
    /// accepted=false; Err means the call itself failed.
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult>;

    /// All currently open positions.
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>>;

    /// Closed deals between the two instants.
    async fn get_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>>;

    /// Balance, equity and free margin.
    async fn get_account(&self) -> Result<AccountSummary>;

    /// Margin required to open `volume` lots of `symbol`.
    async fn margin_required(&self, symbol: &str, volume: f64) -> Result<f64>;

    /// Whether this is a demo/practice account.
    fn is_demo(&self) -> bool;

    /// Broker name for logging.
    fn broker_name(&self) -> &str;
}
