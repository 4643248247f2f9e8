use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// Wire types for the MT5 bridge terminal. Field names follow the
// terminal's own structures so the bridge can serialize them verbatim.

/// Order type codes used by the terminal.
pub const ORDER_TYPE_BUY: i32 = 0;
pub const ORDER_TYPE_SELL: i32 = 1;

/// Retcode the terminal returns for a fully accepted deal.
pub const TRADE_RETCODE_DONE: i32 = 10009;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub login: i64,
    pub password: String,
    pub server: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectReply {
    pub authorized: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickInfo {
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub point: f64,
    pub trade_contract_size: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub trade_stops_level: u32,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSendRequest {
    pub symbol: String,
    pub volume: f64,
    #[serde(rename = "type")]
    pub order_type: i32,
    pub price: f64,
    pub sl: f64,
    pub tp: f64,
    pub deviation: u32,
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeReply {
    pub retcode: i32,
    #[serde(default)]
    pub order: u64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionInfo {
    pub ticket: u64,
    pub symbol: String,
    /// 0 = buy, 1 = sell.
    #[serde(rename = "type")]
    pub position_type: i32,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    pub sl: f64,
    pub tp: f64,
    pub profit: f64,
    /// Unix seconds.
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DealInfo {
    pub ticket: u64,
    pub position_id: u64,
    pub symbol: String,
    pub profit: f64,
    /// Unix seconds.
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
    pub margin_free: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarginReply {
    pub margin: f64,
}

// ---------------------------------------------------------------------------
// Conversion helpers: bridge wire types -> unified broker types
// ---------------------------------------------------------------------------

pub(crate) fn unix_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

impl From<TickInfo> for broker_trait::Quote {
    fn from(t: TickInfo) -> Self {
        broker_trait::Quote {
            bid: t.bid,
            ask: t.ask,
        }
    }
}

impl From<SymbolInfo> for broker_trait::SymbolSpec {
    fn from(s: SymbolInfo) -> Self {
        broker_trait::SymbolSpec {
            point: s.point,
            contract_size: s.trade_contract_size,
            volume_min: s.volume_min,
            volume_max: s.volume_max,
            volume_step: s.volume_step,
            min_stop_distance_points: s.trade_stops_level,
        }
    }
}

impl From<PositionInfo> for broker_trait::BrokerPosition {
    fn from(p: PositionInfo) -> Self {
        broker_trait::BrokerPosition {
            ticket: p.ticket,
            symbol: p.symbol,
            side: if p.position_type == ORDER_TYPE_SELL {
                broker_trait::OrderSide::Sell
            } else {
                broker_trait::OrderSide::Buy
            },
            volume: p.volume,
            price_open: p.price_open,
            price_current: p.price_current,
            stop_loss: p.sl,
            take_profit: p.tp,
            profit: p.profit,
            opened_at: unix_to_utc(p.time),
        }
    }
}

impl From<DealInfo> for broker_trait::Deal {
    fn from(d: DealInfo) -> Self {
        broker_trait::Deal {
            ticket: d.ticket,
            position_id: d.position_id,
            symbol: d.symbol,
            profit: d.profit,
            executed_at: unix_to_utc(d.time),
        }
    }
}

impl From<AccountInfo> for broker_trait::AccountSummary {
    fn from(a: AccountInfo) -> Self {
        broker_trait::AccountSummary {
            balance: a.balance,
            equity: a.equity,
            margin_free: a.margin_free,
        }
    }
}
