mod client;
mod models;

pub use client::Mt5BridgeClient;
pub use models::{AccountInfo, DealInfo, PositionInfo, SymbolInfo, TickInfo, TradeReply};
