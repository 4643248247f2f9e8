use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use risk_manager::{SizingConfig, VolumePolicy};
use signal_parser::{MissingStopPolicy, ParserConfig};

use crate::types::{ChannelContext, ChannelInfo};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Message source
    pub gateway_url: String,         // ws://127.0.0.1:8085/stream
    pub channels_file: String,       // channels.json

    // Sizing
    pub lot_size: f64,               // 0.01
    pub use_risk_sizing: bool,       // risk-fraction volume instead of fixed lots
    pub risk_fraction: f64,          // 0.02 (2% of equity)
    pub base_deviation_pips: u32,    // 10
    pub points_per_pip: u32,         // 10
    pub volatility_multiplier: f64,  // 2.0
    pub high_volatility_symbols: Vec<String>,

    // Parsing
    pub fallback_symbol: Option<String>,
    pub fallback_hints: Vec<String>,
    pub estimate_missing_stop: bool, // false: reject signals without a stop
    pub missing_stop_offset: f64,    // price units, only used when estimating

    // Execution
    pub full_margin_enabled: bool,
    /// Hard cap on orders per signal in full-margin mode.
    pub full_margin_max_orders: u32,
    pub verify_delay_ms: u64,

    // Position tracking
    pub tracker_interval_seconds: u64,
    pub deals_lookback_days: i64,
    pub metrics_log_interval_ticks: u64,

    // Reconnection
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_seconds: u64,
    pub reconnect_max_attempts: u32,

    // Database
    pub database_url: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            gateway_url: env::var("GATEWAY_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8085/stream".to_string()),
            channels_file: env::var("CHANNELS_FILE")
                .unwrap_or_else(|_| "channels.json".to_string()),

            lot_size: env::var("LOT_SIZE")
                .unwrap_or_else(|_| "0.01".to_string())
                .parse()?,
            use_risk_sizing: env::var("USE_RISK_SIZING")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            risk_fraction: env::var("RISK_FRACTION")
                .unwrap_or_else(|_| "0.02".to_string())
                .parse()?,
            base_deviation_pips: env::var("MAX_SLIPPAGE_PIPS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            points_per_pip: env::var("POINTS_PER_PIP")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            volatility_multiplier: env::var("VOLATILITY_MULTIPLIER")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,
            high_volatility_symbols: env::var("HIGH_VOLATILITY_SYMBOLS")
                .unwrap_or_else(|_| "XAUUSD,BTCUSD".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            fallback_symbol: env::var("FALLBACK_SYMBOL").ok().filter(|s| !s.is_empty()),
            fallback_hints: env::var("FALLBACK_HINTS")
                .unwrap_or_else(|_| "GOLD,XAU".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            estimate_missing_stop: env::var("ESTIMATE_MISSING_STOP")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            missing_stop_offset: env::var("MISSING_STOP_OFFSET")
                .unwrap_or_else(|_| "5.0".to_string())
                .parse()?,

            full_margin_enabled: env::var("FULL_MARGIN_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            full_margin_max_orders: env::var("FULL_MARGIN_MAX_ORDERS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            verify_delay_ms: env::var("VERIFY_DELAY_MS")
                .unwrap_or_else(|_| "1500".to_string())
                .parse()?,

            tracker_interval_seconds: env::var("TRACKER_INTERVAL")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            deals_lookback_days: env::var("DEALS_LOOKBACK_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()?,
            metrics_log_interval_ticks: env::var("METRICS_LOG_INTERVAL")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            reconnect_base_delay_ms: env::var("RECONNECT_BASE_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            reconnect_max_delay_seconds: env::var("RECONNECT_MAX_DELAY")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            reconnect_max_attempts: env::var("RECONNECT_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:signals.db".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.lot_size > 0.0, "LOT_SIZE must be positive");
        anyhow::ensure!(
            self.risk_fraction > 0.0 && self.risk_fraction <= 0.5,
            "RISK_FRACTION must be in (0, 0.5]"
        );
        anyhow::ensure!(
            self.full_margin_max_orders >= 1,
            "FULL_MARGIN_MAX_ORDERS must be at least 1"
        );
        anyhow::ensure!(
            self.reconnect_max_attempts >= 1,
            "RECONNECT_MAX_ATTEMPTS must be at least 1"
        );
        anyhow::ensure!(
            self.tracker_interval_seconds >= 1,
            "TRACKER_INTERVAL must be at least 1 second"
        );
        Ok(())
    }

    pub fn sizing_config(&self) -> SizingConfig {
        SizingConfig {
            base_deviation_pips: self.base_deviation_pips,
            points_per_pip: self.points_per_pip,
            volatility_multiplier: self.volatility_multiplier,
            high_volatility_symbols: self.high_volatility_symbols.clone(),
            volume: if self.use_risk_sizing {
                VolumePolicy::RiskFraction(self.risk_fraction)
            } else {
                VolumePolicy::FixedLots(self.lot_size)
            },
        }
    }

    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            fallback_symbol: self.fallback_symbol.clone(),
            fallback_hints: self.fallback_hints.clone(),
            missing_stop: if self.estimate_missing_stop {
                MissingStopPolicy::Estimate(self.missing_stop_offset)
            } else {
                MissingStopPolicy::Reject
            },
            extra_aliases: Vec::new(),
        }
    }
}

/// Immutable channel-id → channel-info mapping, loaded once at startup.
/// Source identity tables are configuration data, not code.
#[derive(Debug, Clone)]
pub struct ChannelDirectory {
    channels: HashMap<i64, ChannelInfo>,
}

impl ChannelDirectory {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read channels file {path}"))?;

        // JSON object keys are strings; channel ids are numeric.
        let by_name: HashMap<String, ChannelInfo> =
            serde_json::from_str(&raw).context("invalid channels file")?;

        let mut channels = HashMap::with_capacity(by_name.len());
        for (key, info) in by_name {
            let id = key
                .parse::<i64>()
                .with_context(|| format!("channel key {key} is not a numeric id"))?;
            channels.insert(id, info);
        }

        Ok(Self { channels })
    }

    #[cfg(test)]
    pub fn from_map(channels: HashMap<i64, ChannelInfo>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Resolve an inbound channel id; None means the source is not
    /// allow-listed and its messages are dropped.
    pub fn resolve(&self, channel_id: i64, full_margin_enabled: bool) -> Option<ChannelContext> {
        self.channels.get(&channel_id).map(|info| ChannelContext {
            channel_id,
            name: info.name.clone(),
            trust_tier: info.trust_tier,
            full_margin: full_margin_enabled && info.full_margin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_resolves_only_allow_listed_channels() {
        let mut map = HashMap::new();
        map.insert(
            -1001979633557,
            ChannelInfo {
                name: "Adam Trader".to_string(),
                trust_tier: crate::types::TrustTier::High,
                full_margin: true,
            },
        );
        let directory = ChannelDirectory::from_map(map);

        let ctx = directory.resolve(-1001979633557, true).unwrap();
        assert_eq!(ctx.name, "Adam Trader");
        assert!(ctx.full_margin);

        assert!(directory.resolve(-12345, true).is_none());
    }

    #[test]
    fn full_margin_needs_the_master_switch() {
        let mut map = HashMap::new();
        map.insert(
            -1,
            ChannelInfo {
                name: "Heavy".to_string(),
                trust_tier: crate::types::TrustTier::Standard,
                full_margin: true,
            },
        );
        let directory = ChannelDirectory::from_map(map);

        assert!(!directory.resolve(-1, false).unwrap().full_margin);
        assert!(directory.resolve(-1, true).unwrap().full_margin);
    }
}
