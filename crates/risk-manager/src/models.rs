use serde::{Deserialize, Serialize};

/// How the lot size for one order is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumePolicy {
    /// Always the configured lot size.
    FixedLots(f64),
    /// Risk this fraction of account equity against the stop distance.
    RiskFraction(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Base slippage tolerance, in pips.
    pub base_deviation_pips: u32,
    /// Broker points per pip for the traded instruments.
    pub points_per_pip: u32,
    /// Deviation multiplier applied to flagged instruments.
    pub volatility_multiplier: f64,
    /// Instruments that get the widened deviation.
    pub high_volatility_symbols: Vec<String>,
    pub volume: VolumePolicy,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_deviation_pips: 10,
            points_per_pip: 10,
            volatility_multiplier: 2.0,
            high_volatility_symbols: vec!["XAUUSD".to_string(), "BTCUSD".to_string()],
            volume: VolumePolicy::FixedLots(0.01),
        }
    }
}

/// A fully-resolved order sizing: everything the execution engine needs
/// to build one broker submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizedOrder {
    pub entry_price: f64,
    pub volume: f64,
    pub deviation_points: u32,
    /// Distance between entry and stop, in price units.
    pub stop_distance: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SizingError {
    /// The trader-specified stop violates the broker minimum. Moving it
    /// silently would change the trade's risk without consent, so this
    /// is surfaced instead of clamped.
    #[error("stop distance {distance:.5} below broker minimum {min_distance:.5}")]
    StopTooClose { distance: f64, min_distance: f64 },
    #[error("stop level equals entry price")]
    ZeroStopDistance,
    #[error("account equity {0:.2} is not positive")]
    NonPositiveEquity(f64),
}
