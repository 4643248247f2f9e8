use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use broker_trait::{AccountSummary, Quote, SymbolSpec};
use signal_parser::{ParsedSignal, Provenance, TradeAction};

use crate::models::{SizedOrder, SizingConfig, SizingError, VolumePolicy};

pub struct OrderSizer {
    config: SizingConfig,
}

impl OrderSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Resolve entry price, validate the stop distance against the broker
    /// minimum and compute the order volume.
    pub fn size(
        &self,
        signal: &ParsedSignal,
        quote: &Quote,
        symbol_spec: &SymbolSpec,
        account: &AccountSummary,
    ) -> Result<SizedOrder, SizingError> {
        // 1. Entry: midpoint of the published bounds; market side of the
        //    quote when the message carried no usable entry.
        let entry_price = if signal.entry_source == Provenance::Explicit {
            signal.entry_mid()
        } else {
            match signal.action {
                TradeAction::Buy => quote.ask,
                TradeAction::Sell => quote.bid,
            }
        };

        // 2. Stop distance validation.
        let stop_distance = (entry_price - signal.stop_loss).abs();
        if stop_distance <= 0.0 {
            return Err(SizingError::ZeroStopDistance);
        }
        let min_distance = symbol_spec.min_stop_distance();
        if stop_distance < min_distance {
            return Err(SizingError::StopTooClose {
                distance: stop_distance,
                min_distance,
            });
        }

        // 3. Slippage tolerance, widened for volatile instruments.
        let mut deviation_points = self.config.base_deviation_pips * self.config.points_per_pip;
        if self
            .config
            .high_volatility_symbols
            .iter()
            .any(|s| s == &signal.symbol)
        {
            deviation_points =
                (deviation_points as f64 * self.config.volatility_multiplier).round() as u32;
        }

        // 4. Volume.
        let volume = match self.config.volume {
            VolumePolicy::FixedLots(lots) => clamp_to_step(lots, symbol_spec),
            VolumePolicy::RiskFraction(fraction) => {
                if account.equity <= 0.0 {
                    return Err(SizingError::NonPositiveEquity(account.equity));
                }
                let risk_amount = account.equity * fraction;
                let risk_per_lot = stop_distance * symbol_spec.contract_size;
                clamp_to_step(risk_amount / risk_per_lot, symbol_spec)
            }
        };

        tracing::debug!(
            symbol = %signal.symbol,
            entry_price,
            volume,
            deviation_points,
            "order sized"
        );

        Ok(SizedOrder {
            entry_price,
            volume,
            deviation_points,
            stop_distance,
        })
    }
}

/// Round down to the broker's lot step, then clamp into the allowed
/// volume band. Decimal math so 0.07 / 0.01 does not land on 6 steps.
fn clamp_to_step(volume: f64, spec: &SymbolSpec) -> f64 {
    let volume = Decimal::from_f64(volume).unwrap_or_default();
    let step = Decimal::from_f64(spec.volume_step).unwrap_or(Decimal::ONE);
    let min = Decimal::from_f64(spec.volume_min).unwrap_or_default();
    let max = Decimal::from_f64(spec.volume_max).unwrap_or(Decimal::MAX);

    let stepped = if step > Decimal::ZERO {
        (volume / step).floor() * step
    } else {
        volume
    };

    stepped.clamp(min, max).to_f64().unwrap_or(spec.volume_min)
}
