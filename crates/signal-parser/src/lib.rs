mod extract;
mod normalize;
mod symbols;


pub use symbols::canonicalize;

use serde::{Deserialize, Serialize};

use crate::extract::Extracted;
use crate::normalize::{normalize, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::Buy => f.write_str("BUY"),
            TradeAction::Sell => f.write_str("SELL"),
        }
    }
}

/// Which extraction path produced a value. Audit only — execution logic
/// never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Read directly from the message text.
    Explicit,
    /// Derived from the other levels because the message omitted it.
    Estimated,
}

/// Immutable result of parsing one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSignal {
    pub symbol: String,
    pub action: TradeAction,
    pub entry_min: f64,
    pub entry_max: f64,
    pub stop_loss: f64,
    /// 1–2 levels, nearest target first.
    pub take_profits: Vec<f64>,
    pub entry_source: Provenance,
    pub stop_source: Provenance,
    pub confidence: f64,
}

impl ParsedSignal {
    pub fn entry_mid(&self) -> f64 {
        (self.entry_min + self.entry_max) / 2.0
    }

    pub fn first_take_profit(&self) -> f64 {
        self.take_profits[0]
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("no trade direction (BUY/SELL) found")]
    MissingAction,
    #[error("no recognizable instrument found")]
    UnknownSymbol,
    #[error("no stop-loss level found")]
    MissingStopLoss,
    #[error("no take-profit level found")]
    MissingTakeProfit,
    #[error("inconsistent {action} levels: entry {entry_min}-{entry_max}, sl {stop_loss}, tp {take_profit}")]
    InvalidLevels {
        action: TradeAction,
        entry_min: f64,
        entry_max: f64,
        stop_loss: f64,
        take_profit: f64,
    },
}

/// What to do when a message carries no stop-loss.
///
/// This is an explicit policy choice, defaulting to rejection. `Estimate`
/// places the stop at a fixed price offset on the adverse side of entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "offset")]
pub enum MissingStopPolicy {
    Reject,
    Estimate(f64),
}

impl Default for MissingStopPolicy {
    fn default() -> Self {
        MissingStopPolicy::Reject
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParserConfig {
    /// Instrument assumed when no symbol is named but the message context
    /// hints at its family (e.g. gold channels writing "GOLDEN ENTRY").
    pub fallback_symbol: Option<String>,
    /// Substrings of the normalized text that justify the fallback.
    pub fallback_hints: Vec<String>,
    pub missing_stop: MissingStopPolicy,
    /// Additional alias → canonical pairs merged over the built-in table.
    pub extra_aliases: Vec<(String, String)>,
}

/// Entry estimation offset: 10% of the SL→TP1 distance, placed on the
/// profitable side of the stop. Keeps otherwise-valid signals that only
/// publish stop and target.
const ENTRY_ESTIMATE_FRACTION: f64 = 0.10;

pub struct Parser {
    config: ParserConfig,
}

impl Parser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parse one raw message into a validated signal.
    ///
    /// Pipeline: normalize → symbol → action → entry → stop-loss →
    /// take-profits → estimate missing entry → validate ordering.
    pub fn parse(&self, raw: &str) -> Result<ParsedSignal, ParseError> {
        let text = normalize(raw);
        let tokens = tokenize(&text);

        let symbol = self.resolve_symbol(&tokens, &text)?;
        let action = extract::action(&tokens).ok_or(ParseError::MissingAction)?;
        let fields = extract::levels(&tokens);

        let (stop_loss, stop_source) = self.resolve_stop(action, &fields)?;

        let mut take_profits = fields.take_profits.clone();
        if take_profits.is_empty() {
            return Err(ParseError::MissingTakeProfit);
        }
        take_profits.truncate(2);
        // Nearest target first: ascending for BUY, descending for SELL.
        take_profits.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if action == TradeAction::Sell {
            take_profits.reverse();
        }

        let (entry_min, entry_max, entry_source) = match fields.entry {
            Some((min, max)) => (min, max, Provenance::Explicit),
            None => {
                let entry = stop_loss + ENTRY_ESTIMATE_FRACTION * (take_profits[0] - stop_loss);
                (entry, entry, Provenance::Estimated)
            }
        };

        let signal = ParsedSignal {
            symbol,
            action,
            entry_min,
            entry_max,
            stop_loss,
            take_profits,
            entry_source,
            stop_source,
            confidence: extract::confidence(&tokens, &text),
        };

        validate(&signal)?;
        Ok(signal)
    }

    fn resolve_symbol(
        &self,
        tokens: &[normalize::Token],
        text: &str,
    ) -> Result<String, ParseError> {
        if let Some(symbol) = extract::symbol(tokens, &self.config.extra_aliases) {
            return Ok(symbol);
        }
        if let Some(fallback) = &self.config.fallback_symbol {
            if self
                .config
                .fallback_hints
                .iter()
                .any(|hint| !hint.is_empty() && text.contains(hint.to_uppercase().as_str()))
            {
                tracing::debug!("no explicit instrument, falling back to {}", fallback);
                return Ok(fallback.clone());
            }
        }
        Err(ParseError::UnknownSymbol)
    }

    fn resolve_stop(
        &self,
        action: TradeAction,
        fields: &Extracted,
    ) -> Result<(f64, Provenance), ParseError> {
        if let Some(sl) = fields.stop_loss {
            return Ok((sl, Provenance::Explicit));
        }
        match self.config.missing_stop {
            MissingStopPolicy::Reject => Err(ParseError::MissingStopLoss),
            MissingStopPolicy::Estimate(offset) => {
                // An estimate needs an anchor; without an explicit entry
                // there is nothing to offset from.
                let (min, max) = fields.entry.ok_or(ParseError::MissingStopLoss)?;
                let entry = (min + max) / 2.0;
                let sl = match action {
                    TradeAction::Buy => entry - offset,
                    TradeAction::Sell => entry + offset,
                };
                Ok((sl, Provenance::Estimated))
            }
        }
    }
}

/// Direction-aware ordering invariant. A signal violating it never
/// reaches the execution engine.
fn validate(signal: &ParsedSignal) -> Result<(), ParseError> {
    let tp1 = signal.take_profits[0];
    let invalid = ParseError::InvalidLevels {
        action: signal.action,
        entry_min: signal.entry_min,
        entry_max: signal.entry_max,
        stop_loss: signal.stop_loss,
        take_profit: tp1,
    };

    if signal.entry_min > signal.entry_max {
        return Err(invalid);
    }

    match signal.action {
        TradeAction::Buy => {
            if !(signal.stop_loss < signal.entry_min && signal.entry_max <= tp1) {
                return Err(invalid);
            }
            if signal.take_profits.windows(2).any(|w| w[0] > w[1]) {
                return Err(invalid);
            }
        }
        TradeAction::Sell => {
            if !(tp1 <= signal.entry_min && signal.entry_max < signal.stop_loss) {
                return Err(invalid);
            }
            if signal.take_profits.windows(2).any(|w| w[0] < w[1]) {
                return Err(invalid);
            }
        }
    }
    Ok(())
}
