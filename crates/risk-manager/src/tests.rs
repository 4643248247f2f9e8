use broker_trait::{AccountSummary, Quote, SymbolSpec};
use signal_parser::{ParsedSignal, Provenance, TradeAction};

use crate::{OrderSizer, SizingConfig, SizingError, VolumePolicy};

fn gold_spec() -> SymbolSpec {
    SymbolSpec {
        point: 0.01,
        contract_size: 100.0,
        volume_min: 0.01,
        volume_max: 50.0,
        volume_step: 0.01,
        min_stop_distance_points: 30,
    }
}

fn account() -> AccountSummary {
    AccountSummary {
        balance: 10_000.0,
        equity: 10_000.0,
        margin_free: 10_000.0,
    }
}

fn quote() -> Quote {
    Quote {
        bid: 3344.80,
        ask: 3345.10,
    }
}

fn buy_signal() -> ParsedSignal {
    ParsedSignal {
        symbol: "XAUUSD".to_string(),
        action: TradeAction::Buy,
        entry_min: 3344.0,
        entry_max: 3346.0,
        stop_loss: 3340.0,
        take_profits: vec![3352.0, 3358.0],
        entry_source: Provenance::Explicit,
        stop_source: Provenance::Explicit,
        confidence: 0.7,
    }
}

#[test]
fn explicit_entry_uses_range_midpoint() {
    let sizer = OrderSizer::new(SizingConfig::default());
    let sized = sizer
        .size(&buy_signal(), &quote(), &gold_spec(), &account())
        .unwrap();
    assert_eq!(sized.entry_price, 3345.0);
}

#[test]
fn estimated_entry_uses_market_side_of_quote() {
    let sizer = OrderSizer::new(SizingConfig::default());

    let mut signal = buy_signal();
    signal.entry_source = Provenance::Estimated;
    let sized = sizer.size(&signal, &quote(), &gold_spec(), &account()).unwrap();
    assert_eq!(sized.entry_price, quote().ask);

    let mut sell = buy_signal();
    sell.action = TradeAction::Sell;
    sell.entry_source = Provenance::Estimated;
    sell.stop_loss = 3350.0;
    sell.take_profits = vec![3338.0];
    let sized = sizer.size(&sell, &quote(), &gold_spec(), &account()).unwrap();
    assert_eq!(sized.entry_price, quote().bid);
}

#[test]
fn stop_inside_broker_minimum_is_an_error_not_a_clamp() {
    let sizer = OrderSizer::new(SizingConfig::default());
    let mut signal = buy_signal();
    signal.stop_loss = 3344.9; // 0.10 away, minimum is 30 points = 0.30

    let err = sizer
        .size(&signal, &quote(), &gold_spec(), &account())
        .unwrap_err();
    assert!(matches!(err, SizingError::StopTooClose { .. }));
}

#[test]
fn volatile_symbol_widens_deviation() {
    let config = SizingConfig {
        base_deviation_pips: 10,
        points_per_pip: 10,
        volatility_multiplier: 2.0,
        high_volatility_symbols: vec!["XAUUSD".to_string()],
        volume: VolumePolicy::FixedLots(0.01),
    };
    let sizer = OrderSizer::new(config);

    let sized = sizer
        .size(&buy_signal(), &quote(), &gold_spec(), &account())
        .unwrap();
    assert_eq!(sized.deviation_points, 200);

    let mut calm = buy_signal();
    calm.symbol = "EURUSD".to_string();
    let mut spec = gold_spec();
    spec.point = 0.00001;
    let sized = sizer.size(&calm, &quote(), &spec, &account()).unwrap();
    assert_eq!(sized.deviation_points, 100);
}

#[test]
fn risk_fraction_sizing_divides_by_stop_risk() {
    let config = SizingConfig {
        volume: VolumePolicy::RiskFraction(0.02),
        high_volatility_symbols: vec![],
        ..SizingConfig::default()
    };
    let sizer = OrderSizer::new(config);

    // equity 10_000 * 2% = 200 risked; stop distance 5.0 * contract 100
    // = 500 per lot -> 0.4 lots.
    let sized = sizer
        .size(&buy_signal(), &quote(), &gold_spec(), &account())
        .unwrap();
    assert!((sized.volume - 0.4).abs() < 1e-9);
}

#[test]
fn volume_is_rounded_down_to_the_lot_step() {
    let config = SizingConfig {
        volume: VolumePolicy::FixedLots(0.057),
        ..SizingConfig::default()
    };
    let sizer = OrderSizer::new(config);
    let sized = sizer
        .size(&buy_signal(), &quote(), &gold_spec(), &account())
        .unwrap();
    assert!((sized.volume - 0.05).abs() < 1e-9);
}

#[test]
fn volume_is_clamped_to_broker_band() {
    let tiny = OrderSizer::new(SizingConfig {
        volume: VolumePolicy::FixedLots(0.001),
        ..SizingConfig::default()
    });
    let sized = tiny
        .size(&buy_signal(), &quote(), &gold_spec(), &account())
        .unwrap();
    assert_eq!(sized.volume, 0.01);

    let huge = OrderSizer::new(SizingConfig {
        volume: VolumePolicy::RiskFraction(0.9),
        ..SizingConfig::default()
    });
    let mut spec = gold_spec();
    spec.volume_max = 1.0;
    let sized = huge.size(&buy_signal(), &quote(), &spec, &account()).unwrap();
    assert_eq!(sized.volume, 1.0);
}
