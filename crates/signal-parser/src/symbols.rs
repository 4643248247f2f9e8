//! Table-driven instrument canonicalization.
//!
//! Lookup only — an unknown token is never guessed into an instrument.

/// Alias → canonical broker symbol. Covers the instruments the monitored
/// channels actually publish.
const ALIASES: &[(&str, &str)] = &[
    ("XAUUSD", "XAUUSD"),
    ("GOLD", "XAUUSD"),
    ("XAU", "XAUUSD"),
    ("XAGUSD", "XAGUSD"),
    ("SILVER", "XAGUSD"),
    ("XAG", "XAGUSD"),
    ("EURUSD", "EURUSD"),
    ("GBPUSD", "GBPUSD"),
    ("USDJPY", "USDJPY"),
    ("AUDUSD", "AUDUSD"),
    ("USDCAD", "USDCAD"),
    ("NZDUSD", "NZDUSD"),
    ("USDCHF", "USDCHF"),
    ("BTCUSD", "BTCUSD"),
    ("BTC", "BTCUSD"),
    ("BITCOIN", "BTCUSD"),
    ("ETHUSD", "ETHUSD"),
    ("ETH", "ETHUSD"),
    ("US30", "US30"),
    ("DOW", "US30"),
    ("DJ30", "US30"),
    ("NAS100", "NAS100"),
    ("USTEC", "NAS100"),
    ("NASDAQ", "NAS100"),
    ("USOIL", "USOIL"),
    ("WTI", "USOIL"),
];

/// Canonical symbol for a token, if the token is a known instrument or
/// alias. Idempotent: canonical names map to themselves.
pub fn canonicalize(token: &str) -> Option<&'static str> {
    let upper = token.to_ascii_uppercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map(|(_, canonical)| *canonical)
}

/// Same lookup over caller-supplied extra aliases first, falling back to
/// the built-in table.
pub fn canonicalize_with(token: &str, extra: &[(String, String)]) -> Option<String> {
    let upper = token.to_ascii_uppercase();
    if let Some((_, canonical)) = extra.iter().find(|(alias, _)| alias.eq_ignore_ascii_case(&upper)) {
        return Some(canonical.clone());
    }
    canonicalize(&upper).map(str::to_string)
}
