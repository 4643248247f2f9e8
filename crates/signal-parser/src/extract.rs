//! Keyword-driven field extraction over the token stream.
//!
//! Each field has an ordered set of recognized marker words; the scanner
//! walks the tokens once, attaching numbers to the most recent marker.

use crate::normalize::Token;
use crate::symbols::canonicalize_with;
use crate::TradeAction;

const ENTRY_KEYWORDS: &[&str] = &["ENTRY", "ENTER", "EP", "NOW", "AT", "PRICE", "CMP", "ZONE"];
const STOP_KEYWORDS: &[&str] = &["SL", "STOPLOSS", "STOP"];
const CONFIDENCE_KEYWORDS: &[&str] = &["VERIFIED", "CONFIRMED", "HIGH PROBABILITY"];

#[derive(Debug, Default)]
pub struct Extracted {
    /// Explicit entry bounds, `(min, max)`; equal for a single price.
    pub entry: Option<(f64, f64)>,
    pub stop_loss: Option<f64>,
    /// In message order, deduplicated, uncapped.
    pub take_profits: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    None,
    Entry,
    Stop,
    TakeProfit,
}

/// SELL/SHORT → Sell, BUY/LONG → Buy; first occurrence wins.
pub fn action(tokens: &[Token]) -> Option<TradeAction> {
    for token in tokens {
        if let Token::Word(w) = token {
            match w.as_str() {
                "BUY" | "LONG" => return Some(TradeAction::Buy),
                "SELL" | "SHORT" => return Some(TradeAction::Sell),
                _ => {}
            }
        }
    }
    None
}

/// First word (or dash-joined word pair) that canonicalizes to a known
/// instrument.
pub fn symbol(tokens: &[Token], extra_aliases: &[(String, String)]) -> Option<String> {
    for (i, token) in tokens.iter().enumerate() {
        let Token::Word(w) = token else { continue };
        if let Some(canonical) = canonicalize_with(w, extra_aliases) {
            return Some(canonical);
        }
        // "XAU-USD" lexes as Word Dash Word.
        if let (Some(Token::Dash), Some(Token::Word(next))) = (tokens.get(i + 1), tokens.get(i + 2))
        {
            let joined = format!("{w}{next}");
            if let Some(canonical) = canonicalize_with(&joined, extra_aliases) {
                return Some(canonical);
            }
        }
    }
    None
}

/// Extract entry bounds, stop-loss and take-profit levels in one pass.
pub fn levels(tokens: &[Token]) -> Extracted {
    let mut out = Extracted::default();
    let mut keyword_entry: Option<(f64, f64)> = None;
    let mut bare_range: Option<(f64, f64)> = None;
    let mut pending = Pending::None;
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i] {
            Token::Word(w) => {
                if is_take_profit_keyword(w) {
                    pending = Pending::TakeProfit;
                } else if w == "TAKE" && next_word_is(tokens, i + 1, "PROFIT") {
                    pending = Pending::TakeProfit;
                    i += 1;
                } else if w == "STOP" && next_word_is(tokens, i + 1, "LOSS") {
                    pending = Pending::Stop;
                    i += 1;
                } else if STOP_KEYWORDS.contains(&w.as_str()) {
                    pending = Pending::Stop;
                } else if ENTRY_KEYWORDS.contains(&w.as_str()) {
                    pending = Pending::Entry;
                } else if !is_action_word(w) {
                    // An unrelated word ends the reach of the last marker.
                    pending = Pending::None;
                }
            }
            Token::At => pending = Pending::Entry,
            Token::Colon | Token::Dash => {}
            Token::Number(n) => {
                let range = read_range(tokens, i);
                match pending {
                    Pending::Stop => {
                        if out.stop_loss.is_none() {
                            out.stop_loss = Some(*n);
                        }
                        i = range.end;
                        pending = Pending::None;
                        continue;
                    }
                    Pending::TakeProfit => {
                        if is_level_index(tokens, i, *n) {
                            // "TARGET 2: 2355" — the 2 is a level index,
                            // not a price.
                            i += 1;
                            continue;
                        }
                        push_take_profit(&mut out.take_profits, *n);
                        if let Some(second) = range.second {
                            push_take_profit(&mut out.take_profits, second);
                        }
                        i = range.end;
                        pending = Pending::None;
                        continue;
                    }
                    Pending::Entry => {
                        if keyword_entry.is_none() {
                            keyword_entry = Some(match range.second {
                                Some(second) => ordered(*n, second),
                                None => (*n, *n),
                            });
                        }
                        i = range.end;
                        pending = Pending::None;
                        continue;
                    }
                    Pending::None => {
                        if let Some(second) = range.second {
                            if bare_range.is_none() {
                                bare_range = Some(ordered(*n, second));
                            }
                            i = range.end;
                            continue;
                        }
                    }
                }
            }
        }
        i += 1;
    }

    // Preference order: an explicit two-number range anywhere beats a
    // single keyworded price.
    out.entry = match (keyword_entry, bare_range) {
        (Some((min, max)), _) if min != max => Some((min, max)),
        (keyed, Some(range)) => Some(keyed.unwrap_or(range)),
        (keyed, None) => keyed,
    };
    out
}

/// Message-quality heuristic carried into the audit record. Base 0.5,
/// up to +0.3 for numbered targets, +0.2 for self-declared certainty.
pub fn confidence(tokens: &[Token], text: &str) -> f64 {
    let numbered_targets = tokens
        .iter()
        .filter(|t| match t {
            Token::Word(w) => is_numbered_target(w),
            _ => false,
        })
        .count();

    let mut confidence = 0.5 + (numbered_targets as f64 * 0.1).min(0.3);
    if CONFIDENCE_KEYWORDS.iter().any(|k| text.contains(k)) {
        confidence += 0.2;
    }
    confidence.min(1.0)
}

struct RangeRead {
    /// Index just past the consumed tokens.
    end: usize,
    /// Second bound when the number opened a `N-N` range.
    second: Option<f64>,
}

/// At `tokens[i] == Number(_)`, check for a `- Number` continuation.
fn read_range(tokens: &[Token], i: usize) -> RangeRead {
    if let (Some(Token::Dash), Some(Token::Number(second))) = (tokens.get(i + 1), tokens.get(i + 2))
    {
        RangeRead {
            end: i + 3,
            second: Some(*second),
        }
    } else {
        RangeRead {
            end: i + 1,
            second: None,
        }
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn push_take_profit(take_profits: &mut Vec<f64>, value: f64) {
    if !take_profits.contains(&value) {
        take_profits.push(value);
    }
}

/// "TP", "TP1".."TP9", "TARGET", "TARGET2", "TAKEPROFIT", "TPS".
fn is_take_profit_keyword(word: &str) -> bool {
    for prefix in ["TP", "TARGET", "TAKEPROFIT"] {
        if let Some(rest) = word.strip_prefix(prefix) {
            if rest.is_empty() || rest == "S" || rest.chars().all(|c| c.is_ascii_digit()) {
                return true;
            }
        }
    }
    false
}

fn is_numbered_target(word: &str) -> bool {
    for prefix in ["TP", "TARGET"] {
        if let Some(rest) = word.strip_prefix(prefix) {
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                return true;
            }
        }
    }
    false
}

fn is_action_word(word: &str) -> bool {
    matches!(word, "BUY" | "SELL" | "LONG" | "SHORT")
}

/// Small bare integer right before a colon or another number is a level
/// index ("Take Profit 1: 2355"), not a price.
fn is_level_index(tokens: &[Token], i: usize, n: f64) -> bool {
    n < 10.0
        && n.fract() == 0.0
        && matches!(tokens.get(i + 1), Some(Token::Colon) | Some(Token::Number(_)))
}

fn next_word_is(tokens: &[Token], i: usize, expected: &str) -> bool {
    matches!(tokens.get(i), Some(Token::Word(w)) if w == expected)
}
