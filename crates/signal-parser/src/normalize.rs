//! Message normalization and lexing.
//!
//! Signal channels publish free text full of markdown, emoji bullet
//! points and typographic dashes. Everything here reduces that to an
//! uppercase token stream the extractors can walk.

/// Emoji and symbols that channels use as stop-loss markers.
const STOP_MARKERS: [char; 5] = ['\u{1F6D1}', '\u{26D4}', '\u{274C}', '\u{1F534}', '\u{1F6AB}'];

/// Emoji and symbols used as take-profit / target markers.
const TARGET_MARKERS: [char; 4] = ['\u{2705}', '\u{1F3AF}', '\u{2714}', '\u{2611}'];

/// Dash lookalikes folded into a plain hyphen.
const DASH_VARIANTS: [char; 5] = ['\u{2013}', '\u{2014}', '\u{2212}', '\u{2012}', '\u{2015}'];

/// Markdown and decoration stripped outright.
const MARKUP: [char; 8] = ['*', '_', '`', '#', '>', '|', '[', ']'];

/// Uppercase the message, fold dash variants, turn known emoji markers
/// into their keyword equivalents and drop everything else non-essential.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 16);
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if STOP_MARKERS.contains(&c) {
            out.push_str(" SL ");
        } else if TARGET_MARKERS.contains(&c) {
            out.push_str(" TP ");
        } else if DASH_VARIANTS.contains(&c) || c == '-' {
            out.push('-');
        } else if MARKUP.contains(&c) {
            out.push(' ');
        } else if c == '/' {
            // "XAU/USD" → "XAUUSD"; a slash elsewhere is just a separator.
            let prev_alpha = out.chars().last().is_some_and(|p| p.is_ascii_alphabetic());
            let next_alpha = chars.peek().is_some_and(|n| n.is_ascii_alphabetic());
            if !(prev_alpha && next_alpha) {
                out.push(' ');
            }
        } else if c == ',' {
            // Thousands separator inside a number, separator otherwise.
            let prev_digit = out.chars().last().is_some_and(|p| p.is_ascii_digit());
            let next_digit = chars.peek().is_some_and(|n| n.is_ascii_digit());
            if !(prev_digit && next_digit) {
                out.push(' ');
            }
        } else if c == '@' || c == ':' {
            out.push(' ');
            out.push(c);
            out.push(' ');
        } else if c.is_ascii_alphanumeric() || c == '.' {
            out.push(c.to_ascii_uppercase());
        } else {
            // Whitespace, punctuation and remaining emoji carry no
            // signal content.
            out.push(' ');
        }
    }

    // Collapse runs of whitespace.
    let mut collapsed = String::with_capacity(out.len());
    let mut last_space = true;
    for c in out.chars() {
        if c == ' ' {
            if !last_space {
                collapsed.push(' ');
            }
            last_space = true;
        } else {
            collapsed.push(c);
            last_space = false;
        }
    }
    collapsed.trim_end().to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(String),
    Number(f64),
    Dash,
    Colon,
    At,
}

/// Lex a normalized message. `3343-3346` becomes Number Dash Number;
/// `TP1:` becomes Word("TP1") Colon.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();

    for chunk in text.split_whitespace() {
        lex_chunk(chunk, &mut tokens);
    }
    tokens
}

fn lex_chunk(chunk: &str, tokens: &mut Vec<Token>) {
    let bytes = chunk.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '-' {
            tokens.push(Token::Dash);
            i += 1;
        } else if c == ':' {
            tokens.push(Token::Colon);
            i += 1;
        } else if c == '@' {
            tokens.push(Token::At);
            i += 1;
        } else if c == '.' && i + 1 < bytes.len() && (bytes[i + 1] as char).is_ascii_digit() {
            // ".75" style fraction with no integer part
            let (value, next) = lex_number(chunk, i);
            tokens.push(Token::Number(value));
            i = next;
        } else if c.is_ascii_digit() {
            let (value, next) = lex_number(chunk, i);
            tokens.push(Token::Number(value));
            i = next;
        } else if c.is_ascii_alphabetic() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
                i += 1;
            }
            tokens.push(Token::Word(chunk[start..i].to_string()));
        } else {
            i += 1;
        }
    }
}

fn lex_number(chunk: &str, start: usize) -> (f64, usize) {
    let bytes = chunk.as_bytes();
    let mut i = start;
    let mut seen_dot = false;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.' && !seen_dot && i + 1 < bytes.len() && (bytes[i + 1] as char).is_ascii_digit() {
            seen_dot = true;
            i += 1;
        } else {
            break;
        }
    }

    let value = chunk[start..i].parse::<f64>().unwrap_or(0.0);
    (value, i)
}
