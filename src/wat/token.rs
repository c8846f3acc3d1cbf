//! Tokens of the text format and the interpretation of numeric literals.
//!
//! Numbers are kept as their source text until the parser knows which type
//! they are read at; `(i32.const 0xffffffff)` and `(f32.const 0xffffffff)`
//! read the same token differently.

use fhex::FromHex;
use std::convert::TryFrom;
use std::fmt;

/// A region of source text. `line`/`column` locate `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub const ZERO: Span = Span {
        start: 0,
        end: 0,
        line: 1,
        column: 1,
    };

    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    /// Bare word: `module`, `i32`, `i32.add`, `offset=4`.
    Keyword(String),
    /// `$name`, stored without the `$`.
    Id(String),
    /// String literal with escapes resolved.
    String(Vec<u8>),
    /// Numeric literal in its source spelling.
    Number(String),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::Keyword(s) => write!(f, "{}", s),
            TokenKind::Id(s) => write!(f, "${}", s),
            TokenKind::String(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            TokenKind::Number(s) => write!(f, "{}", s),
        }
    }
}

// Number literals -------------------------------------------------------------

/// Consumes a run of digits in which `_` may only separate two digits.
/// Returns the number of digits read.
fn digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, hex: bool) -> Option<usize> {
    let is_digit = |c: char| if hex { c.is_ascii_hexdigit() } else { c.is_ascii_digit() };
    let mut count = 0;
    let mut after_underscore = false;
    while let Some(&c) = chars.peek() {
        if is_digit(c) {
            count += 1;
            after_underscore = false;
        } else if c == '_' {
            if count == 0 || after_underscore {
                return None;
            }
            after_underscore = true;
        } else {
            break;
        }
        chars.next();
    }
    if after_underscore {
        return None;
    }
    Some(count)
}

/// Whether `text` is a well-formed integer or float literal:
/// `[+-]? (num | 0x hexnum) ('.' frac?)? (exp)?`, `inf`, `nan`, `nan:0x hexnum`.
pub fn is_number(text: &str) -> bool {
    let unsigned = text.trim_start_matches(|c: char| c == '+' || c == '-');
    if text.len() - unsigned.len() > 1 {
        return false;
    }
    if unsigned == "inf" || unsigned == "nan" {
        return true;
    }
    if let Some(payload) = unsigned.strip_prefix("nan:0x") {
        let mut chars = payload.chars().peekable();
        return matches!(digits(&mut chars, true), Some(n) if n > 0) && chars.next().is_none();
    }

    let (body, hex) = match unsigned.strip_prefix("0x") {
        Some(body) => (body, true),
        None => (unsigned, false),
    };
    let mut chars = body.chars().peekable();
    match digits(&mut chars, hex) {
        Some(n) if n > 0 => {}
        _ => return false,
    }
    if chars.peek() == Some(&'.') {
        chars.next();
        if digits(&mut chars, hex).is_none() {
            return false;
        }
    }
    let exponent = if hex { ['p', 'P'] } else { ['e', 'E'] };
    if let Some(&c) = chars.peek() {
        if exponent.contains(&c) {
            chars.next();
            if let Some(&sign) = chars.peek() {
                if sign == '+' || sign == '-' {
                    chars.next();
                }
            }
            match digits(&mut chars, false) {
                Some(n) if n > 0 => {}
                _ => return false,
            }
        }
    }
    chars.next().is_none()
}

fn split_sign(text: &str) -> (bool, &str) {
    match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    }
}

fn strip_underscores(text: &str) -> String {
    text.chars().filter(|&c| c != '_').collect()
}

/// Sign and magnitude of an integer literal.
fn parse_magnitude(text: &str) -> Option<(bool, u64)> {
    let (negative, body) = split_sign(text);
    let clean = strip_underscores(body);
    let magnitude = match clean.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => clean.parse::<u64>().ok()?,
    };
    Some((negative, magnitude))
}

/// An unsigned index or limit.
pub fn parse_u32(text: &str) -> Option<u32> {
    if text.starts_with('+') || text.starts_with('-') {
        return None;
    }
    let (_, magnitude) = parse_magnitude(text)?;
    u32::try_from(magnitude).ok()
}

/// An i32 literal; the unsigned range wraps into the negative one.
pub fn parse_i32(text: &str) -> Option<i32> {
    let (negative, magnitude) = parse_magnitude(text)?;
    if negative {
        if magnitude > 1 << 31 {
            return None;
        }
        Some((magnitude as i64).wrapping_neg() as i32)
    } else {
        u32::try_from(magnitude).ok().map(|v| v as i32)
    }
}

pub fn parse_i64(text: &str) -> Option<i64> {
    let (negative, magnitude) = parse_magnitude(text)?;
    if negative {
        if magnitude > 1 << 63 {
            return None;
        }
        Some((magnitude as i64).wrapping_neg())
    } else {
        Some(magnitude as i64)
    }
}

/// An f32 literal. NaN payloads land in the significand bits.
pub fn parse_f32(text: &str) -> Option<f32> {
    let (negative, body) = split_sign(text);
    let sign = if negative { 0x8000_0000 } else { 0 };
    let value = if body == "inf" {
        f32::INFINITY
    } else if body == "nan" {
        return Some(f32::from_bits(sign | 0x7fc0_0000));
    } else if let Some(payload) = body.strip_prefix("nan:0x") {
        let payload = u32::from_str_radix(&strip_underscores(payload), 16).ok()?;
        if payload == 0 || payload > 0x007f_ffff {
            return None;
        }
        return Some(f32::from_bits(sign | 0x7f80_0000 | payload));
    } else if body.starts_with("0x") {
        f32::from_hex(&strip_underscores(body)).unwrap_or(0.0)
    } else {
        strip_underscores(body).parse::<f32>().ok()?
    };
    Some(if negative { -value } else { value })
}

pub fn parse_f64(text: &str) -> Option<f64> {
    let (negative, body) = split_sign(text);
    let sign = if negative { 0x8000_0000_0000_0000 } else { 0 };
    let value = if body == "inf" {
        f64::INFINITY
    } else if body == "nan" {
        return Some(f64::from_bits(sign | 0x7ff8_0000_0000_0000));
    } else if let Some(payload) = body.strip_prefix("nan:0x") {
        let payload = u64::from_str_radix(&strip_underscores(payload), 16).ok()?;
        if payload == 0 || payload > 0x000f_ffff_ffff_ffff {
            return None;
        }
        return Some(f64::from_bits(sign | 0x7ff0_0000_0000_0000 | payload));
    } else if body.starts_with("0x") {
        f64::from_hex(&strip_underscores(body)).unwrap_or(0.0)
    } else {
        strip_underscores(body).parse::<f64>().ok()?
    };
    Some(if negative { -value } else { value })
}
