//! Account names, symbols and assets.
//!
//! A `name` packs up to 13 characters from `.12345a-z` into a `u64`: twelve
//! 5-bit characters followed by one 4-bit character. Symbols pack a precision
//! byte and up to seven upper-case letters; an asset is an `i64` amount plus
//! its symbol.

use crate::error::CodecError;

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

fn char_to_symbol(c: u8) -> Option<u64> {
    match c {
        b'a'..=b'z' => Some(u64::from(c - b'a') + 6),
        b'1'..=b'5' => Some(u64::from(c - b'1') + 1),
        b'.' => Some(0),
        _ => None,
    }
}

/// Encode a name string.
pub fn string_to_name(s: &str) -> Result<u64, CodecError> {
    let bytes = s.as_bytes();
    if bytes.len() > 13 {
        return Err(CodecError::invalid("name", format!("'{s}' is longer than 13 characters")));
    }
    let mut value = 0u64;
    for (i, &c) in bytes.iter().enumerate() {
        let sym = char_to_symbol(c)
            .ok_or_else(|| CodecError::invalid("name", format!("'{s}' contains '{}'", c as char)))?;
        if i < 12 {
            value |= (sym & 0x1f) << (64 - 5 * (i + 1));
        } else {
            if sym > 0x0f {
                return Err(CodecError::invalid(
                    "name",
                    format!("13th character of '{s}' must be one of .1-5a-j"),
                ));
            }
            value |= sym;
        }
    }
    Ok(value)
}

/// Decode a name to its string form, trailing dots trimmed.
pub fn name_to_string(value: u64) -> String {
    let mut out = [b'.'; 13];
    let mut tmp = value;
    for i in 0..13 {
        let mask = if i == 0 { 0x0f } else { 0x1f };
        out[12 - i] = CHARMAP[(tmp & mask) as usize];
        tmp >>= if i == 0 { 4 } else { 5 };
    }
    let end = out.iter().rposition(|&c| c != b'.').map_or(0, |p| p + 1);
    out[..end].iter().map(|&c| c as char).collect()
}

// ─── Symbols ──────────────────────────────────────────────────────────────────

/// Encode a symbol code such as `EOS`.
pub fn string_to_symbol_code(code: &str) -> Result<u64, CodecError> {
    if code.is_empty() || code.len() > 7 {
        return Err(CodecError::invalid("symbol_code", format!("'{code}' must be 1-7 characters")));
    }
    let mut value = 0u64;
    for (i, c) in code.bytes().enumerate() {
        if !c.is_ascii_uppercase() {
            return Err(CodecError::invalid("symbol_code", format!("'{code}' must be A-Z")));
        }
        value |= u64::from(c) << (8 * i);
    }
    Ok(value)
}

pub fn symbol_code_to_string(mut value: u64) -> String {
    let mut out = String::new();
    while value & 0xff != 0 {
        out.push((value & 0xff) as u8 as char);
        value >>= 8;
    }
    out
}

/// A token symbol: decimal precision plus code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub precision: u8,
    pub code: u64,
}

impl Symbol {
    pub fn from_u64(raw: u64) -> Self {
        Self {
            precision: (raw & 0xff) as u8,
            code: raw >> 8,
        }
    }

    pub fn to_u64(self) -> u64 {
        (self.code << 8) | u64::from(self.precision)
    }

    pub fn code_string(self) -> String {
        symbol_code_to_string(self.code)
    }

    /// Parse `"4,EOS"`.
    pub fn parse(s: &str) -> Result<Self, CodecError> {
        let (precision, code) = s
            .split_once(',')
            .ok_or_else(|| CodecError::invalid("symbol", format!("'{s}' is not '<precision>,<code>'")))?;
        let precision: u8 = precision
            .trim()
            .parse()
            .map_err(|_| CodecError::invalid("symbol", format!("bad precision in '{s}'")))?;
        check_precision(precision)?;
        Ok(Self {
            precision,
            code: string_to_symbol_code(code.trim())?,
        })
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.precision, self.code_string())
    }
}

fn check_precision(precision: u8) -> Result<(), CodecError> {
    if precision > 18 {
        return Err(CodecError::invalid("symbol", format!("precision {precision} exceeds 18")));
    }
    Ok(())
}

// ─── Assets ───────────────────────────────────────────────────────────────────

/// A token quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl Asset {
    /// Parse `"1.0000 EOS"`. The precision is the number of fraction digits.
    pub fn parse(s: &str) -> Result<Self, CodecError> {
        let bad = || CodecError::invalid("asset", format!("'{s}' is not '<amount> <symbol>'"));
        let (amount, code) = s.trim().split_once(' ').ok_or_else(bad)?;
        let (negative, digits) = match amount.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, amount),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty()
            || !int_part.bytes().all(|c| c.is_ascii_digit())
            || !frac_part.bytes().all(|c| c.is_ascii_digit())
        {
            return Err(bad());
        }
        let precision = u8::try_from(frac_part.len()).map_err(|_| bad())?;
        check_precision(precision)?;

        let mut magnitude: i64 = 0;
        for c in int_part.bytes().chain(frac_part.bytes()) {
            magnitude = magnitude
                .checked_mul(10)
                .and_then(|m| m.checked_add(i64::from(c - b'0')))
                .ok_or_else(|| CodecError::invalid("asset", format!("'{s}' overflows")))?;
        }
        Ok(Self {
            amount: if negative { -magnitude } else { magnitude },
            symbol: Symbol {
                precision,
                code: string_to_symbol_code(code.trim())?,
            },
        })
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        let code = self.symbol.code_string();
        if self.symbol.precision == 0 {
            return write!(f, "{sign}{abs} {code}");
        }
        let scale = 10u64.pow(u32::from(self.symbol.precision));
        write!(
            f,
            "{sign}{}.{:0width$} {code}",
            abs / scale,
            abs % scale,
            width = self.symbol.precision as usize
        )
    }
}
