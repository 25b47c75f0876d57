//! OCC option symbol parsing.
//!
//! An OCC symbol is `<root><YYMMDD><C|P><strike*1000, 8 digits>`, e.g.
//! `SPY240119C00450000`. The root may be space padded to six characters.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Length of the date/type/strike suffix.
const OCC_SUFFIX_LEN: usize = 15;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

/// Parsed OCC option symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSymbol {
    pub underlying: String,
    pub expiration: NaiveDate,
    pub kind: OptionKind,
    pub strike: Decimal,
}

impl OptionSymbol {
    /// Parse an OCC symbol. Plain equity tickers are rejected.
    pub fn parse(symbol: &str) -> Result<Self> {
        let (root, suffix) =
            split_occ(symbol).ok_or_else(|| CoreError::InvalidSymbol(symbol.to_string()))?;

        let date = &suffix[0..6];
        let kind = match &suffix[6..7] {
            "C" => OptionKind::Call,
            "P" => OptionKind::Put,
            _ => return Err(CoreError::InvalidSymbol(symbol.to_string())),
        };
        let expiration = NaiveDate::parse_from_str(&format!("20{date}"), "%Y%m%d")
            .map_err(|_| CoreError::InvalidSymbol(symbol.to_string()))?;
        let strike_raw: i64 = suffix[7..]
            .parse()
            .map_err(|_| CoreError::InvalidSymbol(symbol.to_string()))?;

        Ok(Self {
            underlying: root.to_string(),
            expiration,
            kind,
            strike: Decimal::new(strike_raw, 3),
        })
    }
}

/// Return the underlying ticker for an option symbol, or the input
/// unchanged (trimmed, upper-case preserved) for plain tickers.
pub fn underlying_symbol(symbol: &str) -> &str {
    match split_occ(symbol) {
        Some((root, _)) => root,
        None => symbol.trim(),
    }
}

fn split_occ(symbol: &str) -> Option<(&str, &str)> {
    let symbol = symbol.trim();
    if !symbol.is_ascii() || symbol.len() <= OCC_SUFFIX_LEN {
        return None;
    }
    let (root, suffix) = symbol.split_at(symbol.len() - OCC_SUFFIX_LEN);
    let bytes = suffix.as_bytes();
    let well_formed = bytes[0..6].iter().all(u8::is_ascii_digit)
        && matches!(bytes[6], b'C' | b'P')
        && bytes[7..].iter().all(u8::is_ascii_digit);
    let root = root.trim_end();
    if well_formed && !root.is_empty() {
        Some((root, suffix))
    } else {
        None
    }
}
