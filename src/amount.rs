//! Lossless conversion between decimal display amounts and integer base units.
//!
//! All arithmetic is done on digit strings or `BigUint`, never on floats:
//! on-chain amounts routinely exceed the range a `f64` can represent exactly.

use std::{fmt, str::FromStr};

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An amount of a single denomination, in base units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub amount: String,
    pub denom: String,
}

impl Coin {
    pub fn new(amount: impl Into<String>, denom: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            denom: denom.into(),
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

impl FromStr for Coin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_coin(s)
    }
}

/// Convert a decimal amount (`"1.5"`) into base units (`"1500000"` for 6 decimals).
///
/// Fails if the input is not a plain non-negative decimal or carries more
/// fractional digits than `decimals` allows.
pub fn to_base_units(amount: &str, decimals: u32) -> Result<String> {
    let amount = amount.trim();
    let invalid = || Error::InvalidAmount(amount.to_string());

    let (whole, fraction) = match amount.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (amount, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }

    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    if fraction.len() > decimals as usize {
        return Err(Error::InvalidAmount(format!(
            "{amount} has more than {decimals} fractional digits"
        )));
    }

    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    digits.push_str(fraction);
    digits.extend(std::iter::repeat('0').take(decimals as usize - fraction.len()));

    Ok(strip_leading_zeros(&digits))
}

/// Render a base-unit integer as a decimal string with exactly `decimals` fractional digits.
pub fn to_decimal_units(base_amount: &str, decimals: u32) -> Result<String> {
    let digits = parse_integer(base_amount)?.to_string();

    if decimals == 0 {
        return Ok(digits);
    }

    let decimals = decimals as usize;
    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - digits.len()), digits)
    } else {
        digits
    };

    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    Ok(format!("{whole}.{fraction}"))
}

/// Human readable amount, e.g. `"1.500000 ATOM"` for `1500000uatom`.
pub fn format_display(base_amount: &str, denom: &str, decimals: u32) -> Result<String> {
    let amount = to_decimal_units(base_amount, decimals)?;
    Ok(format!("{amount} {}", display_symbol(denom)))
}

/// Display symbol for a base denom: a leading micro-unit `u` is dropped and the rest upper-cased.
pub fn display_symbol(denom: &str) -> String {
    match denom.strip_prefix('u') {
        Some(rest) if !rest.is_empty() => rest.to_uppercase(),
        _ => denom.to_uppercase(),
    }
}

/// Parse `"1000000uatom"` into a [`Coin`].
pub fn parse_coin(s: &str) -> Result<Coin> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::InvalidAmount(format!("missing denom in {s:?}")))?;

    let (amount, denom) = s.split_at(split);
    if amount.is_empty() || denom.is_empty() {
        return Err(Error::InvalidAmount(format!("invalid coin {s:?}")));
    }

    Ok(Coin::new(amount, denom))
}

/// Parse a comma separated coin list. An empty string yields no coins.
pub fn parse_coins(s: &str) -> Result<Vec<Coin>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }

    s.split(',').map(parse_coin).collect()
}

pub fn format_coins(coins: &[Coin]) -> String {
    coins
        .iter()
        .map(Coin::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Sum the amounts of every coin in `denom`. Yields `"0"` when none match.
pub fn sum_coins(coins: &[Coin], denom: &str) -> Result<String> {
    let mut total = BigUint::default();

    for coin in coins.iter().filter(|c| c.denom == denom) {
        total += parse_integer(&coin.amount)?;
    }

    Ok(total.to_string())
}

pub(crate) fn parse_integer(s: &str) -> Result<BigUint> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidAmount(s.to_string()));
    }

    BigUint::from_str(s).map_err(|_| Error::InvalidAmount(s.to_string()))
}

fn strip_leading_zeros(digits: &str) -> String {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
