//! Human-readable prices and on-chain token amounts.
//!
//! Routes are priced in human terms (`"$0.10"`), while ERC-3009 authorizations carry
//! integer base units (`100000` for 0.10 USDC with 6 decimals). [`MoneyAmount`] is the
//! former, [`TokenAmount`] the latter, and the conversion between them is explicit about
//! token decimals.
//!
//! # Supported formats
//!
//! - Plain numbers: `"100"`, `"0.01"`
//! - With currency symbols: `"$10.50"`
//! - With thousand separators: `"1,000"`, `"1,000,000.50"`
//!
//! ```rust
//! use x402_types::util::MoneyAmount;
//!
//! let amount = MoneyAmount::parse("$10.50").unwrap();
//! assert_eq!(amount.scale(), 2);
//! assert_eq!(amount.mantissa(), 1050);
//! assert_eq!(amount.to_token_units(6).unwrap().to_string(), "10500000");
//! ```

use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::ops::Add;
use std::str::FromStr;
use std::sync::LazyLock;

/// A parsed, non-negative monetary amount that keeps its original precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MoneyAmount(pub Decimal);

/// Errors that can occur when parsing or converting a monetary amount.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        constants::MIN_STR,
        constants::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

mod constants {
    use super::*;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
    pub static STRIP: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\d\.\-]+").expect("valid regex"));
}

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(Decimal::ZERO);

    /// Parses a human-readable currency string.
    ///
    /// Currency symbols, thousand separators and whitespace are stripped before
    /// parsing. The result must be non-negative and within the allowed range.
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = constants::STRIP.replace_all(input, "");
        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        Self::try_from_decimal(parsed)
    }

    fn try_from_decimal(parsed: Decimal) -> Result<Self, MoneyAmountParseError> {
        if parsed.is_sign_negative() && !parsed.is_zero() {
            return Err(MoneyAmountParseError::Negative);
        }
        if parsed < *constants::MIN || parsed > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(parsed))
    }

    /// Number of decimal places in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// The value without its decimal point: `"12.34"` gives `1234`.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Converts into integer base units of a token with `token_decimals` decimals.
    pub fn to_token_units(&self, token_decimals: u32) -> Result<U256, MoneyAmountParseError> {
        let money_decimals = self.scale();
        if money_decimals > token_decimals {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: money_decimals,
                token: token_decimals,
            });
        }
        let multiplier = U256::from(10).pow(U256::from(token_decimals - money_decimals));
        Ok(U256::from(self.mantissa()) * multiplier)
    }

    /// Converts integer base units back into a human amount.
    ///
    /// Zero is allowed here even though [`MoneyAmount::parse`] rejects it.
    pub fn from_token_units(
        units: U256,
        token_decimals: u32,
    ) -> Result<Self, MoneyAmountParseError> {
        let units: i128 = u128::try_from(units)
            .ok()
            .and_then(|u| i128::try_from(u).ok())
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        let decimal = Decimal::try_from_i128_with_scale(units, token_decimals)
            .map_err(|_| MoneyAmountParseError::OutOfRange)?;
        Ok(MoneyAmount(decimal.normalize()))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Add for MoneyAmount {
    type Output = MoneyAmount;

    fn add(self, rhs: Self) -> Self::Output {
        MoneyAmount(self.0 + rhs.0)
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::parse(value)
    }
}

impl TryFrom<f64> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::try_from(value).map_err(|_| MoneyAmountParseError::OutOfRange)?;
        Self::try_from_decimal(decimal)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MoneyAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MoneyAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MoneyAmount::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An amount in token base units, as signed into an ERC-3009 authorization.
///
/// Serialized as a decimal string (`"100000"`), the JSON convention for `uint256`
/// values. Deserialization also accepts `0x`-prefixed hex and plain JSON integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TokenAmount(pub U256);

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = alloy_primitives::ruint::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s.strip_prefix("0x") {
            Some(hex) => U256::from_str_radix(hex, 16)?,
            None => U256::from_str_radix(s, 10)?,
        };
        Ok(TokenAmount(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(u64),
            Text(String),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Number(n) => Ok(TokenAmount::from(n)),
            Wire::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
