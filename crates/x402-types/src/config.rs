//! Configuration helpers shared by x402 services.
//!
//! The [`LiteralOrEnv`] wrapper lets configuration files name a value either
//! directly or through an environment variable, which keeps wallet addresses and
//! other deployment-specific values out of checked-in config:
//!
//! ```json
//! {
//!   "recipient": "0x742d35Cc6634C0532925a3b844Bc9e7595f6E123",
//!   "recipient": "$PAYWALL_RECIPIENT",
//!   "recipient": "${PAYWALL_RECIPIENT}"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// Supports literal values, `$VAR` and `${VAR}` references. The resolved string is
/// parsed with [`FromStr`], so a missing variable and an unparsable value are both
/// reported while the configuration loads rather than at request time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name if `s` is `$VAR` or `${VAR}`.
    fn env_var_name(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
            return (!braced.is_empty()).then_some(braced);
        }
        let name = s.strip_prefix('$')?;
        let is_identifier =
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        is_identifier.then_some(name)
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let value = match Self::env_var_name(&raw) {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{var_name}' not found (referenced as '{raw}')"
                ))
            })?,
            None => raw,
        };
        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {e}")))?;
        Ok(LiteralOrEnv(parsed))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}
