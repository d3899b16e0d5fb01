//! Wire format of the x402 handshake.
//!
//! # Flow
//!
//! 1. Client requests a priced resource without payment.
//! 2. Provider answers `402 Payment Required` whose JSON body is a [`PaymentRequirement`].
//! 3. Client signs an ERC-3009 authorization over those terms and retries with the
//!    [`PaymentAuthorization`] in the [`PAYMENT_HEADER`] header.
//! 4. Provider verifies, consumes the nonce, serves the resource and attaches a
//!    [`PaymentReceipt`] in [`PAYMENT_RESPONSE_HEADER`].
//!
//! Rejections carry a [`PaymentProblem`] body.
//!
//! All types serialize to JSON using camelCase field names.

use alloy_primitives::{Address, B256};
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::timestamp::UnixTimestamp;
use crate::util::TokenAmount;

mod authorization;
mod requirement;

pub use authorization::*;
pub use requirement::*;

/// Request header carrying the signed [`PaymentAuthorization`].
pub const PAYMENT_HEADER: &str = "X-Payment";
/// Response header carrying the base64 [`PaymentReceipt`] of an accepted payment.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-Payment-Response";
/// Response header flagging a `402` as an x402 payment requirement.
pub const PAYMENT_REQUIRED_HEADER: &str = "X-Payment-Required";

/// Pricing scheme of a requirement.
///
/// - `exact`: the authorized value must equal the price.
/// - `upto`: the price is a ceiling; the value must not exceed it and must reach the
///   optional `minAmount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Exact,
    Upto,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Exact => f.write_str("exact"),
            Scheme::Upto => f.write_str("upto"),
        }
    }
}

/// Unknown scheme name.
#[derive(Debug, thiserror::Error)]
#[error("Unknown payment scheme: {0}")]
pub struct UnknownScheme(pub String);

impl FromStr for Scheme {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Scheme::Exact),
            "upto" => Ok(Scheme::Upto),
            other => Err(UnknownScheme(other.to_string())),
        }
    }
}

/// The 32-byte ERC-3009 nonce that ties an authorization to exactly one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentNonce(pub B256);

impl PaymentNonce {
    /// 256 bits from the thread-local CSPRNG; collisions are not a practical concern.
    pub fn random() -> Self {
        let bytes: [u8; 32] = rng().random();
        PaymentNonce(B256::from(bytes))
    }
}

impl Display for PaymentNonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<B256> for PaymentNonce {
    fn from(value: B256) -> Self {
        PaymentNonce(value)
    }
}

/// Proof of an accepted payment, returned to the payer in [`PAYMENT_RESPONSE_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payer: Address,
    pub value: TokenAmount,
    pub token: Address,
    pub chain_id: u64,
    pub nonce: PaymentNonce,
    pub settled_at: UnixTimestamp,
}

/// JSON body of a rejected payment.
///
/// `code` is stable and machine-readable, `error` is for humans. Amount problems
/// carry the expected and received base-unit values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProblem {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl PaymentProblem {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            expected: None,
            received: None,
        }
    }

    pub fn with_amounts(mut self, expected: impl Display, received: impl Display) -> Self {
        self.expected = Some(expected.to_string());
        self.received = Some(received.to_string());
        self
    }
}
