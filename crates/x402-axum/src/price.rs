//! Prices attached to protected routes.
//!
//! A [`PriceTag`] is what an operator writes down for a route: an amount, a pricing
//! scheme and optionally the token. It is turned into a fresh
//! [`PaymentRequirement`](x402_types::proto::PaymentRequirement) for every unpaid request
//! by the [`RequirementBuilder`](crate::requirement::RequirementBuilder).
//!
//! ```rust
//! use x402_axum::PriceTag;
//!
//! let per_call: PriceTag = "$0.10".parse().unwrap();
//! let metered = PriceTag::upto("1.00".parse().unwrap())
//!     .with_min_amount("0.05".parse().unwrap())
//!     .with_description("Pay for what you use");
//! ```

use alloy_primitives::Address;
use std::str::FromStr;
use std::time::Duration;
use x402_types::proto::{Scheme, TokenExtra};
use x402_types::util::{MoneyAmount, MoneyAmountParseError};

/// Price of a protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTag {
    /// Price for `exact`, ceiling for `upto`.
    pub amount: MoneyAmount,
    /// Token to pay in. `None` picks the first accepted token.
    pub token: Option<Address>,
    pub scheme: Scheme,
    /// Minimum for `upto`.
    pub min_amount: Option<MoneyAmount>,
    pub description: Option<String>,
}

impl PriceTag {
    pub fn exact(amount: MoneyAmount) -> Self {
        Self {
            amount,
            token: None,
            scheme: Scheme::Exact,
            min_amount: None,
            description: None,
        }
    }

    pub fn upto(max: MoneyAmount) -> Self {
        Self {
            scheme: Scheme::Upto,
            ..Self::exact(max)
        }
    }

    pub fn with_min_amount(mut self, min: MoneyAmount) -> Self {
        self.min_amount = Some(min);
        self
    }

    pub fn with_token(mut self, token: Address) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An exact price, as in `"$0.10"`.
impl FromStr for PriceTag {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PriceTag::exact(MoneyAmount::parse(s)?))
    }
}

/// A token the provider accepts, with the metadata payers need to sign for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedToken {
    pub address: Address,
    pub extra: TokenExtra,
}

impl AcceptedToken {
    pub fn new(address: Address, extra: TokenExtra) -> Self {
        Self { address, extra }
    }
}

impl From<&x402_chain_eip155::Eip155TokenDeployment> for AcceptedToken {
    fn from(deployment: &x402_chain_eip155::Eip155TokenDeployment) -> Self {
        AcceptedToken {
            address: deployment.address,
            extra: deployment.extra(),
        }
    }
}

/// A price tag that cannot be served with the configured tokens.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PriceTagError {
    #[error("No accepted token configured")]
    NoAcceptedToken,
    #[error("Token {0} is not accepted")]
    TokenNotAccepted(Address),
    #[error("Price does not fit token: {0}")]
    Precision(#[from] MoneyAmountParseError),
    #[error("minAmount is only meaningful for the upto scheme")]
    MinAmountOnExact,
    #[error("minAmount {min} exceeds amount {max}")]
    MinAboveMax { min: MoneyAmount, max: MoneyAmount },
    #[error("Requirement TTL must be at least one second, got {0:?}")]
    TtlTooShort(Duration),
}
