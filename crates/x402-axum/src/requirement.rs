use alloy_primitives::Address;
use std::sync::Arc;
use std::time::Duration;
use x402_types::proto::{PaymentNonce, PaymentRequirement, Scheme};
use x402_types::timestamp::Clock;

use crate::ledger::{LedgerError, NonceLedger};
use crate::price::{AcceptedToken, PriceTag, PriceTagError};

/// How long an issued requirement stays payable.
pub const DEFAULT_REQUIREMENT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum RequirementError {
    #[error(transparent)]
    PriceTag(#[from] PriceTagError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Issues [`PaymentRequirement`]s for price tags.
///
/// Each requirement gets a fresh random nonce and is registered in the ledger as
/// pending; that registration is the only side effect.
#[derive(Clone)]
pub struct RequirementBuilder {
    recipient: Address,
    chain_id: u64,
    accepted_tokens: Arc<Vec<AcceptedToken>>,
    ledger: Arc<dyn NonceLedger>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl RequirementBuilder {
    pub fn new(
        recipient: Address,
        chain_id: u64,
        accepted_tokens: Vec<AcceptedToken>,
        ledger: Arc<dyn NonceLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            recipient,
            chain_id,
            accepted_tokens: Arc::new(accepted_tokens),
            ledger,
            clock,
            ttl: DEFAULT_REQUIREMENT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn token_for(&self, tag: &PriceTag) -> Result<&AcceptedToken, PriceTagError> {
        match tag.token {
            None => self
                .accepted_tokens
                .first()
                .ok_or(PriceTagError::NoAcceptedToken),
            Some(address) => self
                .accepted_tokens
                .iter()
                .find(|t| t.address == address)
                .ok_or(PriceTagError::TokenNotAccepted(address)),
        }
    }

    /// Whole-second expiry is used on the wire, so anything shorter than a second would
    /// issue requirements that expire as they are issued.
    pub fn check_ttl(&self) -> Result<(), PriceTagError> {
        if self.ttl.as_secs() == 0 {
            return Err(PriceTagError::TtlTooShort(self.ttl));
        }
        Ok(())
    }

    /// Checks that `tag` can be served: the TTL is usable, its token is accepted and its
    /// amounts fit the token's decimals. Call this when routes are configured, not per
    /// request.
    pub fn validate(&self, tag: &PriceTag) -> Result<(), PriceTagError> {
        self.check_ttl()?;
        let token = self.token_for(tag)?;
        let decimals = token.extra.decimals.into();
        tag.amount.to_token_units(decimals)?;
        if let Some(min) = tag.min_amount {
            if tag.scheme == Scheme::Exact {
                return Err(PriceTagError::MinAmountOnExact);
            }
            if min > tag.amount {
                return Err(PriceTagError::MinAboveMax {
                    min,
                    max: tag.amount,
                });
            }
            min.to_token_units(decimals)?;
        }
        Ok(())
    }

    /// Issues and registers a requirement for `tag`.
    ///
    /// `resource` is the request path the requirement is issued for.
    pub async fn build(
        &self,
        tag: &PriceTag,
        resource: Option<&str>,
    ) -> Result<PaymentRequirement, RequirementError> {
        self.check_ttl()?;
        let token = self.token_for(tag)?;
        let now = self.clock.now();
        let requirement = PaymentRequirement {
            amount: tag.amount,
            token: token.address,
            recipient: self.recipient,
            chain_id: self.chain_id,
            nonce: PaymentNonce::random(),
            expires_at: now + self.ttl.as_secs(),
            scheme: tag.scheme,
            min_amount: tag.min_amount,
            resource: resource.map(str::to_string),
            description: tag.description.clone(),
            extra: token.extra.clone(),
        };
        self.ledger.register(requirement.clone(), now).await?;
        Ok(requirement)
    }
}

impl std::fmt::Debug for RequirementBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequirementBuilder")
            .field("recipient", &self.recipient)
            .field("chain_id", &self.chain_id)
            .field("accepted_tokens", &self.accepted_tokens)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
