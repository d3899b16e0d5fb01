//! Verification of signed payment authorizations.
//!
//! [`PaymentVerifier::verify`] runs the checks in a fixed order and stops at the first
//! failure:
//!
//! 1. the nonce was issued by this provider and is still pending;
//! 2. the requirement has not expired and the authorization's validity window is open;
//! 3. recipient, token, chain and resource match the issued requirement;
//! 4. the EIP-712 signature recovers to the claimed payer;
//! 5. the value satisfies the pricing scheme;
//! 6. the optional [`PaymentValidator`] accepts the payment;
//! 7. the nonce is atomically consumed.
//!
//! Only a payment that passes step 7 grants access, so concurrent submissions of one
//! authorization yield exactly one [`VerifiedPayment`].

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::sync::Arc;
use x402_chain_eip155::recover_address;
use x402_types::proto::{
    PaymentAuthorization, PaymentNonce, PaymentProblem, PaymentReceipt, PaymentRequirement, Scheme,
};
use x402_types::timestamp::{Clock, UnixTimestamp};
use x402_types::util::{MoneyAmount, MoneyAmountParseError, TokenAmount};

use crate::ledger::{LedgerError, NonceLedger};

/// A payment that passed verification and consumed its nonce.
///
/// Inserted into request extensions, so handlers can take `Extension<VerifiedPayment>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    pub payer: Address,
    /// Authorized value in token base units.
    pub value: TokenAmount,
    /// `value` in human units of the token.
    pub amount: MoneyAmount,
    pub token: Address,
    pub chain_id: u64,
    pub nonce: PaymentNonce,
    pub scheme: Scheme,
    pub resource: Option<String>,
    pub verified_at: UnixTimestamp,
}

impl VerifiedPayment {
    pub fn receipt(&self) -> PaymentReceipt {
        PaymentReceipt {
            payer: self.payer,
            value: self.value,
            token: self.token,
            chain_id: self.chain_id,
            nonce: self.nonce,
            settled_at: self.verified_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Unknown payment nonce")]
    UnknownNonce,
    #[error("Payment nonce already used")]
    AlreadyUsed,
    #[error("Payment requirement expired")]
    Expired,
    #[error("Payment authorization is not valid yet")]
    NotYetValid,
    #[error("Payment recipient mismatch")]
    RecipientMismatch { expected: Address, received: Address },
    #[error("Payment token mismatch")]
    TokenMismatch { expected: Address, received: Address },
    #[error("Payment chain mismatch")]
    ChainMismatch { expected: u64, received: u64 },
    #[error("Payment was issued for a different resource")]
    ResourceMismatch {
        expected: Option<String>,
        received: Option<String>,
    },
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Payment amount does not match the price")]
    AmountMismatch { expected: U256, received: U256 },
    #[error("Payment amount is below the minimum")]
    InsufficientAmount { expected: U256, received: U256 },
    #[error("Payment amount exceeds the maximum")]
    AmountTooLarge { expected: U256, received: U256 },
    #[error("Payment rejected: {0}")]
    CustomValidationFailed(String),
    #[error("Issued requirement cannot be priced: {0}")]
    InvalidRequirement(#[from] MoneyAmountParseError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl VerificationError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            VerificationError::UnknownNonce => "UNKNOWN_NONCE",
            VerificationError::AlreadyUsed => "NONCE_ALREADY_USED",
            VerificationError::Expired => "PAYMENT_EXPIRED",
            VerificationError::NotYetValid => "PAYMENT_NOT_YET_VALID",
            VerificationError::RecipientMismatch { .. } => "RECIPIENT_MISMATCH",
            VerificationError::TokenMismatch { .. } => "TOKEN_MISMATCH",
            VerificationError::ChainMismatch { .. } => "CHAIN_MISMATCH",
            VerificationError::ResourceMismatch { .. } => "RESOURCE_MISMATCH",
            VerificationError::InvalidSignature(_) => "INVALID_SIGNATURE",
            VerificationError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            VerificationError::InsufficientAmount { .. } => "INSUFFICIENT_AMOUNT",
            VerificationError::AmountTooLarge { .. } => "AMOUNT_TOO_LARGE",
            VerificationError::CustomValidationFailed(_) => "CUSTOM_VALIDATION_FAILED",
            VerificationError::InvalidRequirement(_) => "INVALID_REQUIREMENT",
            VerificationError::Ledger(e) => e.code(),
        }
    }

    /// Failures of the provider's own dependencies rather than of the payment.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            VerificationError::Ledger(_) | VerificationError::InvalidRequirement(_)
        )
    }

    pub fn to_problem(&self) -> PaymentProblem {
        let problem = PaymentProblem::new(self.code(), self.to_string());
        match self {
            VerificationError::RecipientMismatch { expected, received }
            | VerificationError::TokenMismatch { expected, received } => {
                problem.with_amounts(expected, received)
            }
            VerificationError::ChainMismatch { expected, received } => {
                problem.with_amounts(expected, received)
            }
            VerificationError::AmountMismatch { expected, received }
            | VerificationError::InsufficientAmount { expected, received }
            | VerificationError::AmountTooLarge { expected, received } => {
                problem.with_amounts(expected, received)
            }
            _ => problem,
        }
    }
}

/// Application-specific acceptance rule, run after all protocol checks pass and
/// before the nonce is consumed.
#[async_trait]
pub trait PaymentValidator: Send + Sync {
    /// Returns the rejection reason, if any.
    async fn validate(
        &self,
        authorization: &PaymentAuthorization,
        requirement: &PaymentRequirement,
    ) -> Result<(), String>;
}

/// Checks authorizations against the requirements recorded in a [`NonceLedger`].
#[derive(Clone)]
pub struct PaymentVerifier {
    ledger: Arc<dyn NonceLedger>,
    clock: Arc<dyn Clock>,
    validator: Option<Arc<dyn PaymentValidator>>,
}

impl std::fmt::Debug for PaymentVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentVerifier")
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl PaymentVerifier {
    pub fn new(ledger: Arc<dyn NonceLedger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            clock,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn PaymentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Verifies `authorization` and consumes its nonce.
    pub async fn verify(
        &self,
        authorization: &PaymentAuthorization,
    ) -> Result<VerifiedPayment, VerificationError> {
        self.verify_inner(authorization, None).await
    }

    /// Like [`verify`](Self::verify), and also requires that the requirement was issued for
    /// `resource`, so a nonce bought for a cheap route does not unlock an expensive one.
    pub async fn verify_for_resource(
        &self,
        authorization: &PaymentAuthorization,
        resource: &str,
    ) -> Result<VerifiedPayment, VerificationError> {
        self.verify_inner(authorization, Some(resource)).await
    }

    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "x402.verify", skip_all, err, fields(nonce = %authorization.nonce, payer = %authorization.from))
    )]
    async fn verify_inner(
        &self,
        authorization: &PaymentAuthorization,
        resource: Option<&str>,
    ) -> Result<VerifiedPayment, VerificationError> {
        let nonce = authorization.nonce;
        let record = self
            .ledger
            .lookup(&nonce)
            .await?
            .ok_or(VerificationError::UnknownNonce)?;
        if record.is_used() {
            #[cfg(feature = "telemetry")]
            tracing::warn!(%nonce, payer = %authorization.from, "Replay of a used payment nonce");
            return Err(VerificationError::AlreadyUsed);
        }
        let requirement = record.requirement;

        let now = self.clock.now();
        if requirement.is_expired_at(now) || now > authorization.valid_before {
            return Err(VerificationError::Expired);
        }
        if now < authorization.valid_after {
            return Err(VerificationError::NotYetValid);
        }

        check_terms(authorization, &requirement, resource)?;

        let signer = recover_address(authorization, &requirement.extra)
            .map_err(|e| VerificationError::InvalidSignature(e.to_string()))?;
        if signer != authorization.from {
            return Err(VerificationError::InvalidSignature(format!(
                "signed by {signer}, not by {}",
                authorization.from
            )));
        }

        let value: U256 = authorization.value.into();
        check_amount(value, &requirement)?;

        if let Some(validator) = &self.validator {
            validator
                .validate(authorization, &requirement)
                .await
                .map_err(VerificationError::CustomValidationFailed)?;
        }

        if !self.ledger.compare_and_set_used(&nonce, now).await? {
            #[cfg(feature = "telemetry")]
            tracing::warn!(%nonce, payer = %authorization.from, "Lost race for a payment nonce");
            return Err(VerificationError::AlreadyUsed);
        }

        let amount = MoneyAmount::from_token_units(value, requirement.extra.decimals.into())?;
        Ok(VerifiedPayment {
            payer: authorization.from,
            value: authorization.value,
            amount,
            token: requirement.token,
            chain_id: requirement.chain_id,
            nonce,
            scheme: requirement.scheme,
            resource: requirement.resource,
            verified_at: now,
        })
    }
}

fn check_terms(
    authorization: &PaymentAuthorization,
    requirement: &PaymentRequirement,
    resource: Option<&str>,
) -> Result<(), VerificationError> {
    if authorization.to != requirement.recipient {
        return Err(VerificationError::RecipientMismatch {
            expected: requirement.recipient,
            received: authorization.to,
        });
    }
    if authorization.token != requirement.token {
        return Err(VerificationError::TokenMismatch {
            expected: requirement.token,
            received: authorization.token,
        });
    }
    if authorization.chain_id != requirement.chain_id {
        return Err(VerificationError::ChainMismatch {
            expected: requirement.chain_id,
            received: authorization.chain_id,
        });
    }
    if let Some(resource) = resource
        && requirement.resource.as_deref() != Some(resource)
    {
        return Err(VerificationError::ResourceMismatch {
            expected: requirement.resource.clone(),
            received: Some(resource.to_string()),
        });
    }
    Ok(())
}

fn check_amount(value: U256, requirement: &PaymentRequirement) -> Result<(), VerificationError> {
    let max = requirement.max_value()?;
    match requirement.scheme {
        Scheme::Exact if value != max => Err(VerificationError::AmountMismatch {
            expected: max,
            received: value,
        }),
        Scheme::Exact => Ok(()),
        Scheme::Upto => {
            if value > max {
                return Err(VerificationError::AmountTooLarge {
                    expected: max,
                    received: value,
                });
            }
            let min = requirement.min_value()?.unwrap_or(U256::ZERO);
            if value < min || value.is_zero() {
                return Err(VerificationError::InsufficientAmount {
                    expected: min,
                    received: value,
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryNonceLedger;
    use crate::price::{AcceptedToken, PriceTag};
    use crate::requirement::RequirementBuilder;
    use alloy_primitives::{Bytes, address};
    use alloy_signer_local::PrivateKeySigner;
    use x402_chain_eip155::sign_typed_data;
    use x402_types::proto::TokenExtra;
    use x402_types::timestamp::ManualClock;

    const RECIPIENT: Address = address!("0x742d35Cc6634C0532925a3b844Bc9e7595f6E123");
    const USDC: Address = address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
    const START: u64 = 1_704_067_200;

    struct Fixture {
        clock: ManualClock,
        builder: RequirementBuilder,
        verifier: PaymentVerifier,
        signer: PrivateKeySigner,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(START);
        let ledger: Arc<dyn NonceLedger> = Arc::new(InMemoryNonceLedger::new(64));
        let builder = RequirementBuilder::new(
            RECIPIENT,
            8453,
            vec![AcceptedToken::new(USDC, TokenExtra::default())],
            ledger.clone(),
            Arc::new(clock.clone()),
        );
        let verifier = PaymentVerifier::new(ledger, Arc::new(clock.clone()));
        Fixture {
            clock,
            builder,
            verifier,
            signer: PrivateKeySigner::random(),
        }
    }

    impl Fixture {
        async fn pay(&self, tag: &PriceTag, value: u64) -> PaymentAuthorization {
            let requirement = self.builder.build(tag, Some("/api/data")).await.unwrap();
            sign_typed_data(&self.signer, &requirement, U256::from(value))
                .await
                .unwrap()
        }
    }

    fn ten_cents() -> PriceTag {
        "$0.10".parse().unwrap()
    }

    #[tokio::test]
    async fn test_valid_payment_is_accepted_once() {
        let f = fixture();
        let authorization = f.pay(&ten_cents(), 100_000).await;

        let payment = f.verifier.verify(&authorization).await.unwrap();
        assert_eq!(payment.payer, f.signer.address());
        assert_eq!(payment.value, TokenAmount::from(100_000u64));
        assert_eq!(payment.amount, MoneyAmount::parse("0.1").unwrap());
        assert_eq!(payment.resource.as_deref(), Some("/api/data"));
        assert_eq!(payment.receipt().nonce, authorization.nonce);

        let replay = f.verifier.verify(&authorization).await.unwrap_err();
        assert!(matches!(replay, VerificationError::AlreadyUsed));
        assert_eq!(replay.code(), "NONCE_ALREADY_USED");
    }

    #[tokio::test]
    async fn test_unknown_nonce() {
        let f = fixture();
        let mut authorization = f.pay(&ten_cents(), 100_000).await;
        authorization.nonce = PaymentNonce::random();
        assert!(matches!(
            f.verifier.verify(&authorization).await,
            Err(VerificationError::UnknownNonce)
        ));
    }

    #[tokio::test]
    async fn test_expired_after_ttl() {
        let f = fixture();
        let authorization = f.pay(&ten_cents(), 100_000).await;
        f.clock.advance(301);
        let err = f.verifier.verify(&authorization).await.unwrap_err();
        assert!(matches!(err, VerificationError::Expired));
        assert_eq!(err.code(), "PAYMENT_EXPIRED");
    }

    #[tokio::test]
    async fn test_still_valid_at_ttl() {
        let f = fixture();
        let authorization = f.pay(&ten_cents(), 100_000).await;
        f.clock.advance(300);
        assert!(f.verifier.verify(&authorization).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_amount_reports_both_values() {
        let f = fixture();
        let authorization = f.pay(&ten_cents(), 99_999).await;
        let err = f.verifier.verify(&authorization).await.unwrap_err();
        assert!(matches!(
            err,
            VerificationError::AmountMismatch { expected, received }
                if expected == U256::from(100_000u64) && received == U256::from(99_999u64)
        ));
        let problem = err.to_problem();
        assert_eq!(problem.code, "AMOUNT_MISMATCH");
        assert_eq!(problem.expected.as_deref(), Some("100000"));
        assert_eq!(problem.received.as_deref(), Some("99999"));
    }

    #[tokio::test]
    async fn test_failed_verification_leaves_nonce_pending() {
        let f = fixture();
        let requirement = f.builder.build(&ten_cents(), None).await.unwrap();
        let short = sign_typed_data(&f.signer, &requirement, U256::from(1u64))
            .await
            .unwrap();
        assert!(f.verifier.verify(&short).await.is_err());
        let right = sign_typed_data(&f.signer, &requirement, U256::from(100_000u64))
            .await
            .unwrap();
        assert!(f.verifier.verify(&right).await.is_ok());
    }

    #[tokio::test]
    async fn test_upto_bounds() {
        let f = fixture();
        let tag = PriceTag::upto("1".parse().unwrap()).with_min_amount("0.25".parse().unwrap());

        let ok = f.pay(&tag, 500_000).await;
        assert!(f.verifier.verify(&ok).await.is_ok());

        let low = f.pay(&tag, 200_000).await;
        assert!(matches!(
            f.verifier.verify(&low).await,
            Err(VerificationError::InsufficientAmount { .. })
        ));

        let high = f.pay(&tag, 1_000_001).await;
        assert!(matches!(
            f.verifier.verify(&high).await,
            Err(VerificationError::AmountTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_tampered_value_fails_signature() {
        let f = fixture();
        let mut authorization = f.pay(&ten_cents(), 50_000).await;
        authorization.value = TokenAmount::from(100_000u64);
        assert!(matches!(
            f.verifier.verify(&authorization).await,
            Err(VerificationError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_signature() {
        let f = fixture();
        let mut authorization = f.pay(&ten_cents(), 100_000).await;
        authorization.signature = Bytes::from_static(&[1, 2, 3]);
        assert!(matches!(
            f.verifier.verify(&authorization).await,
            Err(VerificationError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_redirected_payment_is_rejected() {
        let f = fixture();
        let requirement = f.builder.build(&ten_cents(), None).await.unwrap();
        let mut elsewhere = requirement.clone();
        elsewhere.recipient = address!("0x000000000000000000000000000000000000dEaD");
        let authorization = sign_typed_data(&f.signer, &elsewhere, U256::from(100_000u64))
            .await
            .unwrap();
        assert!(matches!(
            f.verifier.verify(&authorization).await,
            Err(VerificationError::RecipientMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_resource_binding() {
        let f = fixture();
        let authorization = f.pay(&ten_cents(), 100_000).await;
        assert!(matches!(
            f.verifier
                .verify_for_resource(&authorization, "/api/other")
                .await,
            Err(VerificationError::ResourceMismatch { .. })
        ));
        assert!(
            f.verifier
                .verify_for_resource(&authorization, "/api/data")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_not_yet_valid() {
        let f = fixture();
        let requirement = f.builder.build(&ten_cents(), None).await.unwrap();
        let mut authorization = sign_typed_data(&f.signer, &requirement, U256::from(100_000u64))
            .await
            .unwrap();
        authorization.valid_after = UnixTimestamp::from_secs(START + 60);
        assert!(matches!(
            f.verifier.verify(&authorization).await,
            Err(VerificationError::NotYetValid)
        ));
    }

    struct RejectPayer(Address);

    #[async_trait]
    impl PaymentValidator for RejectPayer {
        async fn validate(
            &self,
            authorization: &PaymentAuthorization,
            _requirement: &PaymentRequirement,
        ) -> Result<(), String> {
            if authorization.from == self.0 {
                Err("payer is blocked".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_custom_validator_runs_before_consumption() {
        let f = fixture();
        let blocked = f.signer.address();
        let verifier = f
            .verifier
            .clone()
            .with_validator(Arc::new(RejectPayer(blocked)));
        let authorization = f.pay(&ten_cents(), 100_000).await;
        let err = verifier.verify(&authorization).await.unwrap_err();
        assert_eq!(err.code(), "CUSTOM_VALIDATION_FAILED");
        // The nonce was not consumed by the rejected attempt.
        assert!(f.verifier.verify(&authorization).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_have_one_winner() {
        let f = fixture();
        let authorization = f.pay(&ten_cents(), 100_000).await;
        let verifier = f.verifier.clone();
        let handles = (0..16)
            .map(|_| {
                let verifier = verifier.clone();
                let authorization = authorization.clone();
                tokio::spawn(async move { verifier.verify(&authorization).await })
            })
            .collect::<Vec<_>>();
        let mut accepted = 0;
        let mut replays = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(VerificationError::AlreadyUsed) => replays += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(replays, 15);
    }
}
