use alloy_primitives::{Address, B256, Bytes, Signature, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::Arc;
use x402_types::proto::{PaymentAuthorization, PaymentRequirement};
use x402_types::timestamp::UnixTimestamp;

use crate::types::authorization_digest;

/// A trait that abstracts signing operations, allowing both owned signers and Arc-wrapped signers.
///
/// Alloy's `Signer` is not implemented for `Arc<T>`, while `PrivateKeySigner` is not
/// `Clone`, so agents that share one key between several clients wrap it in an `Arc`.
///
/// ```ignore
/// use std::sync::Arc;
/// use alloy_signer_local::PrivateKeySigner;
///
/// let signer = Arc::new(PrivateKeySigner::random());
/// // `signer` can now be used anywhere `SignerLike` is expected
/// ```
#[async_trait]
pub trait SignerLike {
    /// Returns the address of the signer.
    fn address(&self) -> Address;

    /// Signs the given hash.
    async fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error>;
}

#[async_trait]
impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        PrivateKeySigner::address(self)
    }

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

#[async_trait]
impl<T: SignerLike + Send + Sync> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to sign payment authorization: {0}")]
pub struct SigningError(#[from] pub alloy_signer::Error);

/// Signs an ERC-3009 authorization paying `value` base units under `requirement`.
///
/// The authorization mirrors the requirement: `to` is the recipient, the nonce is the
/// requirement's nonce and `validBefore` is its `expiresAt`. `validAfter` is `0`, so the
/// authorization is usable as soon as it is produced.
#[cfg_attr(
    feature = "telemetry",
    tracing::instrument(skip_all, err, fields(nonce = %requirement.nonce, chain_id = requirement.chain_id))
)]
pub async fn sign_typed_data<S: SignerLike + Sync>(
    signer: &S,
    requirement: &PaymentRequirement,
    value: U256,
) -> Result<PaymentAuthorization, SigningError> {
    let mut authorization = PaymentAuthorization {
        from: signer.address(),
        to: requirement.recipient,
        value: value.into(),
        valid_after: UnixTimestamp::from_secs(0),
        valid_before: requirement.expires_at,
        nonce: requirement.nonce,
        token: requirement.token,
        chain_id: requirement.chain_id,
        signature: Bytes::new(),
    };
    let digest = authorization_digest(&authorization, &requirement.extra);
    let signature = signer.sign_hash(&digest).await?;
    authorization.signature = Bytes::copy_from_slice(&signature.as_bytes());
    Ok(authorization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recover_address;
    use alloy_primitives::address;
    use x402_types::proto::{PaymentNonce, Scheme, TokenExtra};
    use x402_types::util::{MoneyAmount, TokenAmount};

    fn requirement() -> PaymentRequirement {
        PaymentRequirement {
            amount: MoneyAmount::parse("$0.10").unwrap(),
            token: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            recipient: address!("0x742d35Cc6634C0532925a3b844Bc9e7595f6E123"),
            chain_id: 8453,
            nonce: PaymentNonce::random(),
            expires_at: UnixTimestamp::from_secs(1_704_067_200),
            scheme: Scheme::Exact,
            min_amount: None,
            resource: Some("/api/data".into()),
            description: None,
            extra: TokenExtra::default(),
        }
    }

    #[tokio::test]
    async fn test_sign_mirrors_requirement() {
        let signer = PrivateKeySigner::random();
        let requirement = requirement();
        let value = requirement.max_value().unwrap();
        let authorization = sign_typed_data(&signer, &requirement, value)
            .await
            .unwrap();

        assert_eq!(authorization.from, signer.address());
        assert_eq!(authorization.to, requirement.recipient);
        assert_eq!(authorization.value, TokenAmount::from(100_000u64));
        assert_eq!(authorization.nonce, requirement.nonce);
        assert_eq!(authorization.valid_before, requirement.expires_at);
        assert_eq!(authorization.signature.len(), 65);
    }

    #[tokio::test]
    async fn test_shared_signer_recovers_to_same_address() {
        let signer = Arc::new(PrivateKeySigner::random());
        let requirement = requirement();
        let authorization = sign_typed_data(&signer, &requirement, U256::from(100_000u64))
            .await
            .unwrap();
        let recovered = recover_address(&authorization, &requirement.extra).unwrap();
        assert_eq!(recovered, signer.address());
    }
}
