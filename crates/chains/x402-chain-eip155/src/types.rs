use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use serde::{Deserialize, Serialize};
use x402_types::proto::{PaymentAuthorization, TokenExtra};

sol!(
    /// ERC-3009 `TransferWithAuthorization` as it appears in EIP-712 typed data.
    ///
    /// Both the signing agent and the verifying provider rebuild this struct from a
    /// [`PaymentAuthorization`]; any field that differs yields a different digest and the
    /// recovered signer will not match.
    #[derive(Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

/// EIP-712 domain of the token contract at `token` on `chain_id`.
pub fn eip712_domain_for(extra: &TokenExtra, chain_id: u64, token: Address) -> Eip712Domain {
    eip712_domain! {
        name: extra.name.clone(),
        version: extra.version.clone(),
        chain_id: chain_id,
        verifying_contract: token,
    }
}

impl From<&PaymentAuthorization> for TransferWithAuthorization {
    fn from(authorization: &PaymentAuthorization) -> Self {
        TransferWithAuthorization {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value.into(),
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: authorization.nonce.0,
        }
    }
}

/// The EIP-712 signing hash of `authorization` under the token's domain.
pub fn authorization_digest(authorization: &PaymentAuthorization, extra: &TokenExtra) -> B256 {
    let domain = eip712_domain_for(extra, authorization.chain_id, authorization.token);
    TransferWithAuthorization::from(authorization).eip712_signing_hash(&domain)
}
