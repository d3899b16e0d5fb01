use alloy_primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

use crate::proto::PaymentNonce;
use crate::timestamp::UnixTimestamp;
use crate::util::TokenAmount;

/// A signed ERC-3009 `transferWithAuthorization`, sent in the `X-Payment` header.
///
/// `value` is in token base units. `validBefore` is the requirement's `expiresAt`
/// and `validAfter` defaults to `0` when a client leaves it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: TokenAmount,
    #[serde(default)]
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: PaymentNonce,
    pub token: Address,
    pub chain_id: u64,
    /// 65-byte `r || s || v` or 64-byte EIP-2098 compact signature.
    pub signature: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authorization_defaults_valid_after() {
        let json = json!({
            "from": "0x0000000000000000000000000000000000000001",
            "to": "0x0000000000000000000000000000000000000002",
            "value": "100000",
            "validBefore": 1704067200,
            "nonce": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "token": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "chainId": 8453,
            "signature": "0xdeadbeef"
        });
        let auth: PaymentAuthorization = serde_json::from_value(json).unwrap();
        assert_eq!(auth.valid_after, UnixTimestamp::from_secs(0));
        assert_eq!(auth.value, TokenAmount::from(100_000u64));
        assert_eq!(auth.signature.len(), 4);

        let back = serde_json::to_value(&auth).unwrap();
        assert_eq!(back["validAfter"], 0);
        assert_eq!(back["value"], "100000");
    }

    #[test]
    fn test_authorization_missing_signature_is_rejected() {
        let json = json!({
            "from": "0x0000000000000000000000000000000000000001",
            "to": "0x0000000000000000000000000000000000000002",
            "value": "1",
            "validBefore": 1,
            "nonce": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "token": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "chainId": 8453
        });
        assert!(serde_json::from_value::<PaymentAuthorization>(json).is_err());
    }
}
