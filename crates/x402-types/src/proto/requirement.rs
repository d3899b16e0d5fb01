use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::proto::{PaymentNonce, Scheme};
use crate::timestamp::UnixTimestamp;
use crate::util::{MoneyAmount, MoneyAmountParseError};

/// Token metadata a payer needs to build the EIP-712 domain and convert prices.
///
/// `name` and `version` are the token contract's EIP-712 domain fields; they differ
/// between deployments (USDC is `"USD Coin"` on Base mainnet and `"USDC"` on Base
/// Sepolia), so the provider states them instead of letting clients guess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenExtra {
    pub name: String,
    pub version: String,
    pub decimals: u8,
}

impl Default for TokenExtra {
    fn default() -> Self {
        Self {
            name: "USD Coin".to_string(),
            version: "2".to_string(),
            decimals: 6,
        }
    }
}

/// Payment terms returned as the JSON body of a `402 Payment Required` response.
///
/// ```json
/// {
///   "amount": "0.10",
///   "token": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
///   "recipient": "0x742d35Cc6634C0532925a3b844Bc9e7595f6E123",
///   "chainId": 8453,
///   "nonce": "0x9b1f...",
///   "expiresAt": 1704067200,
///   "scheme": "exact",
///   "extra": { "name": "USD Coin", "version": "2", "decimals": 6 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Price for `exact`, ceiling for `upto`.
    pub amount: MoneyAmount,
    pub token: Address,
    pub recipient: Address,
    pub chain_id: u64,
    pub nonce: PaymentNonce,
    pub expires_at: UnixTimestamp,
    #[serde(default)]
    pub scheme: Scheme,
    /// Lower bound for `upto`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<MoneyAmount>,
    /// Path of the priced resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub extra: TokenExtra,
}

impl PaymentRequirement {
    /// `amount` in token base units.
    pub fn max_value(&self) -> Result<U256, MoneyAmountParseError> {
        self.amount.to_token_units(self.extra.decimals.into())
    }

    /// `minAmount` in token base units, if any.
    pub fn min_value(&self) -> Result<Option<U256>, MoneyAmountParseError> {
        self.min_amount
            .map(|min| min.to_token_units(self.extra.decimals.into()))
            .transpose()
    }

    pub fn is_expired_at(&self, now: UnixTimestamp) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use serde_json::json;

    #[test]
    fn test_requirement_wire_format() {
        let json = json!({
            "amount": "0.10",
            "token": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "recipient": "0x742d35cc6634c0532925a3b844bc9e7595f6e123",
            "chainId": 8453,
            "nonce": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "expiresAt": 1704067200
        });
        let requirement: PaymentRequirement = serde_json::from_value(json).unwrap();
        assert_eq!(requirement.scheme, Scheme::Exact);
        assert_eq!(requirement.extra, TokenExtra::default());
        assert_eq!(
            requirement.recipient,
            address!("0x742d35Cc6634C0532925a3b844Bc9e7595f6E123")
        );
        assert_eq!(requirement.max_value().unwrap(), U256::from(100_000u64));
        assert_eq!(requirement.min_value().unwrap(), None);

        let back = serde_json::to_value(&requirement).unwrap();
        assert_eq!(back["chainId"], 8453);
        assert_eq!(back["expiresAt"], 1704067200);
        assert_eq!(back["amount"], "0.10");
        assert!(back.get("minAmount").is_none());
    }

    #[test]
    fn test_expiry_boundary() {
        let requirement = PaymentRequirement {
            amount: MoneyAmount::parse("1").unwrap(),
            token: Address::ZERO,
            recipient: Address::ZERO,
            chain_id: 1,
            nonce: PaymentNonce::random(),
            expires_at: UnixTimestamp::from_secs(100),
            scheme: Scheme::Upto,
            min_amount: Some(MoneyAmount::parse("0.5").unwrap()),
            resource: None,
            description: None,
            extra: TokenExtra::default(),
        };
        assert!(!requirement.is_expired_at(UnixTimestamp::from_secs(100)));
        assert!(requirement.is_expired_at(UnixTimestamp::from_secs(101)));
        assert_eq!(
            requirement.min_value().unwrap(),
            Some(U256::from(500_000u64))
        );
    }
}
