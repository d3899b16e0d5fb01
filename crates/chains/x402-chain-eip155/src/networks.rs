//! Well-known EVM networks and their USDC deployments.
//!
//! A provider that only names a chain id gets USDC on that chain as its accepted
//! token, with the EIP-712 domain the deployed contract actually uses. Agents use
//! [`is_known_chain`] to refuse requirements on chains they know nothing about.

use alloy_primitives::{Address, address};
use x402_types::proto::TokenExtra;

/// A token contract deployed on a specific chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip155TokenDeployment {
    pub chain_id: u64,
    pub address: Address,
    pub decimals: u8,
    /// EIP-712 domain `name`.
    pub name: &'static str,
    /// EIP-712 domain `version`.
    pub version: &'static str,
}

impl Eip155TokenDeployment {
    pub fn extra(&self) -> TokenExtra {
        TokenExtra {
            name: self.name.to_string(),
            version: self.version.to_string(),
            decimals: self.decimals,
        }
    }
}

/// An EVM network identified by its EIP-155 chain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip155Network {
    pub chain_id: u64,
    pub name: &'static str,
    pub usdc: Eip155TokenDeployment,
}

const fn usdc(chain_id: u64, address: Address, name: &'static str) -> Eip155TokenDeployment {
    Eip155TokenDeployment {
        chain_id,
        address,
        decimals: 6,
        name,
        version: "2",
    }
}

pub const ETHEREUM: Eip155Network = Eip155Network {
    chain_id: 1,
    name: "ethereum",
    usdc: usdc(
        1,
        address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        "USD Coin",
    ),
};

pub const BASE: Eip155Network = Eip155Network {
    chain_id: 8453,
    name: "base",
    usdc: usdc(
        8453,
        address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        "USD Coin",
    ),
};

pub const BASE_SEPOLIA: Eip155Network = Eip155Network {
    chain_id: 84532,
    name: "base-sepolia",
    usdc: usdc(
        84532,
        address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        "USDC",
    ),
};

pub const POLYGON: Eip155Network = Eip155Network {
    chain_id: 137,
    name: "polygon",
    usdc: usdc(
        137,
        address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        "USDC",
    ),
};

pub const ARBITRUM: Eip155Network = Eip155Network {
    chain_id: 42161,
    name: "arbitrum",
    usdc: usdc(
        42161,
        address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
        "USD Coin",
    ),
};

pub const OPTIMISM: Eip155Network = Eip155Network {
    chain_id: 10,
    name: "optimism",
    usdc: usdc(
        10,
        address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
        "USD Coin",
    ),
};

pub static KNOWN_NETWORKS: [Eip155Network; 6] =
    [ETHEREUM, BASE, BASE_SEPOLIA, POLYGON, ARBITRUM, OPTIMISM];

pub fn network_by_chain_id(chain_id: u64) -> Option<&'static Eip155Network> {
    KNOWN_NETWORKS.iter().find(|n| n.chain_id == chain_id)
}

pub fn network_by_name(name: &str) -> Option<&'static Eip155Network> {
    KNOWN_NETWORKS.iter().find(|n| n.name == name)
}

pub fn is_known_chain(chain_id: u64) -> bool {
    network_by_chain_id(chain_id).is_some()
}

/// USDC on `chain_id`, if the chain is known.
pub fn usdc_on(chain_id: u64) -> Option<&'static Eip155TokenDeployment> {
    network_by_chain_id(chain_id).map(|n| &n.usdc)
}
