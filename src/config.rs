//! Configuration for the x402 paywall server.
//!
//! The server reads one JSON file:
//!
//! ```json
//! {
//!   "port": 8080,
//!   "recipient": "$PAYWALL_RECIPIENT",
//!   "chainId": 8453,
//!   "requirementTtlSeconds": 300,
//!   "ledgerCapacity": 100000,
//!   "routes": {
//!     "/api/weather": "$0.01",
//!     "/api/premium/*": {
//!       "amount": "1.00",
//!       "scheme": "upto",
//!       "minAmount": "0.10",
//!       "description": "Metered premium data"
//!     }
//!   }
//! }
//! ```
//!
//! Unknown keys are rejected. Prices and tokens are checked while loading, so a bad
//! file stops the server at startup.

use alloy_primitives::Address;
use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use x402_axum::{
    AcceptedToken, InMemoryNonceLedger, PriceTag, PriceTagError, RouteTable, X402Middleware,
};
use x402_chain_eip155::is_known_chain;
use x402_types::config::LiteralOrEnv;
use x402_types::proto::{Scheme, TokenExtra};
use x402_types::util::MoneyAmount;

/// CLI arguments for the x402 paywall server.
#[derive(Parser, Debug)]
#[command(name = "x402-paywall")]
#[command(about = "HTTP server selling API calls for x402 payments")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// `host` and `port` fall back to the `HOST` and `PORT` environment variables, then to
/// hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    recipient: LiteralOrEnv<Address>,
    #[serde(default = "config_defaults::default_chain_id")]
    chain_id: u64,
    #[serde(default)]
    accepted_tokens: Vec<TokenConfig>,
    #[serde(default = "config_defaults::default_requirement_ttl_seconds")]
    requirement_ttl_seconds: u64,
    #[serde(default = "config_defaults::default_ledger_capacity")]
    ledger_capacity: usize,
    #[serde(default)]
    routes: BTreeMap<String, RouteConfig>,
}

/// An ERC-3009 token the server accepts besides (or instead of) the chain's USDC.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TokenConfig {
    pub address: LiteralOrEnv<Address>,
    /// EIP-712 domain name of the token contract.
    pub name: String,
    #[serde(default = "config_defaults::default_token_version")]
    pub version: String,
    #[serde(default = "config_defaults::default_token_decimals")]
    pub decimals: u8,
}

impl From<&TokenConfig> for AcceptedToken {
    fn from(token: &TokenConfig) -> Self {
        AcceptedToken::new(
            *token.address,
            TokenExtra {
                name: token.name.clone(),
                version: token.version.clone(),
                decimals: token.decimals,
            },
        )
    }
}

/// Price of one route: either a bare amount (`"$0.10"`) or the detailed form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RouteConfig {
    Amount(MoneyAmount),
    Detailed(RoutePrice),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoutePrice {
    pub amount: MoneyAmount,
    #[serde(default)]
    pub token: Option<Address>,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default)]
    pub min_amount: Option<MoneyAmount>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RouteConfig {
    pub fn price_tag(&self) -> PriceTag {
        match self {
            RouteConfig::Amount(amount) => PriceTag::exact(*amount),
            RouteConfig::Detailed(price) => {
                let mut tag = match price.scheme {
                    Scheme::Exact => PriceTag::exact(price.amount),
                    Scheme::Upto => PriceTag::upto(price.amount),
                };
                tag.min_amount = price.min_amount;
                tag.token = price.token;
                tag.description = price.description.clone();
                tag
            }
        }
    }
}

mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    /// Base mainnet.
    pub fn default_chain_id() -> u64 {
        8453
    }

    pub fn default_requirement_ttl_seconds() -> u64 {
        300
    }

    pub fn default_ledger_capacity() -> usize {
        x402_axum::ledger::DEFAULT_LEDGER_CAPACITY
    }

    pub fn default_token_version() -> String {
        "2".to_string()
    }

    pub fn default_token_decimals() -> u8 {
        6
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Chain {0} has no known USDC deployment; list acceptedTokens explicitly")]
    UnknownChain(u64),
    #[error("requirementTtlSeconds must be positive")]
    ZeroTtl,
    #[error("ledgerCapacity must be positive")]
    ZeroLedgerCapacity,
    #[error("Invalid price for route {route}: {source}")]
    InvalidRoute {
        route: String,
        #[source]
        source: PriceTagError,
    },
}

impl Config {
    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by:
    /// 1. `--config <path>` CLI argument
    /// 2. `CONFIG` environment variable
    /// 3. `./config.json`
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    /// Parses and validates a configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.accepted_tokens.is_empty() && !is_known_chain(self.chain_id) {
            return Err(ConfigError::UnknownChain(self.chain_id));
        }
        if self.requirement_ttl_seconds == 0 {
            return Err(ConfigError::ZeroTtl);
        }
        if self.ledger_capacity == 0 {
            return Err(ConfigError::ZeroLedgerCapacity);
        }
        let x402 = self.middleware();
        for (route, price) in &self.routes {
            x402.with_routes(RouteTable::new().with_route(route.as_str(), price.price_tag()))
                .map_err(|source| ConfigError::InvalidRoute {
                    route: route.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn recipient(&self) -> Address {
        *self.recipient
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn routes(&self) -> &BTreeMap<String, RouteConfig> {
        &self.routes
    }

    /// The payment middleware described by this configuration, with its own ledger.
    pub fn middleware(&self) -> X402Middleware {
        let mut x402 = X402Middleware::new(self.recipient(), self.chain_id)
            .with_ttl(Duration::from_secs(self.requirement_ttl_seconds))
            .with_ledger(Arc::new(InMemoryNonceLedger::new(self.ledger_capacity)));
        for token in &self.accepted_tokens {
            x402 = x402.with_accepted_token(token.into());
        }
        x402
    }

    pub fn route_table(&self) -> RouteTable {
        self.routes
            .iter()
            .fold(RouteTable::new(), |table, (route, price)| {
                table.with_route(route.as_str(), price.price_tag())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f6E123";

    fn config(json: serde_json::Value) -> Result<Config, ConfigError> {
        Config::from_json(&json.to_string())
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = config(serde_json::json!({ "recipient": RECIPIENT })).unwrap();
        assert_eq!(config.chain_id(), 8453);
        assert_eq!(config.requirement_ttl_seconds, 300);
        assert_eq!(config.ledger_capacity, 100_000);
        assert!(config.routes().is_empty());
        assert_eq!(config.recipient(), RECIPIENT.parse::<Address>().unwrap());
    }

    #[test]
    fn test_route_forms() {
        let config = config(serde_json::json!({
            "recipient": RECIPIENT,
            "routes": {
                "/api/weather": "$0.01",
                "/api/premium/*": {
                    "amount": "1.00",
                    "scheme": "upto",
                    "minAmount": "0.10",
                    "description": "metered"
                }
            }
        }))
        .unwrap();

        let weather = config.routes()["/api/weather"].price_tag();
        assert_eq!(weather, PriceTag::exact("0.01".parse().unwrap()));

        let premium = config.routes()["/api/premium/*"].price_tag();
        assert_eq!(premium.scheme, Scheme::Upto);
        assert_eq!(premium.min_amount, Some("0.10".parse().unwrap()));
        assert_eq!(premium.description.as_deref(), Some("metered"));

        let table = config.route_table();
        assert!(table.match_path("/api/premium/report").is_some());
        assert!(table.match_path("/health").is_none());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = config(serde_json::json!({ "recipient": RECIPIENT, "prot": 80 })).unwrap_err();
        assert!(matches!(err, ConfigError::JsonParse(_)));
    }

    #[test]
    fn test_unknown_chain_needs_tokens() {
        let err = config(serde_json::json!({ "recipient": RECIPIENT, "chainId": 31337 }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownChain(31337)));

        let config = config(serde_json::json!({
            "recipient": RECIPIENT,
            "chainId": 31337,
            "acceptedTokens": [{
                "address": "0x5FbDB2315678afecb367f032d93F642f64180aa3",
                "name": "Test USD"
            }]
        }))
        .unwrap();
        let accepted = config.middleware().accepted_tokens().to_vec();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].extra.decimals, 6);
    }

    #[test]
    fn test_invalid_prices_fail_validation() {
        let err = config(serde_json::json!({
            "recipient": RECIPIENT,
            "routes": { "/api/dust": "0.0000001" }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoute { route, .. } if route == "/api/dust"));

        let err = config(serde_json::json!({
            "recipient": RECIPIENT,
            "routes": { "/api/x": { "amount": "1", "minAmount": "0.5" } }
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidRoute {
                source: PriceTagError::MinAmountOnExact,
                ..
            }
        ));
    }

    #[test]
    fn test_recipient_from_env() {
        unsafe { std::env::set_var("X402_PAYWALL_TEST_RECIPIENT", RECIPIENT) };
        let config = config(serde_json::json!({
            "recipient": "${X402_PAYWALL_TEST_RECIPIENT}"
        }))
        .unwrap();
        assert_eq!(config.recipient(), RECIPIENT.parse::<Address>().unwrap());
    }
}
