//! EVM support for x402 payments.
//!
//! Payments are ERC-3009 `transferWithAuthorization` messages signed as EIP-712 typed
//! data. This crate owns that typing and both ends of the cryptography:
//!
//! - [`sign_typed_data`] turns a [`PaymentRequirement`](x402_types::proto::PaymentRequirement)
//!   into a signed [`PaymentAuthorization`](x402_types::proto::PaymentAuthorization).
//! - [`recover_address`] recovers the signer of an authorization so a provider can compare
//!   it with the claimed payer.
//! - [`networks`] lists the EVM chains and USDC deployments known out of the box.
//!
//! Nothing here talks to a node: authorizations are verified off-chain and settlement
//! is left to the operator.
//!
//! # Feature Flags
//!
//! - `telemetry` - tracing instrumentation of signing

pub mod networks;
mod recover;
mod signer;
mod types;

pub use networks::*;
pub use recover::*;
pub use signer::*;
pub use types::*;
