//! Utility types and functions for x402.
//!
//! - [`b64`] - Base64 encoding/decoding and the JSON header codec
//! - [`money_amount`] - Human-readable prices and on-chain token amounts

pub mod b64;
pub mod money_amount;

pub use b64::*;
pub use money_amount::*;
