//! Axum middleware and helpers for selling HTTP routes for [x402](https://www.x402.org) payments.
//!
//! The provider never talks to a chain. It issues a [`PaymentRequirement`] with a random
//! nonce for every unpaid request, remembers it in a [`NonceLedger`], and later accepts
//! exactly one signed ERC-3009 authorization for that nonce. Settlement of the
//! authorization on-chain is up to the operator.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use alloy_primitives::address;
//! use axum::{Extension, Json, Router, routing::get};
//! use serde_json::{Value, json};
//! use x402_axum::{VerifiedPayment, X402Middleware};
//!
//! let x402 = X402Middleware::new(address!("0x742d35Cc6634C0532925a3b844Bc9e7595f6E123"), 84532);
//!
//! let app: Router = Router::new().route(
//!     "/paywall",
//!     get(my_handler).layer(x402.with_price_tag("$0.025".parse().unwrap()).unwrap()),
//! );
//!
//! async fn my_handler(Extension(payment): Extension<VerifiedPayment>) -> Json<Value> {
//!     Json(json!({ "hello": "world", "paidBy": payment.payer }))
//! }
//! ```
//! See [`X402Middleware`] for full configuration options.
//!
//! ## Modules
//!
//! - [`price`] - price tags and accepted tokens
//! - [`requirement`] - issuing requirements
//! - [`ledger`] - nonce bookkeeping and replay protection
//! - [`verifier`] - signature, expiry and amount checks
//! - [`paygate`] - the request interceptor and route table
//! - [`layer`] - the tower layer and its builder
//!
//! [`PaymentRequirement`]: x402_types::proto::PaymentRequirement

pub mod layer;
pub mod ledger;
pub mod paygate;
pub mod price;
pub mod requirement;
pub mod verifier;

pub use layer::{X402Layer, X402Middleware, X402MiddlewareService};
pub use ledger::{InMemoryNonceLedger, LedgerError, NonceLedger, NonceRecord, NonceState};
pub use paygate::{Interception, Paygate, PaymentInterceptor, PaymentObserver, RouteTable};
pub use price::{AcceptedToken, PriceTag, PriceTagError};
pub use requirement::{RequirementBuilder, RequirementError};
pub use verifier::{PaymentValidator, PaymentVerifier, VerificationError, VerifiedPayment};
