#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Reqwest middleware that lets an agent pay for [x402](https://www.x402.org) resources.
//!
//! [`X402Client`] plugs into `reqwest-middleware`. When a request comes back with
//! `402 Payment Required`, it reads the provider's requirement, checks it against the
//! caller's limits, signs an ERC-3009 authorization and retries the request once with
//! the `X-Payment` header.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use alloy_signer_local::PrivateKeySigner;
//! use reqwest::Client;
//! use x402_reqwest::{MaxPayment, ReqwestWithPayments, ReqwestWithPaymentsBuild, X402Client};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let signer: PrivateKeySigner = std::env::var("AGENT_PRIVATE_KEY")?.parse()?;
//! let x402 = X402Client::new(signer)
//!     .with_max_amount("0.50".parse()?)
//!     .allow_domains(["api.example.com"]);
//!
//! let http = Client::new().with_payments(x402).build();
//!
//! let response = http
//!     .get("https://api.example.com/protected")
//!     .with_extension(MaxPayment("0.10".parse()?))
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Limits
//!
//! Every payment must clear, in order:
//!
//! - the domain policy ([`X402Client::allow_domains`], [`X402Client::block_domains`]),
//!   checked before the first request is sent;
//! - the chain policy ([`X402Client::with_allowed_chains`]);
//! - the ceiling for the request ([`MaxPayment`] or [`X402Client::with_max_amount`]);
//! - the [`SpendingGuard`] (per request, rolling hour, rolling day);
//! - the [`PaymentApproval`] hook.
//!
//! Failures surface as [`X402ClientError`] inside `reqwest_middleware::Error::Middleware`.

mod builder;
mod client;
pub mod domains;
pub mod guard;

pub use builder::*;
pub use client::*;
pub use domains::{DomainError, DomainPattern, DomainPolicy};
pub use guard::{Reservation, SpendingGuard, SpendingLimitError, SpendingLimits, SpendingStatus};
