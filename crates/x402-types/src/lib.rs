#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the x402 payment handshake.
//!
//! The x402 flow reuses HTTP `402 Payment Required`: a provider answers an unpaid
//! request with a [`PaymentRequirement`](proto::PaymentRequirement), the payer signs an
//! ERC-3009 `TransferWithAuthorization` over those terms (EIP-712 typed data) and retries
//! with the resulting [`PaymentAuthorization`](proto::PaymentAuthorization) in the
//! `X-Payment` header.
//!
//! This crate is chain-agnostic glue shared by the provider middleware (`x402-axum`) and
//! the agent middleware (`x402-reqwest`). Signing and recovery live in `x402-chain-eip155`.
//!
//! # Modules
//!
//! - [`config`] - Configuration helpers, including environment variable resolution
//! - [`proto`] - Wire format for requirements, authorizations, receipts and problems
//! - [`timestamp`] - Unix timestamps and injectable clocks
//! - [`util`] - Base64 header codec and money amounts

pub mod config;
pub mod proto;
pub mod timestamp;
pub mod util;
