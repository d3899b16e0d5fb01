//! x402 paywall server.
//!
//! Sells HTTP API calls for [x402](https://www.x402.org) payments. Priced routes answer
//! unpaid requests with `402 Payment Required` and a fresh payment requirement; a retry
//! carrying a signed ERC-3009 authorization in `X-Payment` is verified locally and served
//! once.
//!
//! Endpoints:
//! - `GET /health` – liveness check
//! - `GET /pricing` – configured price list
//! - `GET|POST /api/{*path}` – sample resource, priced per the config
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` path to the JSON config (or `--config`)
//! - `HOST`, `PORT` control binding address
//! - `RUST_LOG` log filter, `OTEL_*` variables enable OpenTelemetry export

pub mod config;
pub mod handlers;
pub mod run;
pub mod util;

pub use run::run;
