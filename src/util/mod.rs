//! Process plumbing for the paywall binary.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`sig_down`] | Graceful shutdown signal handling |
//! | [`telemetry`] | Logging, OpenTelemetry export and HTTP access spans |

pub mod sig_down;
pub mod telemetry;

pub use sig_down::*;
pub use telemetry::*;
