//! strato-core — domain types shared across the Strato crates.
//!
//! Holds the app/deploy/metric model, the `strato.toml` config parser,
//! and the runtime output envelope.

pub mod config;
pub mod envelope;
pub mod types;

pub use config::Config;
pub use types::*;
