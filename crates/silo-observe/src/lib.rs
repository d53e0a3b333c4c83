//! # Silo Observe - Observability Layer
//!
//! Structured logging initialization shared by the CLI and embedders.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Initialize logging with defaults (pretty in debug builds, JSON in
/// release builds, `RUST_LOG`-driven filtering).
pub fn init() -> anyhow::Result<()> {
    init_logging(LogConfig::default())
}
