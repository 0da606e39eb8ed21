//! aimi-import library interface
//!
//! Import deduplication engine: scans a download directory, resolves each new
//! file's metadata with an AI backend at most `max_attempts` times over the
//! lifetime of the store, and places tagged files in the music library.
//!
//! Exposes public APIs for the binaries and integration tests.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::ImportError;

use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies, raised to
/// `debug` for this crate when `debug` is true.
pub fn init_tracing(default_level: &str, debug: bool) {
    let fallback = if debug {
        format!("{},aimi_import=debug,aimi_common=debug", default_level)
    } else {
        default_level.to_string()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A second initialisation (tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
