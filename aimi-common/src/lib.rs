//! # AIMI Common Library
//!
//! Shared code for the AIMI importer crates:
//! - Error and result types
//! - TOML bootstrap configuration and path resolution
//! - SQLite pool initialisation and lock retry

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
