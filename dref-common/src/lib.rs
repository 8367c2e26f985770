//! # dref-common
//!
//! Shared code for the reference-data pipeline crates:
//! - Error type
//! - Configuration loading (CLI > environment > TOML > defaults)
//! - Identifier sanitization for dynamically created tables
//! - Content fingerprints
//! - Postgres connection bootstrap and ledger table definitions

pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod identifier;

pub use error::{Error, Result};
pub use identifier::sanitize;
