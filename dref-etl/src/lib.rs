//! dref-etl library interface
//!
//! Bronze/silver pipeline for JSON reference data:
//! - [`services::ingest`]: raw documents → bronze tables
//! - [`services::fusion`] / [`services::copier`]: bronze → silver
//! - [`services::orchestrator`]: walks every bronze schema
//!
//! Storage is reached only through the [`store`] traits and the [`ledger`]
//! traits, so the whole pipeline also runs against the in-memory backends.

pub mod error;
pub mod flatten;
pub mod ledger;
pub mod models;
pub mod services;
pub mod store;

pub use crate::error::{EtlError, EtlResult};
