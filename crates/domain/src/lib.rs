//! Shared domain types for HydroChat: configuration, errors, the PII
//! masker, the structured log taxonomy, patient/scan records, intent
//! enumerations, and the process-wide metrics registry.
//!
//! This crate performs no I/O; everything here is pure data and small
//! synchronized containers consumed by the other crates.

pub mod config;
pub mod error;
pub mod intent;
pub mod log;
pub mod mask;
pub mod metrics;
pub mod types;

pub use error::{Error, Result};
