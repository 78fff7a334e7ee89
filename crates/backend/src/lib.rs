//! Typed access to the patient-records REST backend: the tool client
//! with method-aware retry, and the name-resolution cache built on it.

pub mod client;
pub mod name_cache;
pub mod types;

pub use client::{PatientBackend, RestPatientBackend};
pub use name_cache::{NameCache, NameCacheStats, NameResolution};
pub use types::NewPatient;
