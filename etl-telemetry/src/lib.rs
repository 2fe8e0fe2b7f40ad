//! Logging and metrics setup shared by the catalog sync binaries and tests.

pub mod metrics;
pub mod tracing;
