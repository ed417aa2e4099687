//! Observability: structured logging and Prometheus metrics.
//!
//! - Logging with configurable formats (pretty, compact, JSON) and
//!   `RUST_LOG`-style filtering
//! - Metric recording helpers that compile to no-ops without `prometheus`

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
