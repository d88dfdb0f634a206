//! Push-based observability.
//!
//! This module provides observability through **outbound data only** - no HTTP server, no
//! incoming requests. Metrics are exposed via a Prometheus registry held in-process and via
//! periodic structured JSON logs.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
