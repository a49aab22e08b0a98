//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Holder, cluster and client produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//!
//! Consumers:
//!     → whatever subscriber / recorder the host application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a metrics exporter
//! - Every holder transition is logged with the provider address as a field
//! - Metrics are cheap (atomic increments on the installed recorder)

pub mod logging;
pub mod metrics;
