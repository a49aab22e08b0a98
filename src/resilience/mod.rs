//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Provider in retry partition:
//!     → backoff.rs (should this reconnect tick attempt it?)
//!     → On failure: coefficient grows, attempts spread out
//!     → On success: coefficient resets to 1
//! ```
//!
//! # Design Decisions
//! - Backoff is counted in reconnect ticks, not wall-clock delays
//! - Per-provider coefficients live in the holder arena, not here

pub mod backoff;

pub use backoff::ReconnectBackoff;
