//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Client init:
//!     Validate config → Build holder & cluster → Connect (eager) → Start loops
//!
//! Client destroy (shutdown.rs):
//!     Trigger → Reconnect/heartbeat loops exit → Drain in-flight → Release transports
//! ```
//!
//! # Design Decisions
//! - Ordered teardown: stop loops, drain, close
//! - Draining has a timeout: transports are released after the deadline

pub mod shutdown;

pub use shutdown::Shutdown;
