//! Provider (remote endpoint) model.
//!
//! # Data Flow
//! ```text
//! direct_url / provider file / discovery push
//!     → parse.rs (parse "proto://host:port/path?k=v" into ProviderInfo)
//!     → info.rs (immutable identity + routing metadata)
//!     → holder (per-provider mutable state lives there, not here)
//! ```
//!
//! # Design Decisions
//! - `ProviderInfo` is immutable once built; equality is by protocol + address + group
//! - Reconnect backoff and failure counters are stored in the holder's arena
//! - Unknown URL parameters are kept as static attributes for routing rules

pub mod info;
pub mod parse;

pub use info::{ProviderInfo, ProviderKey, DEFAULT_WEIGHT};
pub use parse::{parse_direct_urls, parse_provider_url};
