//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Alive providers + call (method, attachments)
//!     → router.rs (RouterChain, routers in priority order)
//!     → matcher.rs (does a rule apply to this call?)
//!     → Return: narrowed candidate list
//!
//! Chain compilation (at init / config reload):
//!     RouterRuleConfig[]
//!     → Sort by priority (higher first)
//!     → Compile matchers
//!     → Freeze as immutable RouterChain
//! ```
//!
//! # Design Decisions
//! - Chains are compiled once and swapped whole on reload
//! - No regex in hot path (prefix and exact matching only)
//! - Every applicable router narrows further; an empty result is the caller's error

pub mod matcher;
pub mod router;

pub use matcher::{AndMatcher, AttachmentMatcher, Matcher, MethodPrefixMatcher};
pub use router::{AttributeRouter, Router, RouterChain};
