//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ConsumerConfig (validated)
//!     → held in an ArcSwap by the client
//!
//! On change:
//!     watcher.rs detects change
//!     → loader.rs loads new config / provider list
//!     → client swaps config or diffs providers
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Method-level settings override interface-level settings
//! - Period floors are applied on read, not rejected

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_provider_list, parse_config, ConfigError};
pub use schema::{
    ClusterKind, ConsumerConfig, LoadBalancerKind, MethodConfig, ObservabilityConfig, RouterRuleConfig,
};
pub use watcher::{ConfigWatcher, ProviderFileWatcher};
