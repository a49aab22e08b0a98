//! Configuration loading from disk.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::config::schema::ConsumerConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::error::RpcError;
use crate::provider::{parse_provider_url, ProviderInfo};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for RpcError {
    fn from(e: ConfigError) -> Self {
        RpcError::Config(e.to_string())
    }
}

/// Load and validate a consumer configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ConsumerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate a consumer configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ConsumerConfig, ConfigError> {
    let config: ConsumerConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[derive(Debug, Deserialize)]
struct ProviderFile {
    #[serde(default)]
    providers: Vec<ProviderEntry>,
}

#[derive(Debug, Deserialize)]
struct ProviderEntry {
    url: String,
}

/// Load a provider list file:
///
/// ```toml
/// [[providers]]
/// url = "bolt://10.0.0.1:12200?weight=50"
/// ```
pub fn load_provider_list(path: &Path, protocol: &str) -> Result<Vec<ProviderInfo>, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_provider_list(&content, protocol)
}

pub fn parse_provider_list(content: &str, protocol: &str) -> Result<Vec<ProviderInfo>, ConfigError> {
    let file: ProviderFile = toml::from_str(content).map_err(ConfigError::Parse)?;

    let mut providers = Vec::with_capacity(file.providers.len());
    let mut errors = Vec::new();
    for (i, entry) in file.providers.iter().enumerate() {
        match parse_provider_url(&entry.url, protocol) {
            Ok(p) if !providers.contains(&p) => providers.push(p),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::new(format!("providers[{}].url", i), e.to_string())),
        }
    }

    if errors.is_empty() {
        Ok(providers)
    } else {
        Err(ConfigError::Validation(errors))
    }
}
