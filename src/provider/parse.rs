//! Direct-URL parsing.
//!
//! Accepts `protocol://host:port[/path]?key=value&...`. A bare `host:port`
//! inherits the consumer protocol. Several URLs may be joined with `;` or `,`.

use url::Url;

use crate::error::{Result, RpcError};
use crate::provider::info::{ProviderInfo, DEFAULT_WEIGHT};

const PARAM_WEIGHT: &str = "weight";
const PARAM_RPC_VERSION: &str = "rpcVer";
const PARAM_SERIALIZATION: &str = "serialization";
const PARAM_GROUP: &str = "uniqueId";

/// Parse a single provider URL.
///
/// `consumer_protocol` is used for bare `host:port` entries and to detect a
/// protocol mismatch on explicit URLs.
pub fn parse_provider_url(raw: &str, consumer_protocol: &str) -> Result<ProviderInfo> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(malformed(raw, "empty url"));
    }

    let normalized = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{}://{}", consumer_protocol, trimmed)
    };

    let url = Url::parse(&normalized).map_err(|e| malformed(raw, &e.to_string()))?;

    if url.scheme() != consumer_protocol {
        return Err(RpcError::ProtocolMismatch {
            url: raw.to_string(),
            expected: consumer_protocol.to_string(),
            actual: url.scheme().to_string(),
        });
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| malformed(raw, "missing host"))?;
    let port = url.port().ok_or_else(|| malformed(raw, "missing port"))?;

    let path = url.path().trim_start_matches('/');
    let mut provider = ProviderInfo::new(url.scheme(), host, port).with_path(path);

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            PARAM_WEIGHT => {
                let weight = value.parse::<i32>().unwrap_or(DEFAULT_WEIGHT);
                provider = provider.with_weight(weight);
            }
            PARAM_RPC_VERSION => {
                let version = value
                    .parse::<u32>()
                    .map_err(|_| malformed(raw, &format!("invalid {}: {}", PARAM_RPC_VERSION, value)))?;
                provider = provider.with_rpc_version(version);
            }
            PARAM_SERIALIZATION => provider = provider.with_serialization(value.as_ref()),
            PARAM_GROUP => provider = provider.with_group(value.as_ref()),
            _ => provider = provider.with_attr(key.as_ref(), value.as_ref()),
        }
    }

    Ok(provider)
}

/// Parse a `;`/`,` separated list of provider URLs.
///
/// Duplicate providers (same identity) are collapsed, first one wins.
pub fn parse_direct_urls(raw: &str, consumer_protocol: &str) -> Result<Vec<ProviderInfo>> {
    let mut providers: Vec<ProviderInfo> = Vec::new();
    for part in raw.split([';', ',']).map(str::trim).filter(|s| !s.is_empty()) {
        let provider = parse_provider_url(part, consumer_protocol)?;
        if !providers.contains(&provider) {
            providers.push(provider);
        }
    }
    Ok(providers)
}

fn malformed(url: &str, reason: &str) -> RpcError {
    RpcError::MalformedUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
