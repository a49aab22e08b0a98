//! Error taxonomy for the client runtime.
//!
//! # Classification
//! ```text
//! Config     fatal at startup (check failed, bad direct URL, protocol mismatch)
//! NoRoute    no alive provider after routing / exclusion
//! Remote     connection closed, server error, empty response, transport failure
//! Timeout    client-side timeout (sent or never sent)
//! Local      serialization / programming errors, never retried
//! Busy       call arrived while transports are being reset
//! Cancelled  future cancelled by the caller
//! Lifecycle  client destroyed or not initialised
//! ```
//!
//! `Remote` and `Timeout` are the only retryable kinds under failover.

use std::fmt;
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Coarse classification of an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    NoRoute,
    Remote,
    Timeout,
    Local,
    Busy,
    Cancelled,
    Lifecycle,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::NoRoute => "no_route",
            ErrorKind::Remote => "remote",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Local => "local",
            ErrorKind::Busy => "busy",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Lifecycle => "lifecycle",
        };
        f.write_str(s)
    }
}

/// Errors raised by the client runtime.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Startup or configuration failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A direct URL could not be parsed into a provider.
    #[error("malformed provider url '{url}': {reason}")]
    MalformedUrl { url: String, reason: String },

    /// Explicit URL protocol differs from the consumer protocol.
    #[error("protocol mismatch for {url}: consumer speaks '{expected}', provider url says '{actual}'")]
    ProtocolMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// No provider left after routing, filtering and exclusion.
    #[error("no alive provider for {service}: {detail}")]
    NoAliveProvider { service: String, detail: String },

    /// The connection to the provider closed while the call was in flight.
    #[error("connection to {provider} closed: {detail}")]
    ConnectionClosed { provider: String, detail: String },

    /// The provider answered with a framework-level error.
    #[error("server error from {provider}: {message}")]
    Server { provider: String, message: String },

    /// The transport returned no response for a synchronous call.
    #[error("empty response from {provider} for {method}")]
    EmptyResponse { provider: String, method: String },

    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Client side timeout.
    #[error("{}", timeout_message(.request_id, .sent, .timeout_ms, .queued_ms, .waited_ms))]
    Timeout {
        request_id: u64,
        sent: bool,
        timeout_ms: u64,
        queued_ms: u64,
        waited_ms: u64,
    },

    /// Local failure that a retry would not fix.
    #[error("local error: {0}")]
    Local(String),

    /// A transport reset is in progress.
    #[error("client for {0} is resetting its transports, try again later")]
    Resetting(String),

    /// The response future was cancelled.
    #[error("request {0} was cancelled")]
    Cancelled(u64),

    /// The client has been destroyed.
    #[error("client for {0} is destroyed")]
    Destroyed(String),

    /// Final, enriched error of a cluster invocation.
    #[error("failed to invoke {service}.{method} after {attempts} attempt(s) on [{}]: {cause}", .tried.join(", "))]
    Invocation {
        service: String,
        method: String,
        attempts: u32,
        tried: Vec<String>,
        #[source]
        cause: Box<RpcError>,
    },
}

fn timeout_message(request_id: &u64, sent: &bool, timeout_ms: &u64, queued_ms: &u64, waited_ms: &u64) -> String {
    if *sent {
        format!(
            "request {} timed out after {}ms waiting for a response (timeout {}ms, queued {}ms before send)",
            request_id, waited_ms, timeout_ms, queued_ms
        )
    } else {
        format!(
            "request {} timed out after {}ms before it was sent (timeout {}ms)",
            request_id, waited_ms, timeout_ms
        )
    }
}

impl RpcError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Config(_) | RpcError::MalformedUrl { .. } | RpcError::ProtocolMismatch { .. } => {
                ErrorKind::Config
            }
            RpcError::NoAliveProvider { .. } => ErrorKind::NoRoute,
            RpcError::ConnectionClosed { .. }
            | RpcError::Server { .. }
            | RpcError::EmptyResponse { .. }
            | RpcError::Transport(_) => ErrorKind::Remote,
            RpcError::Timeout { .. } => ErrorKind::Timeout,
            RpcError::Local(_) => ErrorKind::Local,
            RpcError::Resetting(_) => ErrorKind::Busy,
            RpcError::Cancelled(_) => ErrorKind::Cancelled,
            RpcError::Destroyed(_) => ErrorKind::Lifecycle,
            RpcError::Invocation { cause, .. } => cause.kind(),
        }
    }

    /// True for remote/transport failures and client timeouts.
    ///
    /// A final [`RpcError::Invocation`] is never retryable again.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Invocation { .. } => false,
            _ => matches!(self.kind(), ErrorKind::Remote | ErrorKind::Timeout),
        }
    }

    /// True if the connection was observed closed.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, RpcError::ConnectionClosed { .. })
    }

    /// Innermost error of an invocation chain.
    pub fn root_cause(&self) -> &RpcError {
        match self {
            RpcError::Invocation { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Providers attempted by the failed invocation, if any.
    pub fn tried_providers(&self) -> &[String] {
        match self {
            RpcError::Invocation { tried, .. } => tried,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let closed = RpcError::ConnectionClosed {
            provider: "127.0.0.1:12200".into(),
            detail: "reset by peer".into(),
        };
        assert!(closed.is_retryable());
        assert!(closed.is_connection_closed());

        let timeout = RpcError::Timeout {
            request_id: 1,
            sent: true,
            timeout_ms: 3000,
            queued_ms: 1,
            waited_ms: 3000,
        };
        assert!(timeout.is_retryable());

        assert!(!RpcError::Local("bad argument".into()).is_retryable());
        assert!(!RpcError::Resetting("svc".into()).is_retryable());
        assert_eq!(RpcError::Resetting("svc".into()).kind(), ErrorKind::Busy);
    }

    #[test]
    fn test_invocation_wraps_cause() {
        let err = RpcError::Invocation {
            service: "com.acme.Echo".into(),
            method: "echo".into(),
            attempts: 2,
            tried: vec!["a:1".into(), "b:2".into()],
            cause: Box::new(RpcError::Server {
                provider: "b:2".into(),
                message: "boom".into(),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(!err.is_retryable());
        assert_eq!(err.tried_providers().len(), 2);
        assert!(matches!(err.root_cause(), RpcError::Server { .. }));
        let msg = err.to_string();
        assert!(msg.contains("after 2 attempt(s)"));
        assert!(msg.contains("a:1, b:2"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_timeout_message_distinguishes_sent() {
        let unsent = RpcError::Timeout {
            request_id: 7,
            sent: false,
            timeout_ms: 100,
            queued_ms: 0,
            waited_ms: 100,
        };
        assert!(unsent.to_string().contains("before it was sent"));

        let sent = RpcError::Timeout {
            request_id: 7,
            sent: true,
            timeout_ms: 100,
            queued_ms: 5,
            waited_ms: 95,
        };
        assert!(sent.to_string().contains("waiting for a response"));
        assert!(sent.to_string().contains("queued 5ms"));
    }
}
