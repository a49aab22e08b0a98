//! Call matching logic.
//!
//! # Responsibilities
//! - Match method name prefix (case-sensitive)
//! - Match call attachments (exact value)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use crate::cluster::context::CallContext;
use crate::transport::RpcRequest;

/// Trait for matching calls against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the call matches this condition.
    fn matches(&self, request: &RpcRequest, ctx: &CallContext) -> bool;
}

/// Matches the method name prefix.
#[derive(Debug, Clone)]
pub struct MethodPrefixMatcher {
    prefix: String,
}

impl MethodPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Matcher for MethodPrefixMatcher {
    fn matches(&self, request: &RpcRequest, _ctx: &CallContext) -> bool {
        request.method.starts_with(&self.prefix)
    }
}

/// Matches one call attachment by exact value.
#[derive(Debug, Clone)]
pub struct AttachmentMatcher {
    key: String,
    value: String,
}

impl AttachmentMatcher {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Matcher for AttachmentMatcher {
    fn matches(&self, _request: &RpcRequest, ctx: &CallContext) -> bool {
        ctx.attachment(&self.key) == Some(self.value.as_str())
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, request: &RpcRequest, ctx: &CallContext) -> bool {
        self.matchers.iter().all(|m| m.matches(request, ctx))
    }
}
