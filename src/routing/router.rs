//! Provider routing.
//!
//! A [`RouterChain`] narrows the alive candidate list before load balancing.

use std::fmt::Debug;
use std::sync::Arc;

use crate::cluster::context::CallContext;
use crate::config::RouterRuleConfig;
use crate::provider::ProviderInfo;
use crate::routing::matcher::{AndMatcher, AttachmentMatcher, Matcher, MethodPrefixMatcher};
use crate::transport::RpcRequest;

/// Narrows a candidate list for one call.
pub trait Router: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn route(
        &self,
        request: &RpcRequest,
        ctx: &CallContext,
        candidates: Vec<Arc<ProviderInfo>>,
    ) -> Vec<Arc<ProviderInfo>>;
}

/// Keeps providers whose attribute `key` equals `value`, for calls the matcher accepts.
#[derive(Debug)]
pub struct AttributeRouter {
    name: String,
    matcher: AndMatcher,
    key: String,
    value: String,
}

impl AttributeRouter {
    pub fn new(name: impl Into<String>, matcher: AndMatcher, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matcher,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn from_rule(rule: &RouterRuleConfig) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(prefix) = &rule.method_prefix {
            matchers.push(Box::new(MethodPrefixMatcher::new(prefix.clone())));
        }
        let mut attachments: Vec<_> = rule.attachments.iter().collect();
        attachments.sort();
        for (k, v) in attachments {
            matchers.push(Box::new(AttachmentMatcher::new(k.clone(), v.clone())));
        }
        Self::new(rule.name.clone(), AndMatcher::new(matchers), rule.key.clone(), rule.value.clone())
    }
}

impl Router for AttributeRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn route(
        &self,
        request: &RpcRequest,
        ctx: &CallContext,
        candidates: Vec<Arc<ProviderInfo>>,
    ) -> Vec<Arc<ProviderInfo>> {
        if !self.matcher.matches(request, ctx) {
            return candidates;
        }
        candidates
            .into_iter()
            .filter(|p| p.attr(&self.key) == Some(self.value.as_str()))
            .collect()
    }
}

/// Ordered routers, applied one after another.
#[derive(Debug, Default)]
pub struct RouterChain {
    routers: Vec<Box<dyn Router>>,
}

impl RouterChain {
    pub fn new(routers: Vec<Box<dyn Router>>) -> Self {
        Self { routers }
    }

    /// Compile rules, higher priority first. Equal priorities keep config order.
    pub fn from_rules(rules: &[RouterRuleConfig]) -> Self {
        let mut sorted: Vec<&RouterRuleConfig> = rules.iter().collect();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));
        let routers = sorted
            .into_iter()
            .map(|r| Box::new(AttributeRouter::from_rule(r)) as Box<dyn Router>)
            .collect();
        Self { routers }
    }

    pub fn push(&mut self, router: Box<dyn Router>) {
        self.routers.push(router);
    }

    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    pub fn route(
        &self,
        request: &RpcRequest,
        ctx: &CallContext,
        mut candidates: Vec<Arc<ProviderInfo>>,
    ) -> Vec<Arc<ProviderInfo>> {
        for router in &self.routers {
            if candidates.is_empty() {
                break;
            }
            let before = candidates.len();
            candidates = router.route(request, ctx, candidates);
            if candidates.len() != before {
                tracing::trace!(
                    router = router.name(),
                    before,
                    after = candidates.len(),
                    "Router narrowed candidates"
                );
            }
        }
        candidates
    }
}
