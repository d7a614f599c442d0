//! Route lookup.
//!
//! # Responsibilities
//! - Compile route configs into matchers and bridges
//! - Look up the route for a request
//! - Return the matched route or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction; reloads build a new table
//! - Routes are ordered by priority (descending), config order breaks ties
//! - O(n) scan (acceptable for typical route counts)

use axum::http::request::Parts;

use crate::bridge::DubboBridge;
use crate::config::schema::RouteConfig;
use crate::error::BridgeResult;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// A route ready to serve requests.
#[derive(Debug)]
pub struct CompiledRoute {
    pub name: String,
    pub upstream: String,
    /// `None` when the route has no bridge configuration.
    pub bridge: Option<DubboBridge>,
    priority: u32,
    matcher: AndMatcher,
}

impl CompiledRoute {
    pub fn compile(config: &RouteConfig) -> BridgeResult<Self> {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.as_str())));
        }
        matchers.push(Box::new(PathPrefixMatcher::new(config.path_prefix.as_str())));

        let bridge = config
            .bridge
            .as_ref()
            .map(DubboBridge::from_config)
            .transpose()?;

        Ok(Self {
            name: config.name.clone(),
            upstream: config.upstream.clone(),
            bridge,
            priority: config.priority,
            matcher: AndMatcher::new(matchers),
        })
    }

    pub fn matches(&self, req: &Parts) -> bool {
        self.matcher.matches(req)
    }
}

/// Ordered set of compiled routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    pub fn from_config(configs: &[RouteConfig]) -> BridgeResult<Self> {
        let mut routes = configs
            .iter()
            .map(CompiledRoute::compile)
            .collect::<BridgeResult<Vec<_>>>()?;
        // Stable sort keeps config order among equal priorities.
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self { routes })
    }

    /// First route whose conditions all hold.
    pub fn match_request(&self, req: &Parts) -> Option<&CompiledRoute> {
        self.routes.iter().find(|route| route.matches(req))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
