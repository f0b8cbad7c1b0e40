//! Named limiters and the route policy that picks one per request.
//!
//! A service usually runs several limiters side by side (a strict one for
//! mutating calls, a lenient one for reads). Each name owns an independent
//! [`SlidingWindowLimiter`]; routes refer to limiters by name and select
//! between them by HTTP method.

use axum::http::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::limiter::{AdmissionControl, SlidingWindowLimiter};
use crate::config::ShopgateConfig;
use crate::error::{Result, ShopgateError};

/// A limiter together with the name it was configured under.
#[derive(Clone)]
pub struct NamedLimiter {
    name: String,
    limiter: Arc<dyn AdmissionControl>,
}

impl NamedLimiter {
    pub fn new(name: impl Into<String>, limiter: Arc<dyn AdmissionControl>) -> Self {
        Self {
            name: name.into(),
            limiter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &Arc<dyn AdmissionControl> {
        &self.limiter
    }
}

impl std::fmt::Debug for NamedLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedLimiter")
            .field("name", &self.name)
            .field("window", &self.limiter.window())
            .finish()
    }
}

/// A configured route and the limiters guarding it.
#[derive(Debug, Clone)]
pub struct Route {
    prefix: String,
    upstream: String,
    read: NamedLimiter,
    write: NamedLimiter,
}

impl Route {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.ends_with('/'),
            None => false,
        }
    }
}

/// Selects the limiter (and upstream route, if any) for a request.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    /// Routes ordered longest prefix first
    routes: Vec<Route>,
    /// Limiter for requests no route matches
    default: NamedLimiter,
}

/// Result of [`RoutePolicy::select`].
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub limiter: &'a NamedLimiter,
    pub route: Option<&'a Route>,
}

impl RoutePolicy {
    /// A policy with no routes: every request goes through `default`.
    pub fn single(default: NamedLimiter) -> Self {
        Self {
            routes: Vec::new(),
            default,
        }
    }

    /// Add a route. Longer prefixes always win regardless of insertion order.
    pub fn with_route(
        mut self,
        prefix: impl Into<String>,
        upstream: impl Into<String>,
        read: NamedLimiter,
        write: NamedLimiter,
    ) -> Self {
        self.routes.push(Route {
            prefix: prefix.into(),
            upstream: upstream.into(),
            read,
            write,
        });
        self.routes
            .sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        self
    }

    /// Build limiters and routes from service configuration.
    ///
    /// Every configured name gets exactly one limiter instance, shared by all
    /// routes that refer to it.
    pub fn from_config(config: &ShopgateConfig) -> Result<Self> {
        config.validate()?;
        let limiting = &config.rate_limiting;

        let limiters: HashMap<&str, NamedLimiter> = limiting
            .limiters
            .iter()
            .map(|(name, window)| {
                info!(
                    limiter = %name,
                    window_ms = window.window_ms(),
                    max_requests = window.max_requests(),
                    "Configured rate limiter"
                );
                let limiter = SlidingWindowLimiter::new(*window)
                    .with_compaction(limiting.max_tracked_identities, limiting.compaction);
                (name.as_str(), NamedLimiter::new(name.clone(), Arc::new(limiter)))
            })
            .collect();

        let lookup = |name: Option<&String>| -> Result<NamedLimiter> {
            let name = name.unwrap_or(&limiting.default_limiter);
            limiters.get(name.as_str()).cloned().ok_or_else(|| {
                ShopgateError::Config(format!("unknown limiter '{}'", name))
            })
        };

        let mut policy = Self::single(lookup(None)?);
        for route in &config.routes {
            policy = policy.with_route(
                route.prefix.clone(),
                route.upstream.clone(),
                lookup(route.read_limiter.as_ref())?,
                lookup(route.write_limiter.as_ref())?,
            );
        }

        Ok(policy)
    }

    /// Pick the limiter for a request. GET, HEAD and OPTIONS use the route's
    /// read limiter, everything else its write limiter.
    pub fn select(&self, method: &Method, path: &str) -> Selection<'_> {
        let Some(route) = self.routes.iter().find(|r| r.matches(path)) else {
            return Selection {
                limiter: &self.default,
                route: None,
            };
        };

        let limiter = if is_read(method) {
            &route.read
        } else {
            &route.write
        };

        debug!(
            prefix = %route.prefix,
            method = %method,
            limiter = %limiter.name,
            "Selected rate limiter"
        );

        Selection {
            limiter,
            route: Some(route),
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

/// Methods metered by a route's read limiter.
fn is_read(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::WindowConfig;

    fn named(name: &str, max: u32) -> NamedLimiter {
        let window = WindowConfig::new(60_000, max).unwrap();
        NamedLimiter::new(name, Arc::new(SlidingWindowLimiter::new(window)))
    }

    fn policy() -> RoutePolicy {
        RoutePolicy::single(named("default", 100))
            .with_route("/api", "http://catch-all:3000", named("api-read", 50), named("api-write", 5))
            .with_route(
                "/api/products",
                "http://product-service:3002",
                named("lenient", 100),
                named("strict", 10),
            )
    }

    #[test]
    fn test_longest_prefix_wins() {
        let policy = policy();

        let selection = policy.select(&Method::GET, "/api/products/17");
        assert_eq!(selection.route.unwrap().upstream(), "http://product-service:3002");
        assert_eq!(selection.limiter.name(), "lenient");

        let selection = policy.select(&Method::GET, "/api/orders");
        assert_eq!(selection.route.unwrap().prefix(), "/api");
    }

    #[test]
    fn test_method_selects_limiter() {
        let policy = policy();

        assert_eq!(policy.select(&Method::HEAD, "/api/products").limiter.name(), "lenient");
        assert_eq!(policy.select(&Method::POST, "/api/products").limiter.name(), "strict");
        assert_eq!(policy.select(&Method::DELETE, "/api/products/1").limiter.name(), "strict");
    }

    #[test]
    fn test_only_get_head_options_are_reads() {
        let policy = policy();

        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            assert_eq!(policy.select(&method, "/api/products").limiter.name(), "lenient");
        }
        for method in [Method::TRACE, Method::PUT, Method::PATCH, Method::CONNECT] {
            assert_eq!(policy.select(&method, "/api/products").limiter.name(), "strict");
        }
    }

    #[test]
    fn test_prefix_matches_on_segment_boundary() {
        let policy = policy();

        let selection = policy.select(&Method::GET, "/api/productsearch");
        assert_eq!(selection.route.unwrap().prefix(), "/api");

        let selection = policy.select(&Method::GET, "/health");
        assert!(selection.route.is_none());
        assert_eq!(selection.limiter.name(), "default");
    }

    #[test]
    fn test_from_config_shares_instances_by_name() {
        let yaml = r#"
rate_limiting:
  limiters:
    strict:
      window_ms: 60000
      max_requests: 1
    lenient:
      window_ms: 60000
      max_requests: 10
routes:
  - prefix: /api/products
    upstream: http://product-service:3002
    write_limiter: strict
  - prefix: /api/orders
    upstream: http://order-service:3003
    write_limiter: strict
"#;
        let config = ShopgateConfig::from_yaml(yaml).unwrap();
        let policy = RoutePolicy::from_config(&config).unwrap();
        assert_eq!(policy.routes().len(), 2);

        let products = policy.select(&Method::POST, "/api/products").limiter.clone();
        let orders = policy.select(&Method::POST, "/api/orders").limiter.clone();

        // Same name, same instance: one write on products exhausts orders too
        assert!(products.limiter().admit(Some("ip:1.2.3.4"), 0).is_allowed());
        assert!(!orders.limiter().admit(Some("ip:1.2.3.4"), 1).is_allowed());

        // Reads fall back to the default limiter, which has separate state
        let reads = policy.select(&Method::GET, "/api/products").limiter;
        assert_eq!(reads.name(), "lenient");
        assert!(reads.limiter().admit(Some("ip:1.2.3.4"), 2).is_allowed());
    }
}
