//! Caller identity resolution.
//!
//! Every rate-limited request is keyed by an [`IdentityKey`]. Keys are
//! derived from the authenticated principal when the authentication layer
//! has attached one, then from proxy headers, then from the socket peer.

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use tracing::trace;

/// Header carrying the client chain appended by upstream proxies.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header carrying the single client address set by an edge proxy.
pub const X_REAL_IP: &str = "x-real-ip";

/// A non-empty key that partitions rate-limit accounting.
///
/// Keys are namespaced by origin (`user:` or `ip:`) so a principal id can
/// never collide with a network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Key for an authenticated principal. Returns `None` for an empty id.
    pub fn principal(id: &str) -> Option<Self> {
        let id = id.trim();
        (!id.is_empty()).then(|| Self(format!("user:{}", id)))
    }

    /// Key for a network address.
    pub fn address(ip: IpAddr) -> Self {
        Self(format!("ip:{}", ip))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated caller, inserted into request extensions by the
/// authentication layer after a token has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable user identifier taken from the verified token claims
    pub id: String,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A single place an identity can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// The [`Principal`] request extension
    Principal,
    /// The first address in `X-Forwarded-For`
    ForwardedFor,
    /// The address in `X-Real-IP`
    RealIp,
    /// The socket peer address from [`ConnectInfo`]
    PeerAddr,
}

impl IdentitySource {
    /// Try to derive an identity from this source alone.
    pub fn resolve(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IdentityKey> {
        match self {
            IdentitySource::Principal => extensions
                .get::<Principal>()
                .and_then(|p| IdentityKey::principal(&p.id)),
            IdentitySource::ForwardedFor => headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(parse_ip)
                .map(IdentityKey::address),
            IdentitySource::RealIp => headers
                .get(X_REAL_IP)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_ip)
                .map(IdentityKey::address),
            IdentitySource::PeerAddr => extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| IdentityKey::address(addr.ip())),
        }
    }
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

/// Strategy for deriving an identity from an inbound request.
pub trait IdentityResolver: Send + Sync {
    /// Resolve the caller identity, or `None` if the caller cannot be identified.
    fn resolve(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IdentityKey>;
}

/// Resolver that tries each configured source in order and keeps the first hit.
#[derive(Debug, Clone)]
pub struct ChainResolver {
    sources: Vec<IdentitySource>,
}

impl ChainResolver {
    pub fn new(sources: Vec<IdentitySource>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[IdentitySource] {
        &self.sources
    }
}

impl Default for ChainResolver {
    fn default() -> Self {
        Self::new(default_identity_sources())
    }
}

impl IdentityResolver for ChainResolver {
    fn resolve(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IdentityKey> {
        for source in &self.sources {
            if let Some(key) = source.resolve(headers, extensions) {
                trace!(source = ?source, identity = %key, "Resolved caller identity");
                return Some(key);
            }
        }
        None
    }
}

/// Principal first, then the forwarded client address, then the socket peer.
pub fn default_identity_sources() -> Vec<IdentitySource> {
    vec![
        IdentitySource::Principal,
        IdentitySource::ForwardedFor,
        IdentitySource::PeerAddr,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer(addr: &str) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        extensions
    }

    #[test]
    fn test_principal_takes_priority() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        let mut extensions = peer("10.0.0.1:4000");
        extensions.insert(Principal::new("42"));

        let key = ChainResolver::default().resolve(&headers, &extensions).unwrap();
        assert_eq!(key.as_str(), "user:42");
    }

    #[test]
    fn test_forwarded_for_uses_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.2"),
        );

        let key = ChainResolver::default()
            .resolve(&headers, &peer("10.0.0.1:4000"))
            .unwrap();
        assert_eq!(key.as_str(), "ip:203.0.113.7");
    }

    #[test]
    fn test_garbage_forwarded_for_falls_through_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("unknown"));

        let key = ChainResolver::default()
            .resolve(&headers, &peer("10.0.0.1:4000"))
            .unwrap();
        assert_eq!(key.as_str(), "ip:10.0.0.1");
    }

    #[test]
    fn test_empty_principal_is_ignored() {
        let mut extensions = peer("[::1]:4000");
        extensions.insert(Principal::new("  "));

        let key = ChainResolver::default()
            .resolve(&HeaderMap::new(), &extensions)
            .unwrap();
        assert_eq!(key.as_str(), "ip:::1");
    }

    #[test]
    fn test_real_ip_source() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("198.51.100.4"));

        let resolver = ChainResolver::new(vec![IdentitySource::RealIp]);
        let key = resolver.resolve(&headers, &Extensions::new()).unwrap();
        assert_eq!(key.to_string(), "ip:198.51.100.4");
    }

    #[test]
    fn test_unidentifiable_request() {
        let key = ChainResolver::default().resolve(&HeaderMap::new(), &Extensions::new());
        assert!(key.is_none());
    }

    #[test]
    fn test_source_order_is_respected() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));

        let resolver = ChainResolver::new(vec![
            IdentitySource::PeerAddr,
            IdentitySource::ForwardedFor,
        ]);
        let key = resolver.resolve(&headers, &peer("10.0.0.1:4000")).unwrap();
        assert_eq!(key.as_str(), "ip:10.0.0.1");
    }

    #[test]
    fn test_identity_source_deserialize() {
        let sources: Vec<IdentitySource> =
            serde_yaml::from_str("[principal, forwarded_for, real_ip, peer_addr]").unwrap();
        assert_eq!(
            sources,
            vec![
                IdentitySource::Principal,
                IdentitySource::ForwardedFor,
                IdentitySource::RealIp,
                IdentitySource::PeerAddr,
            ]
        );
    }
}
