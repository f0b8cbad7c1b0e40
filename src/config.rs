//! Configuration management for Shopgate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, ShopgateError};
use crate::identity::{default_identity_sources, IdentitySource};
use crate::ratelimit::{CompactionPolicy, WindowConfig, DEFAULT_MAX_TRACKED_IDENTITIES};

/// Prefix of environment variables that override file settings,
/// e.g. `SHOPGATE__SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "SHOPGATE";

/// Main configuration for the Shopgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShopgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Upstream routes, matched by longest path prefix
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Named limiters. Each name gets its own independent state.
    #[serde(default = "default_limiters")]
    pub limiters: BTreeMap<String, WindowConfig>,

    /// Limiter used for paths no route matches
    #[serde(default = "default_limiter_name")]
    pub default_limiter: String,

    /// Tracked identities per limiter before compaction runs
    #[serde(default = "default_max_tracked_identities")]
    pub max_tracked_identities: usize,

    /// How limiters reclaim memory past the identity ceiling
    #[serde(default)]
    pub compaction: CompactionPolicy,

    /// Where caller identities are read from, in priority order
    #[serde(default = "default_identity_sources")]
    pub identity_sources: Vec<IdentitySource>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limiters: default_limiters(),
            default_limiter: default_limiter_name(),
            max_tracked_identities: default_max_tracked_identities(),
            compaction: CompactionPolicy::default(),
            identity_sources: default_identity_sources(),
        }
    }
}

fn default_limiters() -> BTreeMap<String, WindowConfig> {
    // Both windows are non-zero constants.
    let strict = WindowConfig::new(60_000, 30).expect("strict defaults are positive");
    let lenient = WindowConfig::new(60_000, 100).expect("lenient defaults are positive");
    BTreeMap::from([
        ("strict".to_string(), strict),
        ("lenient".to_string(), lenient),
    ])
}

fn default_limiter_name() -> String {
    "lenient".to_string()
}

fn default_max_tracked_identities() -> usize {
    DEFAULT_MAX_TRACKED_IDENTITIES
}

/// A URL prefix forwarded to one upstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix, e.g. `/api/products`
    pub prefix: String,

    /// Upstream base address requests under this prefix are relayed to
    pub upstream: String,

    /// Limiter for GET, HEAD and OPTIONS (defaults to `default_limiter`)
    #[serde(default)]
    pub read_limiter: Option<String>,

    /// Limiter for every other method (defaults to `default_limiter`)
    #[serde(default)]
    pub write_limiter: Option<String>,
}

impl ShopgateConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: ShopgateConfig = serde_yaml::from_str(yaml)?;
        config.normalize_limiter_names()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file overlaid with
    /// `SHOPGATE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: ShopgateConfig = settings.try_deserialize()?;
        config.normalize_limiter_names()?;
        config.validate()?;
        Ok(config)
    }

    /// Lowercase limiter names and every reference to them.
    ///
    /// The layered loader lowercases map keys but not string values, so names
    /// are compared case-insensitively no matter which loader produced them.
    fn normalize_limiter_names(&mut self) -> Result<()> {
        let limiting = &mut self.rate_limiting;

        let mut limiters = BTreeMap::new();
        for (name, window) in std::mem::take(&mut limiting.limiters) {
            let lowered = name.to_lowercase();
            if limiters.insert(lowered.clone(), window).is_some() {
                return Err(ShopgateError::Config(format!(
                    "limiter '{}' is declared more than once",
                    lowered
                )));
            }
        }
        limiting.limiters = limiters;
        limiting.default_limiter = limiting.default_limiter.to_lowercase();

        for route in &mut self.routes {
            for name in [&mut route.read_limiter, &mut route.write_limiter]
                .into_iter()
                .flatten()
            {
                *name = name.to_lowercase();
            }
        }

        Ok(())
    }

    /// Check cross-references between sections.
    pub fn validate(&self) -> Result<()> {
        let limiting = &self.rate_limiting;

        if limiting.limiters.is_empty() {
            return Err(ShopgateError::Config(
                "at least one limiter must be configured".into(),
            ));
        }

        if !limiting.limiters.contains_key(&limiting.default_limiter) {
            return Err(ShopgateError::Config(format!(
                "default_limiter '{}' is not a configured limiter",
                limiting.default_limiter
            )));
        }

        if limiting.max_tracked_identities == 0 {
            return Err(ShopgateError::Config(
                "max_tracked_identities must be a positive integer".into(),
            ));
        }

        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                return Err(ShopgateError::Config(format!(
                    "route prefix '{}' must start with '/'",
                    route.prefix
                )));
            }

            for name in [&route.read_limiter, &route.write_limiter]
                .into_iter()
                .flatten()
            {
                if !limiting.limiters.contains_key(name) {
                    return Err(ShopgateError::Config(format!(
                        "route '{}' refers to unknown limiter '{}'",
                        route.prefix, name
                    )));
                }
            }
        }

        Ok(())
    }
}
