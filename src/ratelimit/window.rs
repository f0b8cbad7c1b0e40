//! Window configuration for a single limiter instance.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, ShopgateError};

/// An immutable `(window, max requests)` pair bound to one limiter.
///
/// Both values are strictly positive. Construction fails instead of
/// clamping so a misconfigured limiter never starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWindowConfig", into = "RawWindowConfig")]
pub struct WindowConfig {
    window_ms: u64,
    max_requests: u32,
}

impl WindowConfig {
    /// Create a validated window configuration.
    pub fn new(window_ms: u64, max_requests: u32) -> Result<Self> {
        if window_ms == 0 {
            return Err(ShopgateError::Config(
                "window_ms must be a positive number of milliseconds".into(),
            ));
        }
        if max_requests == 0 {
            return Err(ShopgateError::Config(
                "max_requests must be a positive integer".into(),
            ));
        }
        Ok(Self {
            window_ms,
            max_requests,
        })
    }

    /// Length of the trailing window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Maximum admitted requests per identity inside one window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Seconds a rejected caller is told to wait, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        self.window_ms.div_ceil(1000)
    }
}

/// Unvalidated wire form of [`WindowConfig`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawWindowConfig {
    window_ms: u64,
    max_requests: u32,
}

impl TryFrom<RawWindowConfig> for WindowConfig {
    type Error = ShopgateError;

    fn try_from(raw: RawWindowConfig) -> Result<Self> {
        WindowConfig::new(raw.window_ms, raw.max_requests)
    }
}

impl From<WindowConfig> for RawWindowConfig {
    fn from(config: WindowConfig) -> Self {
        Self {
            window_ms: config.window_ms,
            max_requests: config.max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_window_config() {
        let config = WindowConfig::new(60_000, 3).unwrap();
        assert_eq!(config.window_ms(), 60_000);
        assert_eq!(config.max_requests(), 3);
        assert_eq!(config.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = WindowConfig::new(0, 3).unwrap_err();
        assert!(matches!(err, ShopgateError::Config(_)));
    }

    #[test]
    fn test_zero_max_requests_rejected() {
        let err = WindowConfig::new(1000, 0).unwrap_err();
        assert!(matches!(err, ShopgateError::Config(_)));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(WindowConfig::new(60_000, 1).unwrap().retry_after_secs(), 60);
        assert_eq!(WindowConfig::new(1500, 1).unwrap().retry_after_secs(), 2);
        assert_eq!(WindowConfig::new(1, 1).unwrap().retry_after_secs(), 1);
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: WindowConfig = serde_yaml::from_str("window_ms: 1000\nmax_requests: 2").unwrap();
        assert_eq!(ok, WindowConfig::new(1000, 2).unwrap());

        let bad = serde_yaml::from_str::<WindowConfig>("window_ms: 1000\nmax_requests: 0");
        assert!(bad.is_err());
    }
}
