//! Error types for the Shopgate service.

use thiserror::Error;

/// Main error type for Shopgate operations.
///
/// A rejected request is not an error; it is reported through
/// [`Decision::Reject`](crate::ratelimit::Decision::Reject).
#[derive(Error, Debug)]
pub enum ShopgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered settings could not be assembled or deserialized
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// YAML parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Shopgate operations.
pub type Result<T> = std::result::Result<T, ShopgateError>;
