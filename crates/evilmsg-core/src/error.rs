//! Error types for `evilmsg` core library.

use thiserror::Error;

/// Result type alias using `evilmsg` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `evilmsg` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
