//! Error types for the PBN manager.
//!
//! 各モジュールは独自のエラー型を持ち、`#[from]` でクレート共通の
//! [`Error`] に変換される。

use thiserror::Error;

use crate::content::ContentError;
use crate::llm::LlmError;
use crate::security::CryptoError;
use crate::store::StoreError;
use crate::wordpress::WordPressError;

/// Result type alias for PBN manager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// WordPress REST API error
    #[error("WordPress error: {0}")]
    WordPress(#[from] WordPressError),

    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Content pipeline error (templates, briefs)
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Encryption/decryption error
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested site is not registered
    #[error("Site not registered: {0}")]
    SiteNotFound(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the error was caused by the caller rather than a remote service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::SiteNotFound(_)
                | Error::WordPress(WordPressError::InvalidUrl(_))
                | Error::Content(ContentError::MissingVariable(_))
                | Error::Content(ContentError::UnknownTemplate(_))
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
