use serde::Deserialize;
use thiserror::Error;

/// WordPress REST API error taxonomy
#[derive(Debug, Error)]
pub enum WordPressError {
    /// HTTP 401: bad username or application password
    #[error("Authentication failed (HTTP 401)")]
    Authentication,

    /// HTTP 403: authenticated but not allowed
    #[error("Forbidden (HTTP 403): {0}")]
    Forbidden(String),

    /// HTTP 404
    #[error("Not found (HTTP 404): {0}")]
    NotFound(String),

    /// HTTP 429 after exhausting retries
    #[error("Rate limited by WordPress (HTTP 429)")]
    RateLimited,

    /// HTTP 5xx after exhausting retries
    #[error("WordPress server error: HTTP {status}")]
    Server { status: u16 },

    /// Any other 4xx, with the WordPress `{code, message}` body when available
    #[error("WordPress API error (HTTP {status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Connection, timeout or TLS failure
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("Failed to decode WordPress response: {0}")]
    Decode(String),

    /// Site URL could not be parsed
    #[error("Invalid site URL: {0}")]
    InvalidUrl(String),
}

/// Error body returned by the WP REST API (`{"code": ..., "message": ...}`)
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    message: String,
}

impl WordPressError {
    /// Map a non-success status and its body to the taxonomy
    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ApiErrorBody>(body).ok();
        let message = parsed
            .as_ref()
            .map(|b| b.message.clone())
            .unwrap_or_else(|| body.chars().take(200).collect());

        match status {
            401 => WordPressError::Authentication,
            403 => WordPressError::Forbidden(message),
            404 => WordPressError::NotFound(message),
            429 => WordPressError::RateLimited,
            500..=599 => WordPressError::Server { status },
            _ => WordPressError::Api {
                status,
                code: parsed
                    .map(|b| b.code)
                    .unwrap_or_else(|| "unknown".to_string()),
                message,
            },
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            WordPressError::Authentication => Some(401),
            WordPressError::Forbidden(_) => Some(403),
            WordPressError::NotFound(_) => Some(404),
            WordPressError::RateLimited => Some(429),
            WordPressError::Server { status } | WordPressError::Api { status, .. } => {
                Some(*status)
            }
            WordPressError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
