//! # pbn-manager
//!
//! Private blog network manager for WordPress sites.
//!
//! Sites are registered with Application Passwords (stored encrypted), queried
//! concurrently for statistics, and fed with posts scheduled through the
//! WordPress REST API. An optional LLM pipeline writes the posts: brief,
//! article, internal links and meta tags.

pub mod config;
pub mod content;
pub mod error;
pub mod llm;
pub mod logging;
pub mod manager;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod store;
pub mod wordpress;

pub use config::PbnConfig;
pub use error::{Error, Result};
pub use manager::PbnManager;
pub use wordpress::{WordPressClient, WordPressSite};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::SiteNotFound("https://example.com".to_string());
        assert!(err.to_string().contains("example.com"));
        assert!(err.is_client_error());
    }
}
