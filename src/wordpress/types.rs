use chrono::NaiveDateTime;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::error::WordPressError;
use crate::config::WordPressSettings;

/// Connection details of a single WordPress installation
#[derive(Debug, Clone)]
pub struct WordPressSite {
    /// Store id, `None` for sites not (yet) persisted
    pub id: Option<i64>,
    pub name: String,
    /// Normalised base URL without trailing slash
    pub url: String,
    pub username: String,
    /// Application Password
    pub password: SecretString,
}

impl WordPressSite {
    pub fn new(
        url: &str,
        username: impl Into<String>,
        password: impl Into<SecretString>,
    ) -> Result<Self, WordPressError> {
        let url = normalize_site_url(url)?;
        Ok(Self {
            id: None,
            name: url.clone(),
            url,
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

/// Normalise a user supplied site URL
///
/// Accepts `http`/`https` URLs with a host, drops query and fragment and
/// strips the trailing slash. Sub-directory installs keep their path.
pub fn normalize_site_url(raw: &str) -> Result<String, WordPressError> {
    let trimmed = raw.trim();
    let mut parsed =
        url::Url::parse(trimmed).map_err(|e| WordPressError::InvalidUrl(format!("{trimmed}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WordPressError::InvalidUrl(format!(
            "{trimmed}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(WordPressError::InvalidUrl(format!("{trimmed}: missing host")));
    }

    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// HTTP behaviour of a client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub per_page: u32,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&WordPressSettings::default())
    }
}

impl From<&WordPressSettings> for ClientOptions {
    fn from(settings: &WordPressSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            connect_timeout: settings.connect_timeout(),
            max_retries: settings.max_retries.max(1),
            retry_delay: settings.retry_delay(),
            per_page: settings.per_page.clamp(1, 100),
            user_agent: settings.user_agent.clone(),
        }
    }
}

/// Post status values accepted by `wp/v2/posts`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Publish,
    Future,
    Draft,
    Pending,
    Private,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rendered {
    pub rendered: String,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub date: Option<String>,
    pub status: PostStatus,
    pub link: Option<String>,
    pub slug: Option<String>,
    pub title: Rendered,
    pub content: Option<Rendered>,
    #[serde(default)]
    pub categories: Vec<u64>,
    #[serde(default)]
    pub tags: Vec<u64>,
    pub featured_media: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: u64,
    pub source_url: Option<String>,
    pub mime_type: Option<String>,
    pub media_type: Option<String>,
}

/// Payload for creating a post
#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub status: PostStatus,
    /// Site-local publication time, sent as `YYYY-MM-DDTHH:MM:SS`
    #[serde(serialize_with = "wp_date::serialize", skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDateTime>,
    pub categories: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_media: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl NewPost {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            status: PostStatus::Draft,
            date: None,
            categories: Vec::new(),
            tags: Vec::new(),
            excerpt: None,
            slug: None,
            featured_media: None,
            meta: BTreeMap::new(),
        }
    }

    /// 予約投稿（`status: future` と `date`）
    pub fn scheduled(
        title: impl Into<String>,
        content: impl Into<String>,
        categories: Vec<u64>,
        publish_at: NaiveDateTime,
    ) -> Self {
        Self {
            status: PostStatus::Future,
            date: Some(publish_at),
            categories,
            ..Self::new(title, content)
        }
    }

    pub fn with_status(mut self, status: PostStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    pub fn with_featured_media(mut self, media_id: u64) -> Self {
        self.featured_media = Some(media_id);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

mod wp_date {
    use chrono::NaiveDateTime;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(
        date: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => serializer.serialize_str(&d.format("%Y-%m-%dT%H:%M:%S").to_string()),
            None => serializer.serialize_none(),
        }
    }
}

/// Per-site statistics: total posts and `category name -> post count`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStats {
    pub posts: u64,
    pub categories: BTreeMap<String, u64>,
}

/// One page of a collection plus the pagination headers
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `X-WP-Total`
    pub total: Option<u64>,
    /// `X-WP-TotalPages`
    pub total_pages: Option<u32>,
}

/// Root index (`/wp-json`) summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    pub timezone_string: Option<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub site_accessible: bool,
    pub rest_api_available: bool,
    pub authentication_valid: bool,
    pub user: Option<String>,
    pub site_info: Option<SiteInfo>,
    pub error_details: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.site_accessible && self.rest_api_available && self.authentication_valid
    }
}
