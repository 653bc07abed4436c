use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::error::WordPressError;
use super::types::{
    Category, ClientOptions, HealthReport, Media, NewPost, Page, Post, SiteInfo, SiteStats, Tag,
    WordPressSite,
};

const TOTAL_HEADER: &str = "x-wp-total";
const TOTAL_PAGES_HEADER: &str = "x-wp-totalpages";

/// Typed client for one site's `wp/v2` REST API
#[derive(Debug, Clone)]
pub struct WordPressClient {
    client: Client,
    site: WordPressSite,
    api_base: String,
    options: ClientOptions,
}

impl WordPressClient {
    pub fn new(site: WordPressSite, options: ClientOptions) -> Result<Self, WordPressError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.clone())
            .build()?;

        let api_base = format!("{}/wp-json/wp/v2", site.url);

        Ok(Self {
            client,
            site,
            api_base,
            options,
        })
    }

    pub fn site(&self) -> &WordPressSite {
        &self.site
    }

    /// Basic認証付きリクエストを作成
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.site.username, Some(self.site.password.expose_secret()))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// リトライ機能付きでHTTPリクエストを実行
    ///
    /// `build` is called once per attempt so that non-cloneable bodies
    /// (multipart uploads) can be resent.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, WordPressError>
    where
        F: Fn() -> Result<RequestBuilder, WordPressError>,
    {
        let max_retries = self.options.max_retries.max(1);

        for attempt in 1..=max_retries {
            match build()?.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    let code = status.as_u16();
                    if code >= 500 || code == 429 {
                        // サーバーエラーまたはレート制限の場合はリトライ
                        warn!(site = %self.site.url, %status, attempt, "retryable HTTP status");
                        if attempt == max_retries {
                            let body = response.text().await.unwrap_or_default();
                            return Err(WordPressError::from_status(code, &body));
                        }
                    } else {
                        // クライアントエラー（4xx）はリトライしない
                        let body = response.text().await.unwrap_or_default();
                        return Err(WordPressError::from_status(code, &body));
                    }
                }
                Err(e) => {
                    if e.is_timeout() {
                        warn!(site = %self.site.url, attempt, "request timeout: {}", e);
                    } else if e.is_connect() {
                        warn!(site = %self.site.url, attempt, "connection error: {}", e);
                    } else {
                        warn!(site = %self.site.url, attempt, "request error: {}", e);
                    }

                    if attempt == max_retries {
                        return Err(WordPressError::Transport(e));
                    }
                }
            }

            tokio::time::sleep(self.options.retry_delay * attempt).await;
        }

        Err(WordPressError::Decode(
            "retry loop finished without a response".to_string(),
        ))
    }

    /// Decode a success body; an empty body is treated as JSON `null`
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, WordPressError> {
        let text = response.text().await?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| {
            let preview: String = text.chars().take(200).collect();
            WordPressError::Decode(format!("{e} (body: {preview})"))
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, WordPressError> {
        let response = self
            .send_with_retry(|| Ok(self.request(Method::GET, url).query(query)))
            .await?;
        Self::decode(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, WordPressError> {
        let response = self
            .send_with_retry(|| Ok(self.request(Method::POST, url).json(body)))
            .await?;
        Self::decode(response).await
    }

    /// One page of a collection with the `X-WP-Total*` headers
    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<T>, WordPressError> {
        let url = self.endpoint(path);
        let query = [
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        let response = self
            .send_with_retry(|| Ok(self.request(Method::GET, &url).query(&query)))
            .await?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };
        let total = header(TOTAL_HEADER).and_then(|v| v.parse::<u64>().ok());
        let total_pages = header(TOTAL_PAGES_HEADER).and_then(|v| v.parse::<u32>().ok());

        let items: Option<Vec<T>> = Self::decode(response).await?;
        Ok(Page {
            items: items.unwrap_or_default(),
            total,
            total_pages,
        })
    }

    /// Walk every page of a collection
    async fn get_all_pages<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, WordPressError> {
        let per_page = self.options.per_page;
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let batch: Page<T> = self.get_page(path, page, per_page).await?;
            let received = batch.items.len();
            all.extend(batch.items);

            let last_page = match batch.total_pages {
                Some(total_pages) => page >= total_pages,
                None => received < per_page as usize,
            };
            if last_page || received == 0 {
                break;
            }
            page += 1;
        }

        debug!(site = %self.site.url, path, count = all.len(), "collection fetched");
        Ok(all)
    }

    /// Post count and `category name -> count`
    pub async fn get_stats(&self) -> Result<SiteStats, WordPressError> {
        let posts: Page<serde_json::Value> =
            self.get_page("posts", 1, self.options.per_page).await?;
        let post_count = posts.total.unwrap_or(posts.items.len() as u64);

        let categories = self
            .list_categories()
            .await?
            .into_iter()
            .map(|c| (c.name, c.count))
            .collect();

        Ok(SiteStats {
            posts: post_count,
            categories,
        })
    }

    pub async fn list_posts(&self, page: u32, per_page: u32) -> Result<Page<Post>, WordPressError> {
        self.get_page("posts", page.max(1), per_page.clamp(1, 100))
            .await
    }

    pub async fn get_post(&self, post_id: u64) -> Result<Post, WordPressError> {
        self.get_json(&self.endpoint(&format!("posts/{post_id}")), &[])
            .await
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, WordPressError> {
        self.get_all_pages("categories").await
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>, WordPressError> {
        self.get_all_pages("tags").await
    }

    pub async fn create_category(&self, name: &str) -> Result<Category, WordPressError> {
        info!(site = %self.site.url, name, "creating category");
        self.post_json(&self.endpoint("categories"), &json!({ "name": name }))
            .await
    }

    /// Resolve category names to ids, creating the missing ones
    ///
    /// Names are compared case-insensitively; the result keeps the input order.
    pub async fn ensure_categories(&self, names: &[String]) -> Result<Vec<u64>, WordPressError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut known: HashMap<String, u64> = self
            .list_categories()
            .await?
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c.id))
            .collect();

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let key = name.to_lowercase();
            let id = match known.get(&key) {
                Some(id) => *id,
                None => {
                    let created = self.create_category(name).await?;
                    known.insert(key, created.id);
                    created.id
                }
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub async fn create_post(&self, post: &NewPost) -> Result<Post, WordPressError> {
        let body = serde_json::to_value(post).map_err(|e| WordPressError::Decode(e.to_string()))?;
        info!(site = %self.site.url, title = %post.title, status = ?post.status, "creating post");
        self.post_json(&self.endpoint("posts"), &body).await
    }

    /// Create a `future` post published by WordPress at `publish_at`
    pub async fn schedule_post(
        &self,
        title: &str,
        content: &str,
        categories: Vec<u64>,
        publish_at: chrono::NaiveDateTime,
    ) -> Result<Post, WordPressError> {
        let post = NewPost::scheduled(title, content, categories, publish_at);
        self.create_post(&post).await
    }

    /// Partial update, `patch` is sent as-is
    pub async fn update_post(
        &self,
        post_id: u64,
        patch: &serde_json::Value,
    ) -> Result<Post, WordPressError> {
        self.post_json(&self.endpoint(&format!("posts/{post_id}")), patch)
            .await
    }

    pub async fn upload_media(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<Media, WordPressError> {
        let url = self.endpoint("media");
        info!(site = %self.site.url, filename, mime_type, size = bytes.len(), "uploading media");

        let response = self
            .send_with_retry(|| {
                let part = reqwest::multipart::Part::bytes(bytes.to_vec())
                    .file_name(filename.to_string())
                    .mime_str(mime_type)
                    .map_err(|e| WordPressError::Decode(format!("invalid MIME type: {e}")))?;
                let form = reqwest::multipart::Form::new().part("file", part);
                Ok(self.request(Method::POST, &url).multipart(form))
            })
            .await?;
        Self::decode(response).await
    }

    pub async fn set_featured_image(&self, post_id: u64, media_id: u64) -> Result<Post, WordPressError> {
        self.update_post(post_id, &json!({ "featured_media": media_id }))
            .await
    }

    /// Reachability, REST namespace and credential check
    ///
    /// Stops at the first failing step; the failure is recorded in
    /// `error_details`.
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport::default();
        info!(site = %self.site.url, "starting WordPress health check");

        let index_url = format!("{}/wp-json", self.site.url);
        let info: SiteInfo = match self.get_json(&index_url, &[]).await {
            Ok(info) => info,
            Err(e) => {
                warn!(site = %self.site.url, "site accessibility failed: {}", e);
                report.error_details.push(format!("Site accessibility failed: {e}"));
                return report;
            }
        };
        report.site_accessible = true;
        report.rest_api_available = info.namespaces.iter().any(|ns| ns == "wp/v2");
        report.site_info = Some(info);

        if !report.rest_api_available {
            report
                .error_details
                .push("WordPress REST API v2 not available".to_string());
            return report;
        }

        match self
            .get_json::<serde_json::Value>(&self.endpoint("users/me"), &[])
            .await
        {
            Ok(me) => {
                report.authentication_valid = true;
                report.user = me.get("name").and_then(|v| v.as_str()).map(String::from);
            }
            Err(e) => {
                warn!(site = %self.site.url, "authentication failed: {}", e);
                report.error_details.push(format!("Authentication failed: {e}"));
            }
        }

        report
    }
}
