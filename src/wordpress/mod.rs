//! WordPress REST API (`wp/v2`) client
//!
//! Application Password によるBasic認証、ページネーション、リトライ付き。

mod client;
mod error;
mod types;

pub use client::WordPressClient;
pub use error::WordPressError;
pub use types::{
    normalize_site_url, Category, ClientOptions, HealthReport, Media, NewPost, Page, Post,
    PostStatus, Rendered, SiteInfo, SiteStats, Tag, WordPressSite,
};
