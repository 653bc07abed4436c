//! Persistence of sites, personas, prompt templates and interlink rules
//!
//! バックエンド: SQLite (sqlx)、JSONファイル、インメモリ。

mod json;
mod memory;
mod sqlite;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use crate::content::{InterlinkRule, Persona, PromptTemplate};
use crate::config::{StorageBackend, StorageConfig};
use crate::security::EncryptedSecret;

/// ストアエラー
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupted record: {0}")]
    Corrupt(String),
}

/// Registered site with its encrypted application password
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSite {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: EncryptedSecret,
    pub created_at: DateTime<Utc>,
}

/// Site to insert; the store assigns id and timestamp
#[derive(Debug, Clone)]
pub struct NewSite {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: EncryptedSecret,
}

/// ストアトレイト
///
/// Site URLs and interlink keywords (case-insensitive) are unique.
/// Deleting a missing record is [`StoreError::NotFound`].
#[async_trait]
pub trait PbnStore: Send + Sync {
    /// サイトを登録（URL重複は `Duplicate`）
    async fn insert_site(&self, site: NewSite) -> Result<StoredSite, StoreError>;

    /// 登録順（id順）
    async fn list_sites(&self) -> Result<Vec<StoredSite>, StoreError>;

    async fn get_site(&self, id: i64) -> Result<Option<StoredSite>, StoreError>;

    async fn find_site_by_url(&self, url: &str) -> Result<Option<StoredSite>, StoreError>;

    async fn delete_site(&self, id: i64) -> Result<(), StoreError>;

    /// Insert or replace by name; the returned persona carries its id
    async fn upsert_persona(&self, persona: Persona) -> Result<Persona, StoreError>;

    async fn list_personas(&self) -> Result<Vec<Persona>, StoreError>;

    async fn get_persona(&self, name: &str) -> Result<Option<Persona>, StoreError>;

    async fn delete_persona(&self, name: &str) -> Result<(), StoreError>;

    async fn upsert_prompt(&self, prompt: PromptTemplate) -> Result<(), StoreError>;

    async fn get_prompt(&self, name: &str) -> Result<Option<PromptTemplate>, StoreError>;

    async fn list_prompts(&self) -> Result<Vec<PromptTemplate>, StoreError>;

    /// Insert or replace by keyword; rules keep their first insertion order
    async fn upsert_link(&self, rule: InterlinkRule) -> Result<(), StoreError>;

    async fn list_links(&self) -> Result<Vec<InterlinkRule>, StoreError>;

    async fn delete_link(&self, keyword: &str) -> Result<(), StoreError>;
}

/// 設定に応じたストアを開く
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn PbnStore>, StoreError> {
    let path = config.effective_path();
    let store: Arc<dyn PbnStore> = match config.backend {
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&path).await?),
        StorageBackend::Json => Arc::new(JsonFileStore::open(&path).await?),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };
    tracing::info!(backend = ?config.backend, path = %path.display(), "store opened");
    Ok(store)
}

/// Case-insensitive key of an interlink keyword
pub(crate) fn link_key(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}
