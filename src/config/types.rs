use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PbnConfig {
    /// HTTP API server
    pub server: ServerConfig,

    /// Site / persona / prompt persistence
    pub storage: StorageConfig,

    /// WordPress REST client defaults
    pub wordpress: WordPressSettings,

    /// LLM provider used for content generation
    pub llm: LlmSettings,

    /// Publication scheduling defaults
    pub scheduling: SchedulingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address of the management API
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Storage backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// sqlx SQLite database
    Sqlite,
    /// Single JSON document on disk
    Json,
    /// In-process only, lost on exit
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind
    pub backend: StorageBackend,

    /// Database / JSON file path
    pub path: PathBuf,

    /// Master key used to encrypt site passwords (never serialized)
    #[serde(skip_serializing)]
    pub master_key: Option<SecretString>,
}

const DEFAULT_DB_PATH: &str = "pbn-manager.db";
const DEFAULT_JSON_PATH: &str = "sites.json";

impl StorageConfig {
    /// Path actually used by the backend (`sites.json` for an unset json path)
    pub fn effective_path(&self) -> PathBuf {
        if self.backend == StorageBackend::Json && self.path == Path::new(DEFAULT_DB_PATH) {
            PathBuf::from(DEFAULT_JSON_PATH)
        } else {
            self.path.clone()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from(DEFAULT_DB_PATH),
            master_key: None,
        }
    }
}

/// WordPress client settings shared by every registered site
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WordPressSettings {
    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Connect timeout in seconds
    pub connect_timeout_seconds: u64,

    /// Attempts for retryable failures (transport, 429, 5xx)
    pub max_retries: u32,

    /// Base delay between retries; attempt `n` waits `n * retry_delay_ms`
    pub retry_delay_ms: u64,

    /// Page size for collection endpoints (WordPress caps it at 100)
    pub per_page: u32,

    /// Sites queried at the same time by aggregate operations
    pub max_concurrency: usize,

    /// User-Agent header
    pub user_agent: String,
}

impl Default for WordPressSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            connect_timeout_seconds: 10,
            max_retries: 3,
            retry_delay_ms: 1000,
            per_page: 100,
            max_concurrency: 8,
            user_agent: format!("pbn-manager/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl WordPressSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// LLM provider kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    /// OpenAI chat completions / images
    OpenAI,
    /// Google Gemini generateContent
    Gemini,
}

impl std::fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProviderKind::OpenAI => write!(f, "openai"),
            LlmProviderKind::Gemini => write!(f, "gemini"),
        }
    }
}

/// LLM設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// プロバイダー
    pub provider: LlmProviderKind,
    /// モデル名
    pub model: String,
    /// APIキー（セキュア、シリアライズしない）
    #[serde(skip_serializing)]
    pub api_key: Option<SecretString>,
    /// APIエンドポイント（省略時はプロバイダー既定値）
    pub endpoint: Option<String>,
    /// 温度（0.0-2.0）
    pub temperature: f32,
    /// 最大トークン数
    pub max_tokens: u32,
    /// リクエストタイムアウト（秒）
    pub timeout_seconds: u64,
    /// 画像生成モデル
    pub image_model: String,
    /// 画像サイズ
    pub image_size: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::OpenAI,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            endpoint: None,
            temperature: 0.7,
            max_tokens: 2048,
            timeout_seconds: 60,
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
        }
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Publication scheduling defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Hours between consecutive posts of a campaign
    pub interval_hours: u32,
    /// Hour of day (local site time) used for the first slot
    pub publish_hour: u32,
    /// Maximum interlinks inserted per article
    pub max_links_per_post: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            publish_hour: 10,
            max_links_per_post: 3,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level / EnvFilter directive
    pub level: String,
    /// Directory for rolling log files
    pub dir: PathBuf,
    /// Console output
    pub console: bool,
    /// Daily rolling file output
    pub file: bool,
    /// JSON formatted records
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
            console: true,
            file: false,
            json: false,
        }
    }
}
