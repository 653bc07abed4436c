//! Large Language Model Integration
//!
//! OpenAI / Gemini のテキスト生成と画像生成を共通トレイトで扱う。

mod gemini;
mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{LlmProviderKind, LlmSettings};

/// LLMプロバイダーエラー
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("LLM API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM authentication failed, check the API key")]
    Authentication,

    #[error("LLM rate limit exceeded")]
    RateLimited,

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("{0} is not supported by this provider")]
    Unsupported(String),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// URL にクエリ等の秘密が含まれ得るため落としておく
impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Http(err.without_url())
    }
}

impl LlmError {
    /// Map a non-success response to an error
    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => LlmError::Authentication,
            429 => LlmError::RateLimited,
            _ => {
                // OpenAI / Gemini どちらも {"error": {"message": ...}} 形式
                let message = serde_json::from_str::<serde_json::Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.pointer("/error/message")
                            .and_then(|m| m.as_str())
                            .map(String::from)
                    })
                    .unwrap_or_else(|| body.chars().take(300).collect());
                LlmError::Api { status, message }
            }
        }
    }
}

/// チャットメッセージの役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// チャットメッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// システムメッセージ作成
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// ユーザーメッセージ作成
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// アシスタントメッセージ作成
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// テキスト生成リクエスト
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Provider default when `None`
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a single JSON object
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// LLMレスポンス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// 生成されたテキスト
    pub content: String,
    /// モデル名
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// 生成画像
#[derive(Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub revised_prompt: Option<String>,
}

impl std::fmt::Debug for GeneratedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedImage")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("revised_prompt", &self.revised_prompt)
            .finish()
    }
}

/// LLMクライアントトレイト
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// チャット形式でのテキスト生成
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse, LlmError>;

    /// 画像生成
    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, LlmError>;

    fn provider_name(&self) -> &'static str;

    fn model(&self) -> &str;
}

/// 設定からクライアントを作成
pub fn create_client(settings: &LlmSettings) -> Result<Arc<dyn LlmClient>, LlmError> {
    let api_key = settings
        .api_key
        .as_ref()
        .map(|k| k.expose_secret().trim().to_string())
        .filter(|k| !k.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| {
            let var = match settings.provider {
                LlmProviderKind::OpenAI => "OPENAI_API_KEY",
                LlmProviderKind::Gemini => "GEMINI_API_KEY",
            };
            LlmError::Config(format!(
                "no API key for provider '{}', set {}",
                settings.provider, var
            ))
        })?;

    let client: Arc<dyn LlmClient> = match settings.provider {
        LlmProviderKind::OpenAI => Arc::new(OpenAiClient::from_settings(settings, api_key)?),
        LlmProviderKind::Gemini => Arc::new(GeminiClient::from_settings(settings, api_key)?),
    };

    tracing::debug!(
        provider = client.provider_name(),
        model = client.model(),
        "LLM client created"
    );
    Ok(client)
}

/// Build the shared reqwest client for a provider
pub(crate) fn http_client(settings: &LlmSettings) -> Result<reqwest::Client, LlmError> {
    Ok(reqwest::Client::builder()
        .timeout(settings.timeout())
        .user_agent(concat!("pbn-manager/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
