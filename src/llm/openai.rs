//! OpenAI API Integration
//!
//! Chat Completions と Images API（b64_json）

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    http_client, ChatMessage, CompletionRequest, GeneratedImage, LlmClient, LlmError, LlmResponse,
    TokenUsage,
};
use crate::config::LlmSettings;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI APIクライアント
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    temperature: f32,
    image_model: String,
    image_size: String,
    client: Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn from_settings(
        settings: &LlmSettings,
        api_key: impl Into<SecretString>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            api_key: api_key.into(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            image_model: settings.image_model.clone(),
            image_size: settings.image_size.clone(),
            client: http_client(settings)?,
            base_url: settings
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// ビルダーパターン: カスタムベースURL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &error_text));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
            response_format: request
                .json_mode
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        debug!(model = %self.model, json_mode = request.json_mode, "OpenAI chat completion");
        let api_response: ChatCompletionResponse =
            self.post("chat/completions", &body).await?.json().await?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        Ok(LlmResponse {
            content,
            model: api_response.model.unwrap_or_else(|| self.model.clone()),
            usage: api_response.usage,
        })
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, LlmError> {
        let body = ImageRequest {
            model: &self.image_model,
            prompt,
            n: 1,
            size: &self.image_size,
            response_format: "b64_json",
        };

        debug!(model = %self.image_model, size = %self.image_size, "OpenAI image generation");
        let api_response: ImageResponse =
            self.post("images/generations", &body).await?.json().await?;

        let image = api_response
            .data
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;
        let encoded = image.b64_json.ok_or(LlmError::EmptyResponse)?;
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| LlmError::Api {
                status: 200,
                message: format!("invalid base64 image data: {e}"),
            })?;

        Ok(GeneratedImage {
            bytes,
            mime_type: "image/png".to_string(),
            revised_prompt: image.revised_prompt,
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// チャット完了リクエスト
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// チャット完了レスポンス
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
    revised_prompt: Option<String>,
}
