//! Google Gemini API Integration
//!
//! `models/{model}:generateContent` を使用。画像生成は未対応。

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    http_client, CompletionRequest, GeneratedImage, LlmClient, LlmError, LlmResponse, Role,
    TokenUsage,
};
use crate::config::LlmSettings;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini APIクライアント
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: Client,
    base_url: String,
}

impl GeminiClient {
    pub fn from_settings(
        settings: &LlmSettings,
        api_key: impl Into<SecretString>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            api_key: api_key.into(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
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

    fn build_request<'a>(&self, request: &'a CompletionRequest) -> GenerateContentRequest<'a> {
        let system: Vec<Part<'a>> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| Part { text: &m.content })
            .collect();

        // assistant は Gemini では "model"
        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content {
                role: if m.role == Role::Assistant { "model" } else { "user" },
                parts: vec![Part { text: &m.content }],
            })
            .collect();

        GenerateContentRequest {
            contents,
            system_instruction: (!system.is_empty()).then_some(SystemInstruction { parts: system }),
            generation_config: GenerationConfig {
                temperature: request.temperature.unwrap_or(self.temperature),
                max_output_tokens: request.max_tokens.unwrap_or(self.max_tokens),
                response_mime_type: request.json_mode.then_some("application/json"),
            },
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse, LlmError> {
        let body = self.build_request(request);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        debug!(model = %self.model, json_mode = request.json_mode, "Gemini generateContent");
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            // Gemini は無効なキーを 400 API_KEY_INVALID で返す
            if status == 400 && error_text.contains("API_KEY_INVALID") {
                return Err(LlmError::Authentication);
            }
            return Err(LlmError::from_status(status, &error_text));
        }

        let api_response: GenerateContentResponse = response.json().await?;
        let content: String = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(LlmResponse {
            content,
            model: api_response
                .model_version
                .unwrap_or_else(|| self.model.clone()),
            usage: api_response.usage_metadata.map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
        })
    }

    async fn generate_image(&self, _prompt: &str) -> Result<GeneratedImage, LlmError> {
        Err(LlmError::Unsupported("image generation".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use mockito::{Matcher, Server};

    fn client(base_url: &str) -> GeminiClient {
        let settings = LlmSettings {
            model: "gemini-1.5-flash".to_string(),
            ..LlmSettings::default()
        };
        GeminiClient::from_settings(&settings, "g-key".to_string())
            .unwrap()
            .with_base_url(base_url)
    }

    #[tokio::test]
    async fn test_complete_maps_roles_and_system_instruction() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_header(API_KEY_HEADER, "g-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "systemInstruction": {"parts": [{"text": "sys"}]},
                "contents": [
                    {"role": "user", "parts": [{"text": "q"}]},
                    {"role": "model", "parts": [{"text": "a"}]},
                    {"role": "user", "parts": [{"text": "q2"}]}
                ],
                "generationConfig": {"responseMimeType": "application/json"}
            })))
            .with_body(
                r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"{\"a\":"},{"text":"1}"}]}}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2,"totalTokenCount":5},"modelVersion":"gemini-1.5-flash-002"}"#,
            )
            .create_async()
            .await;

        let request = CompletionRequest::new(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("q"),
            ChatMessage::assistant("a"),
            ChatMessage::user("q2"),
        ])
        .json();
        let response = client(&server.url()).complete(&request).await.unwrap();

        assert_eq!(response.content, r#"{"a":1}"#);
        assert_eq!(response.model, "gemini-1.5-flash-002");
        assert_eq!(response.usage.unwrap().total_tokens, 5);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#)
            .create_async()
            .await;

        let request = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        let err = client(&server.url()).complete(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::Authentication));
    }

    #[tokio::test]
    async fn test_transport_error_hides_key() {
        let settings = LlmSettings {
            model: "gemini-1.5-flash".to_string(),
            ..LlmSettings::default()
        };
        let client = GeminiClient::from_settings(&settings, "SUPERSECRETKEY")
            .unwrap()
            .with_base_url("http://127.0.0.1:1");

        let request = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        let err = client.complete(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::Http(_)));
        assert!(!err.to_string().contains("SUPERSECRETKEY"));
        assert!(!crate::Error::from(err).to_string().contains("SUPERSECRETKEY"));
    }

    #[test]
    fn test_debug_does_not_leak() {
        let debug = format!("{:?}", client("http://unused"));
        assert!(!debug.contains("g-key"));
        assert!(debug.contains("gemini-1.5-flash"));
    }

    #[tokio::test]
    async fn test_image_generation_unsupported() {
        let err = client("http://unused").generate_image("x").await.unwrap_err();
        assert!(matches!(err, LlmError::Unsupported(_)));
    }
}
