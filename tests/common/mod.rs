//! 統合テスト用ヘルパー

#![allow(dead_code)]

use async_trait::async_trait;
use pbn_manager::config::PbnConfig;
use pbn_manager::llm::{CompletionRequest, GeneratedImage, LlmClient, LlmError, LlmResponse};
use pbn_manager::security::{CredentialCipher, MasterKey};
use pbn_manager::store::{MemoryStore, PbnStore};
use pbn_manager::wordpress::ClientOptions;
use pbn_manager::PbnManager;
use secrecy::SecretString;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BRIEF_JSON: &str = r#"{"title":"How to brew green tea","keywords":["green tea","teapot"],"target_audience":"tea beginners","sections":["Choosing leaves","Water temperature"]}"#;
pub const ARTICLE_HTML: &str = "<h2>Choosing leaves</h2><p>Good green tea needs a warm teapot.</p><h2>Water temperature</h2><p>Keep it below boiling.</p>";
pub const META_JSON: &str = r#"{"meta_title":"How to brew green tea","meta_description":"Leaves, water and timing for a better cup.","focus_keyword":"green tea"}"#;

/// Scripted LLM: answers in order, image bytes are the prompt
pub struct FakeLlm {
    answers: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<CompletionRequest>>,
}

impl FakeLlm {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// brief, article, meta for `posts` posts
    pub fn for_posts(posts: usize) -> Self {
        let answers: Vec<&str> = (0..posts)
            .flat_map(|_| [BRIEF_JSON, ARTICLE_HTML, META_JSON])
            .collect();
        Self::new(&answers)
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse, LlmError> {
        self.prompts.lock().unwrap().push(request.clone());
        let content = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::EmptyResponse)?;
        Ok(LlmResponse {
            content,
            model: "fake".to_string(),
            usage: None,
        })
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, LlmError> {
        Ok(GeneratedImage {
            bytes: prompt.as_bytes().to_vec(),
            mime_type: "image/png".to_string(),
            revised_prompt: None,
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-1"
    }
}

pub fn cipher() -> CredentialCipher {
    CredentialCipher::new(MasterKey::new(SecretString::from("integration master key")).unwrap())
}

/// Manager on an in-memory store with fast retries
pub fn manager_with_store(store: Arc<dyn PbnStore>) -> PbnManager {
    PbnManager::new(store, cipher(), &PbnConfig::default()).with_client_options(ClientOptions {
        max_retries: 2,
        retry_delay: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
        ..ClientOptions::default()
    })
}

pub fn manager() -> PbnManager {
    manager_with_store(Arc::new(MemoryStore::new()))
}
