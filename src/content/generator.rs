//! Content Generator
//!
//! ブリーフ → 記事 → 内部リンク → メタタグ の生成パイプライン

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use super::brief::{extract_json_object, strip_code_fence, ContentBrief};
use super::interlink::{apply_interlinking, InterlinkRule};
use super::persona::{language_for, system_prompt_for, Persona};
use super::template::{self, PromptTemplate};
use super::ContentError;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, GeneratedImage, LlmClient};

const META_TITLE_MAX: usize = 60;
const META_DESCRIPTION_MAX: usize = 160;
const EXCERPT_CHARS: usize = 600;

/// Generated article body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub html: String,
}

/// SEO meta tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaTags {
    pub meta_title: String,
    pub meta_description: String,
    #[serde(default)]
    pub focus_keyword: String,
}

/// Result of the whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPost {
    pub brief: ContentBrief,
    pub article: Article,
    pub meta: MetaTags,
    /// Keywords linked by interlinking
    pub interlinks: Vec<String>,
}

/// LLMを使ったコンテンツ生成
#[derive(Clone)]
pub struct ContentGenerator {
    llm: Arc<dyn LlmClient>,
    overrides: HashMap<String, PromptTemplate>,
    max_links: usize,
}

impl std::fmt::Debug for ContentGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentGenerator")
            .field("provider", &self.llm.provider_name())
            .field("model", &self.llm.model())
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .field("max_links", &self.max_links)
            .finish()
    }
}

impl ContentGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            overrides: HashMap::new(),
            max_links: 3,
        }
    }

    /// Stored templates replace the built-ins of the same name
    pub fn with_templates(mut self, templates: impl IntoIterator<Item = PromptTemplate>) -> Self {
        self.set_templates(templates);
        self
    }

    pub fn set_templates(&mut self, templates: impl IntoIterator<Item = PromptTemplate>) {
        self.overrides = templates.into_iter().map(|t| (t.name.clone(), t)).collect();
    }

    pub fn with_max_links(mut self, max_links: usize) -> Self {
        self.max_links = max_links;
        self
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    fn template(&self, name: &str) -> std::result::Result<PromptTemplate, ContentError> {
        self.overrides
            .get(name)
            .cloned()
            .or_else(|| PromptTemplate::builtin(name))
            .ok_or_else(|| ContentError::UnknownTemplate(name.to_string()))
    }

    async fn ask(&self, persona: Option<&Persona>, prompt: String, json: bool) -> Result<String> {
        let mut request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt_for(persona)),
            ChatMessage::user(prompt),
        ]);
        if json {
            request = request.json();
        }
        let response = self.llm.complete(&request).await?;
        if let Some(usage) = &response.usage {
            debug!(
                model = %response.model,
                total_tokens = usage.total_tokens,
                "LLM call finished"
            );
        }
        Ok(response.content)
    }

    pub async fn generate_brief(&self, topic: &str, persona: Option<&Persona>) -> Result<ContentBrief> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(Error::InvalidInput("topic must not be empty".to_string()));
        }

        let vars = HashMap::from([
            ("topic", topic.to_string()),
            ("language", language_for(persona).to_string()),
        ]);
        let prompt = self.template(template::BRIEF)?.render(&vars)?;
        let answer = self.ask(persona, prompt, true).await?;

        let brief = ContentBrief::parse(&answer)?;
        info!(topic, title = %brief.title, sections = brief.sections.len(), "brief generated");
        Ok(brief)
    }

    pub async fn write_article(&self, brief: &ContentBrief, persona: Option<&Persona>) -> Result<Article> {
        let sections = brief
            .sections
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n");
        let vars = HashMap::from([
            ("title", brief.title.clone()),
            ("keywords", brief.keywords.join(", ")),
            ("audience", brief.target_audience.clone()),
            ("sections", sections),
            ("language", language_for(persona).to_string()),
        ]);
        let prompt = self.template(template::ARTICLE)?.render(&vars)?;
        let answer = self.ask(persona, prompt, false).await?;

        let html = strip_code_fence(&answer).to_string();
        if html.is_empty() {
            return Err(ContentError::InvalidResponse("empty article".to_string()).into());
        }
        Ok(Article {
            title: brief.title.clone(),
            html,
        })
    }

    pub async fn generate_meta(&self, article: &Article, persona: Option<&Persona>) -> Result<MetaTags> {
        let vars = HashMap::from([
            ("title", article.title.clone()),
            ("excerpt", excerpt(&article.html, EXCERPT_CHARS)),
            ("language", language_for(persona).to_string()),
        ]);
        let prompt = self.template(template::META)?.render(&vars)?;
        let answer = self.ask(persona, prompt, true).await?;

        let json = extract_json_object(&answer)
            .ok_or_else(|| ContentError::InvalidResponse("meta tags: no JSON object".to_string()))?;
        let mut meta: MetaTags = serde_json::from_str(json)
            .map_err(|e| ContentError::InvalidResponse(format!("meta tags: {e}")))?;

        meta.meta_title = truncate_chars(meta.meta_title.trim(), META_TITLE_MAX);
        meta.meta_description = truncate_chars(meta.meta_description.trim(), META_DESCRIPTION_MAX);
        meta.focus_keyword = meta.focus_keyword.trim().to_string();
        if meta.meta_title.is_empty() {
            meta.meta_title = truncate_chars(&article.title, META_TITLE_MAX);
        }
        Ok(meta)
    }

    pub async fn generate_image(&self, brief: &ContentBrief) -> Result<GeneratedImage> {
        let vars = HashMap::from([
            ("title", brief.title.clone()),
            ("keywords", brief.keywords.join(", ")),
        ]);
        let prompt = self.template(template::IMAGE)?.render(&vars)?;
        Ok(self.llm.generate_image(&prompt).await?)
    }

    /// brief → article → interlinking → meta
    pub async fn generate(
        &self,
        topic: &str,
        persona: Option<&Persona>,
        links: &[InterlinkRule],
    ) -> Result<GeneratedPost> {
        let brief = self.generate_brief(topic, persona).await?;
        let mut article = self.write_article(&brief, persona).await?;

        let linked = apply_interlinking(&article.html, links, self.max_links);
        article.html = linked.html;

        let mut meta = self.generate_meta(&article, persona).await?;
        if meta.focus_keyword.is_empty() {
            meta.focus_keyword = brief.focus_keyword().to_string();
        }

        Ok(GeneratedPost {
            brief,
            article,
            meta,
            interlinks: linked.applied,
        })
    }
}

/// Cut to at most `max` characters
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn tag_regex() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"))
}

/// Plain-text excerpt of an HTML body
fn excerpt(html: &str, max: usize) -> String {
    let text = tag_regex().replace_all(html, " ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::llm::{
        CompletionRequest, GeneratedImage, LlmClient, LlmError, LlmResponse,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns queued answers in order and records every request
    pub struct ScriptedLlm {
        answers: Mutex<VecDeque<String>>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLlm {
        pub fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            let content = self
                .answers
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(LlmError::EmptyResponse)?;
            Ok(LlmResponse {
                content,
                model: "scripted".to_string(),
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
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedLlm;
    use super::*;
    use crate::llm::Role;

    const BRIEF_JSON: &str = r#"{"title":"Brewing green tea","keywords":["green tea","teapot"],"target_audience":"beginners","sections":["Choosing leaves","Water temperature"]}"#;
    const ARTICLE_HTML: &str = "```html\n<h2>Choosing leaves</h2><p>Good green tea starts with leaves.</p>\n```";
    const META_JSON: &str = r#"{"meta_title":"Brewing green tea: a complete guide for beginners who love tea","meta_description":"Learn to brew.","focus_keyword":""}"#;

    #[tokio::test]
    async fn test_generate_pipeline() {
        let llm = Arc::new(ScriptedLlm::new(&[BRIEF_JSON, ARTICLE_HTML, META_JSON]));
        let generator = ContentGenerator::new(llm.clone());
        let persona = Persona::new("Tea master").with_language("Polish");
        let links = vec![InterlinkRule::new("green tea", "https://tea.example/green")];

        let post = generator
            .generate("green tea", Some(&persona), &links)
            .await
            .unwrap();

        assert_eq!(post.article.title, "Brewing green tea");
        assert!(post
            .article
            .html
            .contains("<a href=\"https://tea.example/green\">green tea</a>"));
        assert!(!post.article.html.contains("```"));
        assert_eq!(post.interlinks, vec!["green tea"]);
        assert_eq!(post.meta.meta_title.chars().count(), 60);
        assert_eq!(post.meta.focus_keyword, "green tea");

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].json_mode);
        assert!(!requests[1].json_mode);
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert!(requests[0].messages[0].content.contains("Tea master"));
        assert!(requests[0].messages[1].content.contains("Write in Polish"));
    }

    #[tokio::test]
    async fn test_template_override_is_used() {
        let llm = Arc::new(ScriptedLlm::new(&[BRIEF_JSON]));
        let generator = ContentGenerator::new(llm.clone())
            .with_templates([PromptTemplate::new("brief", "CUSTOM {topic}")]);

        generator.generate_brief("kombucha", None).await.unwrap();
        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[0].messages[1].content, "CUSTOM kombucha");
    }

    #[tokio::test]
    async fn test_invalid_brief_is_content_error() {
        let llm = Arc::new(ScriptedLlm::new(&["I cannot help with that."]));
        let generator = ContentGenerator::new(llm);
        let err = generator.generate_brief("x", None).await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Content(ContentError::InvalidBrief(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_image_uses_brief() {
        let llm = Arc::new(ScriptedLlm::new(&[]));
        let generator = ContentGenerator::new(llm);
        let brief = ContentBrief::parse(BRIEF_JSON).unwrap();
        let image = generator.generate_image(&brief).await.unwrap();
        let prompt = String::from_utf8(image.bytes).unwrap();
        assert!(prompt.contains("Brewing green tea"));
        assert!(prompt.contains("green tea, teapot"));
    }

    #[test]
    fn test_excerpt_and_truncate() {
        assert_eq!(excerpt("<h2>A</h2>\n<p>b  c</p>", 100), "A b c");
        assert_eq!(truncate_chars("zażółć", 3), "zaż");
    }
}
