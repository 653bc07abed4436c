//! PBN Manager
//!
//! 複数サイトの登録・統計集計・投稿予約・キャンペーン実行。

use chrono::{Local, NaiveDateTime};
use futures::stream::{self, StreamExt};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{PbnConfig, SchedulingConfig};
use crate::content::{ContentGenerator, GeneratedPost, InterlinkRule, Persona, PromptTemplate};
use crate::error::{Error, Result};
use crate::llm;
use crate::scheduler::{next_publish_slot, status_for, SchedulePlan};
use crate::security::{CredentialCipher, MasterKey};
use crate::store::{self, NewSite, PbnStore, StoreError, StoredSite};
use crate::wordpress::{
    normalize_site_url, ClientOptions, HealthReport, NewPost, Post, SiteStats, WordPressClient,
    WordPressSite,
};

/// Per-site result of a fan-out operation
///
/// Serialized as the value itself or `{"error": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SiteOutcome<T> {
    Ok(T),
    Failed { error: String },
}

impl<T> SiteOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, SiteOutcome::Ok(_))
    }
}

impl<T> From<Result<T>> for SiteOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => SiteOutcome::Ok(value),
            Err(e) => SiteOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}

pub type SiteStatsOutcome = SiteOutcome<SiteStats>;

/// Category given either by WordPress id or by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryRef {
    Id(u64),
    Name(String),
}

/// Post to schedule on a registered site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
    /// Site-local publication time
    pub publish_at: NaiveDateTime,
}

/// Batch of generated posts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub topics: Vec<String>,
    /// Target site URLs; topics are assigned round-robin
    pub sites: Vec<String>,
    #[serde(default)]
    pub persona: Option<String>,
    /// First slot, defaults to the next configured publish hour
    #[serde(default)]
    pub start: Option<NaiveDateTime>,
    #[serde(default)]
    pub interval_hours: Option<u32>,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
    #[serde(default)]
    pub featured_image: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPostOutcome {
    pub topic: String,
    pub site: String,
    pub publish_at: NaiveDateTime,
    pub title: Option<String>,
    pub post_id: Option<u64>,
    pub link: Option<String>,
    pub interlinks: Vec<String>,
    pub featured_media: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignReport {
    pub posts: Vec<CampaignPostOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

/// PBNマネージャー
pub struct PbnManager {
    store: Arc<dyn PbnStore>,
    cipher: CredentialCipher,
    options: ClientOptions,
    max_concurrency: usize,
    scheduling: SchedulingConfig,
    generator: Option<ContentGenerator>,
}

impl std::fmt::Debug for PbnManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PbnManager")
            .field("options", &self.options)
            .field("max_concurrency", &self.max_concurrency)
            .field("generator", &self.generator)
            .finish_non_exhaustive()
    }
}

impl PbnManager {
    pub fn new(store: Arc<dyn PbnStore>, cipher: CredentialCipher, config: &PbnConfig) -> Self {
        Self {
            store,
            cipher,
            options: ClientOptions::from(&config.wordpress),
            max_concurrency: config.wordpress.max_concurrency.max(1),
            scheduling: config.scheduling.clone(),
            generator: None,
        }
    }

    /// 設定からストア・暗号化・LLMを組み立てる
    ///
    /// The LLM client is optional: without an API key every operation except
    /// content generation works.
    pub async fn from_config(config: &PbnConfig) -> Result<Self> {
        let master_key = config.storage.master_key.clone().ok_or_else(|| {
            Error::Config("master key missing, set PBN_MASTER_KEY".to_string())
        })?;
        let cipher = CredentialCipher::new(MasterKey::new(master_key)?);
        let store = store::open_store(&config.storage).await?;

        let mut manager = Self::new(store, cipher, config);
        match llm::create_client(&config.llm) {
            Ok(client) => {
                manager.generator = Some(
                    ContentGenerator::new(client)
                        .with_max_links(config.scheduling.max_links_per_post),
                );
            }
            Err(e) => info!("content generation disabled: {}", e),
        }
        Ok(manager)
    }

    pub fn with_generator(mut self, generator: ContentGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_client_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// LLM が設定されているか
    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    // ---- sites ----

    /// サイトを登録（URL正規化・パスワード暗号化）
    pub async fn add_site(
        &self,
        name: Option<&str>,
        url: &str,
        username: &str,
        password: SecretString,
    ) -> Result<StoredSite> {
        let url = normalize_site_url(url)?;
        if username.trim().is_empty() {
            return Err(Error::InvalidInput("username must not be empty".to_string()));
        }
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&url)
            .to_string();

        let site = self
            .store
            .insert_site(NewSite {
                name,
                url,
                username: username.trim().to_string(),
                password: self.cipher.encrypt(&password)?,
            })
            .await?;
        info!(id = site.id, url = %site.url, "site registered");
        Ok(site)
    }

    pub async fn remove_site(&self, id: i64) -> Result<()> {
        match self.store.delete_site(id).await {
            Ok(()) => {
                info!(id, "site removed");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(Error::SiteNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn sites(&self) -> Result<Vec<StoredSite>> {
        Ok(self.store.list_sites().await?)
    }

    /// Registered site by URL (normalised before lookup)
    pub async fn site_by_url(&self, url: &str) -> Result<StoredSite> {
        let normalized = normalize_site_url(url)?;
        self.store
            .find_site_by_url(&normalized)
            .await?
            .ok_or(Error::SiteNotFound(normalized))
    }

    /// Client with the decrypted application password
    pub fn client_for(&self, site: &StoredSite) -> Result<WordPressClient> {
        let password = self.cipher.decrypt(&site.password)?;
        let wp_site = WordPressSite {
            id: Some(site.id),
            name: site.name.clone(),
            url: site.url.clone(),
            username: site.username.clone(),
            password,
        };
        Ok(WordPressClient::new(wp_site, self.options.clone())?)
    }

    /// 全サイトの統計を並列取得
    ///
    /// A failing site reports its error and never hides the others.
    pub async fn aggregate_stats(&self) -> Result<BTreeMap<String, SiteStatsOutcome>> {
        let sites = self.store.list_sites().await?;
        info!(sites = sites.len(), "collecting statistics");

        let results = stream::iter(sites)
            .map(|site| async move {
                let outcome = match self.client_for(&site) {
                    Ok(client) => client.get_stats().await.map_err(Error::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = &outcome {
                    warn!(url = %site.url, "statistics failed: {}", e);
                }
                (site.url, SiteOutcome::from(outcome))
            })
            .buffer_unordered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(results.into_iter().collect())
    }

    pub async fn health_check_all(&self) -> Result<BTreeMap<String, SiteOutcome<HealthReport>>> {
        let sites = self.store.list_sites().await?;

        let results = stream::iter(sites)
            .map(|site| async move {
                let outcome = match self.client_for(&site) {
                    Ok(client) => Ok(client.health_check().await),
                    Err(e) => Err(e),
                };
                (site.url, SiteOutcome::from(outcome))
            })
            .buffer_unordered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(results.into_iter().collect())
    }

    async fn resolve_categories(
        &self,
        client: &WordPressClient,
        categories: &[CategoryRef],
    ) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        let mut names = Vec::new();
        for category in categories {
            match category {
                CategoryRef::Id(id) => ids.push(*id),
                CategoryRef::Name(name) => names.push(name.clone()),
            }
        }
        for id in client.ensure_categories(&names).await? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// 投稿を予約
    ///
    /// A publish time that is not in the future publishes immediately.
    pub async fn schedule_post(&self, site_url: &str, request: ScheduleRequest) -> Result<Post> {
        if request.title.trim().is_empty() {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }
        let site = self.site_by_url(site_url).await?;
        let client = self.client_for(&site)?;
        let categories = self.resolve_categories(&client, &request.categories).await?;

        let status = status_for(request.publish_at, Local::now().naive_local());
        let post = NewPost::scheduled(
            request.title.trim(),
            request.content,
            categories,
            request.publish_at,
        )
        .with_status(status);

        let created = client.create_post(&post).await?;
        info!(url = %site.url, post_id = created.id, publish_at = %request.publish_at, ?status, "post scheduled");
        Ok(created)
    }

    // ---- content ----

    /// Generator with the stored prompt overrides applied
    async fn generator(&self) -> Result<ContentGenerator> {
        let generator = self.generator.as_ref().ok_or_else(|| {
            Error::Config(
                "content generation requires an LLM API key (OPENAI_API_KEY or GEMINI_API_KEY)"
                    .to_string(),
            )
        })?;
        let prompts = self.store.list_prompts().await?;
        Ok(generator.clone().with_templates(prompts))
    }

    async fn persona_by_name(&self, name: Option<&str>) -> Result<Option<Persona>> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => self
                .store
                .get_persona(name)
                .await?
                .map(Some)
                .ok_or_else(|| Error::InvalidInput(format!("unknown persona '{name}'"))),
            None => Ok(None),
        }
    }

    /// Generate a post without publishing it
    pub async fn generate_post(&self, topic: &str, persona: Option<&str>) -> Result<GeneratedPost> {
        let generator = self.generator().await?;
        let persona = self.persona_by_name(persona).await?;
        let links = self.store.list_links().await?;
        generator.generate(topic, persona.as_ref(), &links).await
    }

    /// キャンペーン実行
    ///
    /// Topic `i` goes to site `i % sites` on slot `i`. A failing post is
    /// recorded in the report and the remaining posts are still processed.
    pub async fn run_campaign(&self, campaign: Campaign) -> Result<CampaignReport> {
        let topics: Vec<String> = campaign
            .topics
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if topics.is_empty() {
            return Err(Error::InvalidInput("campaign has no topics".to_string()));
        }
        if campaign.sites.is_empty() {
            return Err(Error::InvalidInput("campaign has no target sites".to_string()));
        }

        let mut targets = Vec::with_capacity(campaign.sites.len());
        for url in &campaign.sites {
            let site = self.site_by_url(url).await?;
            let client = self.client_for(&site)?;
            targets.push(client);
        }

        let start = match campaign.start {
            Some(start) => start,
            None => next_publish_slot(Local::now().naive_local(), self.scheduling.publish_hour)?,
        };
        let interval = campaign
            .interval_hours
            .unwrap_or(self.scheduling.interval_hours);
        let plan = SchedulePlan::new(start, interval, topics.len())?;

        let generator = self.generator().await?;
        let persona = self.persona_by_name(campaign.persona.as_deref()).await?;
        let links = self.store.list_links().await?;

        info!(
            topics = topics.len(),
            sites = targets.len(),
            start = %start,
            interval_hours = interval,
            "campaign started"
        );

        let mut report = CampaignReport::default();
        for (i, (topic, publish_at)) in topics.iter().zip(plan.slots()).enumerate() {
            let client = &targets[i % targets.len()];
            let mut outcome = CampaignPostOutcome {
                topic: topic.clone(),
                site: client.site().url.clone(),
                publish_at,
                title: None,
                post_id: None,
                link: None,
                interlinks: Vec::new(),
                featured_media: None,
                error: None,
            };

            let result = self
                .publish_generated(
                    &generator,
                    client,
                    topic,
                    persona.as_ref(),
                    &links,
                    &campaign,
                    publish_at,
                    &mut outcome,
                )
                .await;

            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(topic = %topic, site = %outcome.site, "campaign post failed: {}", e);
                    outcome.error = Some(e.to_string());
                    report.failed += 1;
                }
            }
            report.posts.push(outcome);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "campaign finished"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish_generated(
        &self,
        generator: &ContentGenerator,
        client: &WordPressClient,
        topic: &str,
        persona: Option<&Persona>,
        links: &[InterlinkRule],
        campaign: &Campaign,
        publish_at: NaiveDateTime,
        outcome: &mut CampaignPostOutcome,
    ) -> Result<()> {
        let generated = generator.generate(topic, persona, links).await?;
        outcome.title = Some(generated.article.title.clone());
        outcome.interlinks = generated.interlinks.clone();

        let categories = self.resolve_categories(client, &campaign.categories).await?;
        let status = status_for(publish_at, Local::now().naive_local());
        let mut post = NewPost::scheduled(
            generated.article.title.clone(),
            generated.article.html.clone(),
            categories,
            publish_at,
        )
        .with_status(status)
        .with_excerpt(generated.meta.meta_description.clone());

        if campaign.featured_image {
            // 画像の失敗は投稿自体を止めない
            match self.upload_featured_image(generator, client, &generated).await {
                Ok(media_id) => {
                    post = post.with_featured_media(media_id);
                    outcome.featured_media = Some(media_id);
                }
                Err(e) => warn!(topic, "featured image skipped: {}", e),
            }
        }

        let created = client.create_post(&post).await?;
        outcome.post_id = Some(created.id);
        outcome.link = created.link;
        Ok(())
    }

    async fn upload_featured_image(
        &self,
        generator: &ContentGenerator,
        client: &WordPressClient,
        generated: &GeneratedPost,
    ) -> Result<u64> {
        let image = generator.generate_image(&generated.brief).await?;
        let extension = match image.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        };
        let filename = format!("{}.{}", slugify(&generated.article.title), extension);
        let media = client
            .upload_media(&image.bytes, &filename, &image.mime_type)
            .await?;
        Ok(media.id)
    }

    // ---- personas / prompts / links ----

    pub async fn upsert_persona(&self, persona: Persona) -> Result<Persona> {
        if persona.name.trim().is_empty() {
            return Err(Error::InvalidInput("persona name must not be empty".to_string()));
        }
        Ok(self.store.upsert_persona(persona).await?)
    }

    pub async fn personas(&self) -> Result<Vec<Persona>> {
        Ok(self.store.list_personas().await?)
    }

    pub async fn delete_persona(&self, name: &str) -> Result<()> {
        Ok(self.store.delete_persona(name).await?)
    }

    pub async fn upsert_prompt(&self, name: &str, body: &str) -> Result<PromptTemplate> {
        let template = PromptTemplate::new(name.trim(), body);
        if template.name.is_empty() {
            return Err(Error::InvalidInput("template name must not be empty".to_string()));
        }
        self.store.upsert_prompt(template.clone()).await?;
        Ok(template)
    }

    /// Stored templates plus the built-ins that are not overridden
    pub async fn prompts(&self) -> Result<Vec<PromptTemplate>> {
        let mut prompts = self.store.list_prompts().await?;
        for name in PromptTemplate::builtin_names() {
            if !prompts.iter().any(|p| p.name == name) {
                if let Some(builtin) = PromptTemplate::builtin(name) {
                    prompts.push(builtin);
                }
            }
        }
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(prompts)
    }

    pub async fn upsert_link(&self, keyword: &str, url: &str) -> Result<InterlinkRule> {
        let rule = InterlinkRule::new(keyword.trim(), url.trim());
        if rule.keyword.is_empty() || rule.url.is_empty() {
            return Err(Error::InvalidInput(
                "keyword and url must not be empty".to_string(),
            ));
        }
        self.store.upsert_link(rule.clone()).await?;
        Ok(rule)
    }

    pub async fn links(&self) -> Result<Vec<InterlinkRule>> {
        Ok(self.store.list_links().await?)
    }

    pub async fn delete_link(&self, keyword: &str) -> Result<()> {
        Ok(self.store.delete_link(keyword).await?)
    }

    /// Replace the whole interlink table
    pub async fn replace_links(&self, rules: Vec<InterlinkRule>) -> Result<Vec<InterlinkRule>> {
        for existing in self.store.list_links().await? {
            let kept = rules
                .iter()
                .any(|r| store::link_key(&r.keyword) == store::link_key(&existing.keyword));
            if !kept {
                self.store.delete_link(&existing.keyword).await?;
            }
        }
        for rule in rules {
            self.upsert_link(&rule.keyword, &rule.url).await?;
        }
        self.links().await
    }
}

/// Filename-safe slug of a title
fn slugify(title: &str) -> String {
    let slug = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "image".to_string()
    } else {
        slug
    }
}
