use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    link_key, InterlinkRule, NewSite, PbnStore, Persona, PromptTemplate, StoreError, StoredSite,
};

/// Whole store contents, shared by the in-memory and JSON backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StoreState {
    next_site_id: i64,
    sites: Vec<StoredSite>,
    next_persona_id: i64,
    personas: Vec<Persona>,
    prompts: Vec<PromptTemplate>,
    links: Vec<InterlinkRule>,
}

impl StoreState {
    pub(crate) fn insert_site(&mut self, site: NewSite) -> Result<StoredSite, StoreError> {
        if self.sites.iter().any(|s| s.url == site.url) {
            return Err(StoreError::Duplicate(format!("site {}", site.url)));
        }
        let next_id = self
            .next_site_id
            .max(self.sites.iter().map(|s| s.id).max().unwrap_or(0))
            + 1;
        self.next_site_id = next_id;

        let stored = StoredSite {
            id: next_id,
            name: site.name,
            url: site.url,
            username: site.username,
            password: site.password,
            created_at: Utc::now(),
        };
        self.sites.push(stored.clone());
        Ok(stored)
    }

    pub(crate) fn sites(&self) -> Vec<StoredSite> {
        self.sites.clone()
    }

    pub(crate) fn get_site(&self, id: i64) -> Option<StoredSite> {
        self.sites.iter().find(|s| s.id == id).cloned()
    }

    pub(crate) fn find_site_by_url(&self, url: &str) -> Option<StoredSite> {
        self.sites.iter().find(|s| s.url == url).cloned()
    }

    pub(crate) fn delete_site(&mut self, id: i64) -> Result<(), StoreError> {
        let before = self.sites.len();
        self.sites.retain(|s| s.id != id);
        if self.sites.len() == before {
            return Err(StoreError::NotFound(format!("site {id}")));
        }
        Ok(())
    }

    pub(crate) fn upsert_persona(&mut self, mut persona: Persona) -> Persona {
        if let Some(existing) = self.personas.iter_mut().find(|p| p.name == persona.name) {
            persona.id = existing.id;
            *existing = persona.clone();
            return persona;
        }
        let next_id = self
            .next_persona_id
            .max(self.personas.iter().filter_map(|p| p.id).max().unwrap_or(0))
            + 1;
        self.next_persona_id = next_id;
        persona.id = Some(next_id);
        self.personas.push(persona.clone());
        persona
    }

    pub(crate) fn personas(&self) -> Vec<Persona> {
        self.personas.clone()
    }

    pub(crate) fn get_persona(&self, name: &str) -> Option<Persona> {
        self.personas.iter().find(|p| p.name == name).cloned()
    }

    pub(crate) fn delete_persona(&mut self, name: &str) -> Result<(), StoreError> {
        let before = self.personas.len();
        self.personas.retain(|p| p.name != name);
        if self.personas.len() == before {
            return Err(StoreError::NotFound(format!("persona {name}")));
        }
        Ok(())
    }

    pub(crate) fn upsert_prompt(&mut self, prompt: PromptTemplate) {
        match self.prompts.iter_mut().find(|p| p.name == prompt.name) {
            Some(existing) => *existing = prompt,
            None => self.prompts.push(prompt),
        }
    }

    pub(crate) fn get_prompt(&self, name: &str) -> Option<PromptTemplate> {
        self.prompts.iter().find(|p| p.name == name).cloned()
    }

    pub(crate) fn prompts(&self) -> Vec<PromptTemplate> {
        let mut prompts = self.prompts.clone();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    pub(crate) fn upsert_link(&mut self, rule: InterlinkRule) {
        let key = link_key(&rule.keyword);
        match self.links.iter_mut().find(|l| link_key(&l.keyword) == key) {
            Some(existing) => *existing = rule,
            None => self.links.push(rule),
        }
    }

    pub(crate) fn links(&self) -> Vec<InterlinkRule> {
        self.links.clone()
    }

    pub(crate) fn delete_link(&mut self, keyword: &str) -> Result<(), StoreError> {
        let key = link_key(keyword);
        let before = self.links.len();
        self.links.retain(|l| link_key(&l.keyword) != key);
        if self.links.len() == before {
            return Err(StoreError::NotFound(format!("interlink '{keyword}'")));
        }
        Ok(())
    }
}

/// In-memoryストア
///
/// プロセス終了時にデータは失われる。テストと `backend = "memory"` 用。
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PbnStore for MemoryStore {
    async fn insert_site(&self, site: NewSite) -> Result<StoredSite, StoreError> {
        self.state.write().await.insert_site(site)
    }

    async fn list_sites(&self) -> Result<Vec<StoredSite>, StoreError> {
        Ok(self.state.read().await.sites())
    }

    async fn get_site(&self, id: i64) -> Result<Option<StoredSite>, StoreError> {
        Ok(self.state.read().await.get_site(id))
    }

    async fn find_site_by_url(&self, url: &str) -> Result<Option<StoredSite>, StoreError> {
        Ok(self.state.read().await.find_site_by_url(url))
    }

    async fn delete_site(&self, id: i64) -> Result<(), StoreError> {
        self.state.write().await.delete_site(id)
    }

    async fn upsert_persona(&self, persona: Persona) -> Result<Persona, StoreError> {
        Ok(self.state.write().await.upsert_persona(persona))
    }

    async fn list_personas(&self) -> Result<Vec<Persona>, StoreError> {
        Ok(self.state.read().await.personas())
    }

    async fn get_persona(&self, name: &str) -> Result<Option<Persona>, StoreError> {
        Ok(self.state.read().await.get_persona(name))
    }

    async fn delete_persona(&self, name: &str) -> Result<(), StoreError> {
        self.state.write().await.delete_persona(name)
    }

    async fn upsert_prompt(&self, prompt: PromptTemplate) -> Result<(), StoreError> {
        self.state.write().await.upsert_prompt(prompt);
        Ok(())
    }

    async fn get_prompt(&self, name: &str) -> Result<Option<PromptTemplate>, StoreError> {
        Ok(self.state.read().await.get_prompt(name))
    }

    async fn list_prompts(&self) -> Result<Vec<PromptTemplate>, StoreError> {
        Ok(self.state.read().await.prompts())
    }

    async fn upsert_link(&self, rule: InterlinkRule) -> Result<(), StoreError> {
        self.state.write().await.upsert_link(rule);
        Ok(())
    }

    async fn list_links(&self) -> Result<Vec<InterlinkRule>, StoreError> {
        Ok(self.state.read().await.links())
    }

    async fn delete_link(&self, keyword: &str) -> Result<(), StoreError> {
        self.state.write().await.delete_link(keyword)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::new_site;
    use super::*;

    #[tokio::test]
    async fn test_site_crud_and_duplicates() {
        let store = MemoryStore::new();
        let a = store.insert_site(new_site("https://a.com")).await.unwrap();
        let b = store.insert_site(new_site("https://b.com")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let dup = store.insert_site(new_site("https://a.com")).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));

        assert_eq!(
            store.find_site_by_url("https://b.com").await.unwrap().unwrap().id,
            2
        );
        store.delete_site(1).await.unwrap();
        assert!(matches!(store.delete_site(1).await, Err(StoreError::NotFound(_))));

        // 削除後もidは再利用しない
        let c = store.insert_site(new_site("https://c.com")).await.unwrap();
        assert_eq!(c.id, 3);
    }

    #[tokio::test]
    async fn test_persona_upsert_keeps_id() {
        let store = MemoryStore::new();
        let first = store.upsert_persona(Persona::new("Anna")).await.unwrap();
        let updated = store
            .upsert_persona(Persona::new("Anna").with_tone("formal"))
            .await
            .unwrap();
        assert_eq!(first.id, updated.id);
        assert_eq!(store.list_personas().await.unwrap().len(), 1);
        assert_eq!(store.get_persona("Anna").await.unwrap().unwrap().tone, "formal");
        assert!(store.delete_persona("Bob").await.is_err());
    }

    #[tokio::test]
    async fn test_links_are_case_insensitive_and_ordered() {
        let store = MemoryStore::new();
        store.upsert_link(InterlinkRule::new("Tea", "https://a")).await.unwrap();
        store.upsert_link(InterlinkRule::new("coffee", "https://b")).await.unwrap();
        store.upsert_link(InterlinkRule::new("tea", "https://c")).await.unwrap();

        let links = store.list_links().await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], InterlinkRule::new("tea", "https://c"));

        store.delete_link("TEA").await.unwrap();
        assert!(matches!(store.delete_link("tea").await, Err(StoreError::NotFound(_))));
    }
}
