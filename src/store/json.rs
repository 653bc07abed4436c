use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::memory::StoreState;
use super::{InterlinkRule, NewSite, PbnStore, Persona, PromptTemplate, StoreError, StoredSite};

/// JSONファイルストア
///
/// 変更のたびに全体を一時ファイルへ書き出し、rename で置き換える。
/// ファイルが存在しなければ空のストアとして開く。
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => StoreState::default(),
            Ok(bytes) if is_plaintext_site_list(&bytes) => {
                return Err(StoreError::Corrupt(format!(
                    "{} is a plaintext site list, which is not supported; \
                     move it aside and register the sites again with `pbn-manager site add`",
                    path.display()
                )));
            }
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "store snapshot written");
        Ok(())
    }

    /// Apply `change` to a copy, write it, then publish it
    ///
    /// A failed write leaves the in-memory state untouched.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = change(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }
}

/// 旧形式（平文パスワード入りのトップレベル配列）
fn is_plaintext_site_list(bytes: &[u8]) -> bool {
    bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'[')
}

#[async_trait]
impl PbnStore for JsonFileStore {
    async fn insert_site(&self, site: NewSite) -> Result<StoredSite, StoreError> {
        self.mutate(|s| s.insert_site(site)).await
    }

    async fn list_sites(&self) -> Result<Vec<StoredSite>, StoreError> {
        Ok(self.state.lock().await.sites())
    }

    async fn get_site(&self, id: i64) -> Result<Option<StoredSite>, StoreError> {
        Ok(self.state.lock().await.get_site(id))
    }

    async fn find_site_by_url(&self, url: &str) -> Result<Option<StoredSite>, StoreError> {
        Ok(self.state.lock().await.find_site_by_url(url))
    }

    async fn delete_site(&self, id: i64) -> Result<(), StoreError> {
        self.mutate(|s| s.delete_site(id)).await
    }

    async fn upsert_persona(&self, persona: Persona) -> Result<Persona, StoreError> {
        self.mutate(|s| Ok(s.upsert_persona(persona))).await
    }

    async fn list_personas(&self) -> Result<Vec<Persona>, StoreError> {
        Ok(self.state.lock().await.personas())
    }

    async fn get_persona(&self, name: &str) -> Result<Option<Persona>, StoreError> {
        Ok(self.state.lock().await.get_persona(name))
    }

    async fn delete_persona(&self, name: &str) -> Result<(), StoreError> {
        self.mutate(|s| s.delete_persona(name)).await
    }

    async fn upsert_prompt(&self, prompt: PromptTemplate) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.upsert_prompt(prompt);
            Ok(())
        })
        .await
    }

    async fn get_prompt(&self, name: &str) -> Result<Option<PromptTemplate>, StoreError> {
        Ok(self.state.lock().await.get_prompt(name))
    }

    async fn list_prompts(&self) -> Result<Vec<PromptTemplate>, StoreError> {
        Ok(self.state.lock().await.prompts())
    }

    async fn upsert_link(&self, rule: InterlinkRule) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.upsert_link(rule);
            Ok(())
        })
        .await
    }

    async fn list_links(&self) -> Result<Vec<InterlinkRule>, StoreError> {
        Ok(self.state.lock().await.links())
    }

    async fn delete_link(&self, keyword: &str) -> Result<(), StoreError> {
        self.mutate(|s| s.delete_link(keyword)).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::test_support::new_site;
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("sites.json")).await.unwrap();
        assert!(store.list_sites().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_plaintext_site_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        tokio::fs::write(
            &path,
            r#"  [{"url": "https://a.com", "username": "admin", "password": "hunter2"}]"#,
        )
        .await
        .unwrap();

        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
        let message = err.to_string();
        assert!(message.contains("not supported"));
        assert!(message.contains("site add"));
        assert!(!message.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sites.json");

        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.insert_site(new_site("https://a.com")).await.unwrap();
            store.upsert_persona(Persona::new("Anna")).await.unwrap();
            store
                .upsert_link(InterlinkRule::new("tea", "https://a.com/tea"))
                .await
                .unwrap();
            store
                .upsert_prompt(PromptTemplate::new("brief", "{topic}"))
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let sites = reopened.list_sites().await.unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].password.ciphertext, vec![1, 2, 3]);
        assert_eq!(reopened.list_personas().await.unwrap()[0].id, Some(1));
        assert_eq!(reopened.list_links().await.unwrap().len(), 1);
        assert_eq!(
            reopened.get_prompt("brief").await.unwrap().unwrap().body,
            "{topic}"
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_mutation_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        store.insert_site(new_site("https://a.com")).await.unwrap();

        assert!(store.insert_site(new_site("https://a.com")).await.is_err());
        assert!(store.delete_site(42).await.is_err());

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_sites().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
