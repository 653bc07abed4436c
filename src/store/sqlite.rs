//! SQLite ストア (sqlx)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

use super::{
    link_key, InterlinkRule, NewSite, PbnStore, Persona, PromptTemplate, StoreError, StoredSite,
};
use crate::security::EncryptedSecret;

const MIGRATIONS: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS sites (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        username TEXT NOT NULL,
        password TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS personas (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        tone TEXT NOT NULL DEFAULT '',
        language TEXT NOT NULL DEFAULT '',
        instructions TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prompts (
        name TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS links (
        keyword_key TEXT PRIMARY KEY,
        keyword TEXT NOT NULL,
        url TEXT NOT NULL
    )
    "#,
];

/// SQLite ストア
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory database (`sqlite::memory:`)
    ///
    /// 接続ごとに別DBになるため接続は1本に固定する。
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// マイグレーションを実行
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{value}': {e}")))
}

fn site_from_row(row: &SqliteRow) -> Result<StoredSite, StoreError> {
    let password: String = row.try_get("password")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(StoredSite {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        username: row.try_get("username")?,
        password: password
            .parse::<EncryptedSecret>()
            .map_err(|e| StoreError::Corrupt(format!("site password: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn persona_from_row(row: &SqliteRow) -> Result<Persona, StoreError> {
    Ok(Persona {
        id: Some(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        tone: row.try_get("tone")?,
        language: row.try_get("language")?,
        instructions: row.try_get("instructions")?,
    })
}

fn prompt_from_row(row: &SqliteRow) -> Result<PromptTemplate, StoreError> {
    let updated_at: String = row.try_get("updated_at")?;
    Ok(PromptTemplate {
        name: row.try_get("name")?,
        body: row.try_get("body")?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl PbnStore for SqliteStore {
    async fn insert_site(&self, site: NewSite) -> Result<StoredSite, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO sites (name, url, username, password, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&site.name)
        .bind(&site.url)
        .bind(&site.username)
        .bind(site.password.to_string())
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("site {}", site.url))
            } else {
                StoreError::Database(e)
            }
        })?;

        // RFC3339 の往復で精度を揃える
        let created_at = parse_timestamp(&created_at.to_rfc3339())?;
        Ok(StoredSite {
            id: result.last_insert_rowid(),
            name: site.name,
            url: site.url,
            username: site.username,
            password: site.password,
            created_at,
        })
    }

    async fn list_sites(&self) -> Result<Vec<StoredSite>, StoreError> {
        sqlx::query("SELECT * FROM sites ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(site_from_row)
            .collect()
    }

    async fn get_site(&self, id: i64) -> Result<Option<StoredSite>, StoreError> {
        sqlx::query("SELECT * FROM sites WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(site_from_row)
            .transpose()
    }

    async fn find_site_by_url(&self, url: &str) -> Result<Option<StoredSite>, StoreError> {
        sqlx::query("SELECT * FROM sites WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(site_from_row)
            .transpose()
    }

    async fn delete_site(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sites WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("site {id}")));
        }
        Ok(())
    }

    async fn upsert_persona(&self, mut persona: Persona) -> Result<Persona, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO personas (name, description, tone, language, instructions)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                tone = excluded.tone,
                language = excluded.language,
                instructions = excluded.instructions
            RETURNING id
            "#,
        )
        .bind(&persona.name)
        .bind(&persona.description)
        .bind(&persona.tone)
        .bind(&persona.language)
        .bind(&persona.instructions)
        .fetch_one(&self.pool)
        .await?;

        persona.id = Some(id);
        Ok(persona)
    }

    async fn list_personas(&self) -> Result<Vec<Persona>, StoreError> {
        sqlx::query("SELECT * FROM personas ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(persona_from_row)
            .collect()
    }

    async fn get_persona(&self, name: &str) -> Result<Option<Persona>, StoreError> {
        sqlx::query("SELECT * FROM personas WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(persona_from_row)
            .transpose()
    }

    async fn delete_persona(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM personas WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("persona {name}")));
        }
        Ok(())
    }

    async fn upsert_prompt(&self, prompt: PromptTemplate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO prompts (name, body, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(&prompt.name)
        .bind(&prompt.body)
        .bind(prompt.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_prompt(&self, name: &str) -> Result<Option<PromptTemplate>, StoreError> {
        sqlx::query("SELECT * FROM prompts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(prompt_from_row)
            .transpose()
    }

    async fn list_prompts(&self) -> Result<Vec<PromptTemplate>, StoreError> {
        sqlx::query("SELECT * FROM prompts ORDER BY name")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(prompt_from_row)
            .collect()
    }

    async fn upsert_link(&self, rule: InterlinkRule) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO links (keyword_key, keyword, url) VALUES (?, ?, ?)
            ON CONFLICT(keyword_key) DO UPDATE SET keyword = excluded.keyword, url = excluded.url
            "#,
        )
        .bind(link_key(&rule.keyword))
        .bind(&rule.keyword)
        .bind(&rule.url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_links(&self) -> Result<Vec<InterlinkRule>, StoreError> {
        let rows = sqlx::query("SELECT keyword, url FROM links ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<InterlinkRule, StoreError> {
                Ok(InterlinkRule {
                    keyword: row.try_get("keyword")?,
                    url: row.try_get("url")?,
                })
            })
            .collect()
    }

    async fn delete_link(&self, keyword: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM links WHERE keyword_key = ?")
            .bind(link_key(keyword))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("interlink '{keyword}'")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::test_support::new_site;
    use super::*;

    #[tokio::test]
    async fn test_site_roundtrip_and_duplicate() {
        let store = SqliteStore::in_memory().await.unwrap();
        let site = store.insert_site(new_site("https://a.com")).await.unwrap();
        assert_eq!(site.id, 1);

        let loaded = store.get_site(1).await.unwrap().unwrap();
        assert_eq!(loaded, site);

        let dup = store.insert_site(new_site("https://a.com")).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));

        store.delete_site(1).await.unwrap();
        assert!(matches!(store.delete_site(1).await, Err(StoreError::NotFound(_))));
        assert!(store.list_sites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persona_and_prompt_upserts() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store.upsert_persona(Persona::new("Anna")).await.unwrap();
        let second = store
            .upsert_persona(Persona::new("Anna").with_language("Polish"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(
            store.get_persona("Anna").await.unwrap().unwrap().language,
            "Polish"
        );

        store
            .upsert_prompt(PromptTemplate::new("meta", "v1 {title}"))
            .await
            .unwrap();
        store
            .upsert_prompt(PromptTemplate::new("meta", "v2 {title}"))
            .await
            .unwrap();
        let prompts = store.list_prompts().await.unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].body, "v2 {title}");
    }

    #[tokio::test]
    async fn test_links_keep_insertion_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_link(InterlinkRule::new("zebra", "https://z")).await.unwrap();
        store.upsert_link(InterlinkRule::new("apple", "https://a")).await.unwrap();
        store.upsert_link(InterlinkRule::new("ZEBRA", "https://z2")).await.unwrap();

        let links = store.list_links().await.unwrap();
        assert_eq!(links[0], InterlinkRule::new("ZEBRA", "https://z2"));
        assert_eq!(links[1].keyword, "apple");
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pbn.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.insert_site(new_site("https://a.com")).await.unwrap();
            store.pool().close().await;
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(store.list_sites().await.unwrap().len(), 1);
    }
}
