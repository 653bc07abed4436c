//! ストア永続化の統合テスト

mod common;

use pbn_manager::config::{StorageBackend, StorageConfig};
use pbn_manager::content::{InterlinkRule, Persona};
use pbn_manager::store::{open_store, JsonFileStore, SqliteStore};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn json_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data").join("sites.json");

    {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let manager = common::manager_with_store(store);
        manager
            .add_site(Some("Tea"), "https://tea.example/", "editor", SecretString::from("s3cret pw"))
            .await
            .unwrap();
        manager.upsert_link("matcha", "https://tea.example/matcha").await.unwrap();
    }

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("s3cret pw"));

    let store = Arc::new(tokio_test::assert_ok!(JsonFileStore::open(&path).await));
    let manager = common::manager_with_store(store);
    let sites = manager.sites().await.unwrap();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].url, "https://tea.example");

    let client = manager.client_for(&sites[0]).unwrap();
    assert_eq!(client.site().password.expose_secret(), "s3cret pw");
    assert_eq!(
        manager.links().await.unwrap(),
        vec![InterlinkRule::new("matcha", "https://tea.example/matcha")]
    );
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pbn.db");

    {
        let store = Arc::new(SqliteStore::open(&path).await.unwrap());
        let manager = common::manager_with_store(store);
        manager
            .add_site(None, "https://a.example", "editor", SecretString::from("pw"))
            .await
            .unwrap();
        manager
            .upsert_persona(Persona::new("Hana").with_tone("friendly"))
            .await
            .unwrap();
    }

    let store = Arc::new(SqliteStore::open(&path).await.unwrap());
    let manager = common::manager_with_store(store);
    assert_eq!(manager.sites().await.unwrap().len(), 1);
    let personas = manager.personas().await.unwrap();
    assert_eq!(personas[0].tone, "friendly");
    assert!(personas[0].id.is_some());
}

#[tokio::test]
async fn open_store_follows_backend() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        backend: StorageBackend::Json,
        path: dir.path().join("custom.json"),
        ..StorageConfig::default()
    };

    let store = open_store(&config).await.unwrap();
    let manager = common::manager_with_store(store);
    manager
        .add_site(None, "https://b.example", "editor", SecretString::from("pw"))
        .await
        .unwrap();
    assert!(dir.path().join("custom.json").exists());
}

#[tokio::test]
async fn wrong_master_key_cannot_decrypt() {
    use pbn_manager::security::{CredentialCipher, MasterKey};

    let site = common::manager()
        .add_site(None, "https://c.example", "editor", SecretString::from("pw"))
        .await
        .unwrap();

    let other = CredentialCipher::new(MasterKey::new(SecretString::from("another key")).unwrap());
    assert!(other.decrypt(&site.password).is_err());
}
