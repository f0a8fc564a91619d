//! Client configuration persistence.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::subscription::types::{ClientConfig, ClientId};
use crate::{MonitorError, Result};

/// Storage capability for client configurations.
///
/// Every failure surfaces as [`MonitorError::Storage`].
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load a client's configuration, `None` if the client is unknown.
    async fn load_client_config(&self, client_id: &ClientId) -> Result<Option<ClientConfig>>;

    /// Store a client's configuration, replacing any previous one.
    async fn save_client_config(&self, client_id: &ClientId, config: &ClientConfig) -> Result<()>;

    /// Ids of every stored client.
    async fn list_client_ids(&self) -> Result<Vec<ClientId>>;
}

/// One JSON file per client under `<data_dir>/configs`.
pub struct JsonConfigStore {
    dir: PathBuf,
}

impl JsonConfigStore {
    /// Create a store rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("configs"),
        }
    }

    /// Directory holding the configuration files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, client_id: &ClientId) -> PathBuf {
        self.dir.join(format!("{}.json", client_id))
    }
}

fn storage_err(context: &str, e: impl std::fmt::Display) -> MonitorError {
    MonitorError::Storage(format!("{}: {}", context, e))
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn load_client_config(&self, client_id: &ClientId) -> Result<Option<ClientConfig>> {
        let path = self.path_for(client_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(&format!("failed to read {}", path.display()), e)),
        };
        let config = serde_json::from_slice(&bytes)
            .map_err(|e| storage_err(&format!("corrupt config {}", path.display()), e))?;
        Ok(Some(config))
    }

    async fn save_client_config(&self, client_id: &ClientId, config: &ClientConfig) -> Result<()> {
        let json = serde_json::to_vec_pretty(config)
            .map_err(|e| storage_err("failed to serialize config", e))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_err(&format!("failed to create {}", self.dir.display()), e))?;

        let path = self.path_for(client_id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| storage_err(&format!("failed to write {}", tmp_path.display()), e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| storage_err(&format!("failed to replace {}", path.display()), e))?;

        debug!("Saved config for client {}", client_id);
        Ok(())
    }

    async fn list_client_ids(&self) -> Result<Vec<ClientId>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(&format!("failed to list {}", self.dir.display()), e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("failed to list configs", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match ClientId::parse(stem) {
                Ok(id) => ids.push(id),
                Err(_) => warn!("Ignoring unexpected file {}", path.display()),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-memory store, for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryConfigStore {
    configs: RwLock<HashMap<ClientId, ClientConfig>>,
}

impl MemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load_client_config(&self, client_id: &ClientId) -> Result<Option<ClientConfig>> {
        Ok(self.configs.read().await.get(client_id).cloned())
    }

    async fn save_client_config(&self, client_id: &ClientId, config: &ClientConfig) -> Result<()> {
        self.configs
            .write()
            .await
            .insert(client_id.clone(), config.clone());
        Ok(())
    }

    async fn list_client_ids(&self) -> Result<Vec<ClientId>> {
        let mut ids: Vec<ClientId> = self.configs.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::types::Subscription;

    fn client(id: &str) -> ClientId {
        ClientId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryConfigStore::new();
        let id = client("alpha");
        assert!(store.load_client_config(&id).await.unwrap().is_none());

        let mut config = ClientConfig::new(id.clone());
        config
            .subscriptions
            .push(Subscription::new("https://example.com/feed"));
        store.save_client_config(&id, &config).await.unwrap();

        assert_eq!(store.load_client_config(&id).await.unwrap(), Some(config));
        assert_eq!(store.list_client_ids().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path());
        let id = client("beta");

        assert!(store.load_client_config(&id).await.unwrap().is_none());
        assert!(store.list_client_ids().await.unwrap().is_empty());

        let config = ClientConfig::new(id.clone());
        store.save_client_config(&id, &config).await.unwrap();

        assert!(store.dir().join("beta.json").exists());
        assert!(!store.dir().join("beta.json.tmp").exists());
        assert_eq!(store.load_client_config(&id).await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_json_store_lists_only_client_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path());
        for name in ["b", "a"] {
            let id = client(name);
            store
                .save_client_config(&id, &ClientConfig::new(id.clone()))
                .await
                .unwrap();
        }
        std::fs::write(store.dir().join("notes.txt"), "x").unwrap();
        std::fs::write(store.dir().join("bad name.json"), "{}").unwrap();

        assert_eq!(
            store.list_client_ids().await.unwrap(),
            vec![client("a"), client("b")]
        );
    }

    #[tokio::test]
    async fn test_json_store_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path());
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("gamma.json"), "{not json").unwrap();

        let result = store.load_client_config(&client("gamma")).await;
        assert!(matches!(result, Err(MonitorError::Storage(_))));
    }
}
