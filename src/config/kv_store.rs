use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{BotError, Result};

/// Flat key-value bot configuration backed by a single JSON document.
///
/// Holds channel and role identifiers and the temporary vocal lists. Every
/// mutation is written back atomically before returning.
#[derive(Debug, Clone)]
pub struct KvStore {
    path: PathBuf,
    data: Map<String, Value>,
}

impl KvStore {
    /// Empty store that persists to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: Map::new(),
        }
    }

    /// Load from file or create new
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data: Option<Map<String, Value>> = crate::state::load_json(&path).await?;
        let store = Self {
            data: data.unwrap_or_default(),
            path,
        };
        info!("Loaded {} config keys from {}", store.data.len(), store.path.display());
        Ok(store)
    }

    /// Typed read; `None` if the key is missing or has another shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Insert a new key; fails if it already exists
    pub async fn add<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        if self.contains(key) {
            return Err(BotError::ConfigValidation {
                message: format!("key '{}' already exists", key),
            });
        }
        let mut next = self.data.clone();
        next.insert(key.to_string(), serde_json::to_value(value)?);
        self.commit(next).await?;
        debug!("Config key '{}' added", key);
        Ok(())
    }

    /// Insert or replace a key
    pub async fn modify<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let mut next = self.data.clone();
        next.insert(key.to_string(), serde_json::to_value(value)?);
        self.commit(next).await?;
        debug!("Config key '{}' modified", key);
        Ok(())
    }

    pub async fn remove(&mut self, key: &str) -> Result<()> {
        let mut next = self.data.clone();
        if next.remove(key).is_none() {
            return Err(BotError::ConfigNotFound {
                key: key.to_string(),
            });
        }
        self.commit(next).await?;
        debug!("Config key '{}' removed", key);
        Ok(())
    }

    /// Push an id onto a list-valued key, creating the list if needed
    pub async fn push_id(&mut self, key: &str, id: u64) -> Result<()> {
        let mut ids: Vec<u64> = self.get(key).unwrap_or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        self.modify(key, ids).await
    }

    /// Remove an id from a list-valued key. Returns whether it was present.
    pub async fn remove_id(&mut self, key: &str, id: u64) -> Result<bool> {
        let mut ids: Vec<u64> = self.get(key).unwrap_or_default();
        let before = ids.len();
        ids.retain(|i| *i != id);
        if ids.len() == before {
            return Ok(false);
        }
        self.modify(key, ids).await?;
        Ok(true)
    }

    pub fn list_contains(&self, key: &str, id: u64) -> bool {
        self.get::<Vec<u64>>(key)
            .map(|ids| ids.contains(&id))
            .unwrap_or(false)
    }

    /// Export as pretty JSON (for download)
    pub fn export(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.data).map_err(|e| e.into())
    }

    /// Write `next` to disk, and only then make it the live document
    async fn commit(&mut self, next: Map<String, Value>) -> Result<()> {
        crate::state::save_json(&self.path, &next).await?;
        self.data = next;
        Ok(())
    }
}

/// Shared config store type
pub type SharedKvStore = Arc<tokio::sync::RwLock<KvStore>>;

pub fn create_shared_kv_store(store: KvStore) -> SharedKvStore {
    Arc::new(tokio::sync::RwLock::new(store))
}
