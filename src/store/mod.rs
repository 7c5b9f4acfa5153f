//! Key/value persistence for rates, asset values, snapshots and the journal.

pub mod disk;
pub mod journal;
pub mod memory;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use serde::{Serialize, de::DeserializeOwned};
use std::path::Path;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

pub type KeyValuePair = (Vec<u8>, Vec<u8>);

/// An ordered byte map.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Writes only when the key is vacant. Returns whether it wrote.
    async fn insert_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool>;

    async fn remove(&self, key: &[u8]) -> Result<()>;

    /// All pairs whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValuePair>>;
}

/// Builds a composite key. Parts are joined with a NUL byte so that a prefix
/// built from the leading parts never matches a longer sibling.
pub fn compose_key(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    for part in parts {
        key.extend_from_slice(part.as_bytes());
        key.push(0);
    }
    key
}

pub async fn get_json<T: DeserializeOwned>(
    collection: &dyn KeyValueCollection,
    key: &[u8],
) -> Result<Option<T>> {
    match collection.get(key).await? {
        Some(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).context("Failed to decode stored record")?,
        )),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize>(
    collection: &dyn KeyValueCollection,
    key: &[u8],
    value: &T,
) -> Result<()> {
    collection.put(key, &serde_json::to_vec(value)?).await
}

pub async fn scan_json<T: DeserializeOwned>(
    collection: &dyn KeyValueCollection,
    prefix: &[u8],
) -> Result<Vec<T>> {
    collection
        .scan_prefix(prefix)
        .await?
        .into_iter()
        .map(|(_, bytes)| {
            serde_json::from_slice(&bytes).context("Failed to decode stored record")
        })
        .collect()
}

/// Hands out named collections, on disk when opened with a path and in
/// memory otherwise.
pub struct KeyValueStore {
    collections: RwLock<HashMap<String, Arc<dyn KeyValueCollection>>>,
    keyspace: Option<Keyspace>,
}

impl KeyValueStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path.join("store"))
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;

        Ok(Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: Some(keyspace),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: None,
        }
    }

    pub fn collection(&self, name: &str) -> Result<Arc<dyn KeyValueCollection>> {
        {
            let collections = self
                .collections
                .read()
                .map_err(|_| anyhow!("Store lock poisoned"))?;
            if let Some(collection) = collections.get(name) {
                return Ok(Arc::clone(collection));
            }
        }

        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow!("Store lock poisoned"))?;
        if let Some(collection) = collections.get(name) {
            return Ok(Arc::clone(collection));
        }

        let collection: Arc<dyn KeyValueCollection> = match &self.keyspace {
            Some(keyspace) => {
                let partition = keyspace
                    .open_partition(name, PartitionCreateOptions::default())
                    .with_context(|| format!("Failed to open collection: {name}"))?;
                Arc::new(DiskCollection::new(partition))
            }
            None => Arc::new(MemoryCollection::new()),
        };
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    /// Syncs on-disk collections. A no-op in memory.
    pub fn flush(&self) -> Result<()> {
        if let Some(keyspace) = &self.keyspace {
            keyspace
                .persist(fjall::PersistMode::SyncAll)
                .context("Failed to persist store")?;
        }
        Ok(())
    }
}

impl Default for KeyValueStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: f64,
    }

    #[test]
    fn test_compose_key_prefix_does_not_match_sibling() {
        let user_1 = compose_key(&["1"]);
        let user_12_row = compose_key(&["12", "BTC"]);
        assert!(!user_12_row.starts_with(&user_1));
        assert!(compose_key(&["1", "BTC"]).starts_with(&user_1));
    }

    #[tokio::test]
    async fn test_in_memory_store_reuses_collections() -> Result<()> {
        let store = KeyValueStore::in_memory();
        let first = store.collection("rates")?;
        first.put(b"k", b"v").await?;

        let second = store.collection("rates")?;
        assert_eq!(second.get(b"k").await?, Some(b"v".to_vec()));

        let other = store.collection("snapshots")?;
        assert_eq!(other.get(b"k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_json_helpers() -> Result<()> {
        let store = KeyValueStore::in_memory();
        let collection = store.collection("rows")?;
        let row = Row {
            name: "a".to_string(),
            value: 1.5,
        };

        put_json(collection.as_ref(), &compose_key(&["x", "a"]), &row).await?;
        put_json(
            collection.as_ref(),
            &compose_key(&["y", "b"]),
            &Row {
                name: "b".to_string(),
                value: 2.0,
            },
        )
        .await?;

        let loaded: Option<Row> = get_json(collection.as_ref(), &compose_key(&["x", "a"])).await?;
        assert_eq!(loaded, Some(row));

        let scanned: Vec<Row> = scan_json(collection.as_ref(), &compose_key(&["y"])).await?;
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].name, "b");
        Ok(())
    }

    #[tokio::test]
    async fn test_disk_store_collections() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = KeyValueStore::open(dir.path())?;
        let collection = store.collection("snapshots")?;
        collection.put(b"key", b"value").await?;
        store.flush()?;

        let again = store.collection("snapshots")?;
        assert_eq!(again.get(b"key").await?, Some(b"value".to_vec()));
        assert_eq!(store.collection("rates")?.get(b"key").await?, None);
        Ok(())
    }
}
