use super::{KeyValueCollection, KeyValuePair};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory collection, ordered like the on-disk one.
#[derive(Clone, Default)]
pub struct MemoryCollection {
    inner: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.inner.lock().await;
        Ok(map.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut map = self.inner.lock().await;
        debug!("Memory PUT for key: {}", String::from_utf8_lossy(key));
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn insert_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut map = self.inner.lock().await;
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    async fn remove(&self, key: &[u8]) -> Result<()> {
        let mut map = self.inner.lock().await;
        map.remove(key);
        debug!("Memory REMOVE for key: {}", String::from_utf8_lossy(key));
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValuePair>> {
        let map = self.inner.lock().await;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
