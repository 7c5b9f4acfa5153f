use super::{KeyValueCollection, KeyValuePair};
use anyhow::Result;
use async_trait::async_trait;
use fjall::PartitionHandle;
use tokio::sync::Mutex;
use tracing::debug;

/// Collection backed by a fjall partition.
pub struct DiskCollection {
    partition: PartitionHandle,
    // fjall has no compare-and-set on a plain partition; serialize the
    // check-then-insert path within the process.
    insert_guard: Mutex<()>,
}

impl DiskCollection {
    pub fn new(partition: PartitionHandle) -> Self {
        Self {
            partition,
            insert_guard: Mutex::new(()),
        }
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.partition.get(key)?;
        Ok(value.map(|slice| slice.to_vec()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _guard = self.insert_guard.lock().await;
        self.partition.insert(key, value)?;
        debug!("Disk PUT for key: {}", String::from_utf8_lossy(key));
        Ok(())
    }

    async fn insert_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let _guard = self.insert_guard.lock().await;
        if self.partition.contains_key(key)? {
            return Ok(false);
        }
        self.partition.insert(key, value)?;
        debug!("Disk INSERT for key: {}", String::from_utf8_lossy(key));
        Ok(true)
    }

    async fn remove(&self, key: &[u8]) -> Result<()> {
        let _guard = self.insert_guard.lock().await;
        self.partition.remove(key)?;
        debug!("Disk REMOVE for key: {}", String::from_utf8_lossy(key));
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValuePair>> {
        self.partition
            .prefix(prefix)
            .map(|item| {
                let (key, value) = item?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }
}
