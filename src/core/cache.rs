use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Rates older than this are refreshed on the next update.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// A cache read. `fresh` is false once the TTL has passed; the value is still
/// the last one that was successfully stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V> {
    pub value: V,
    pub fresh: bool,
}

/// TTL memo that keeps the last known good value after expiry.
///
/// Shared between concurrent valuations. Two callers racing on an expired
/// entry will both refresh it.
#[derive(Clone)]
pub struct RateCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    ttl: Duration,
    inner: Arc<Mutex<HashMap<K, CacheEntry<V>>>>,
}

impl<K, V> RateCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug,
    V: Clone + Send + Sync,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<Cached<V>> {
        let cache = self.inner.lock().await;
        match cache.get(key) {
            Some(entry) => {
                let fresh = entry.stored_at.elapsed() < self.ttl;
                if fresh {
                    debug!("Cache HIT for key: {:?}", key);
                } else {
                    debug!("Cache STALE for key: {:?}", key);
                }
                Some(Cached {
                    value: entry.value.clone(),
                    fresh,
                })
            }
            None => {
                debug!("Cache MISS for key: {:?}", key);
                None
            }
        }
    }

    pub async fn put(&self, key: K, value: V) {
        let mut cache = self.inner.lock().await;
        debug!("Cache PUT for key: {:?}", key);
        cache.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Every stored value regardless of age.
    pub async fn entries(&self) -> Vec<(K, V)> {
        let cache = self.inner.lock().await;
        cache
            .iter()
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect()
    }
}

impl<K, V> Default for RateCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug,
    V: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_cache_get_put() {
        let cache = RateCache::<String, i32>::default();

        assert!(cache.get(&"key1".to_string()).await.is_none());

        cache.put("key1".to_string(), 123).await;

        assert_eq!(
            cache.get(&"key1".to_string()).await,
            Some(Cached {
                value: 123,
                fresh: true
            })
        );
        assert!(cache.get(&"key2".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_stale_but_kept() {
        let cache = RateCache::<String, i32>::new(Duration::from_millis(10));
        cache.put("key1".to_string(), 123).await;

        sleep(Duration::from_millis(20)).await;

        let cached = cache.get(&"key1".to_string()).await.unwrap();
        assert_eq!(cached.value, 123);
        assert!(!cached.fresh);
    }

    #[tokio::test]
    async fn test_put_refreshes_stale_entry() {
        let cache = RateCache::<String, i32>::new(Duration::from_millis(10));
        cache.put("key1".to_string(), 1).await;
        sleep(Duration::from_millis(20)).await;

        cache.put("key1".to_string(), 2).await;

        let cached = cache.get(&"key1".to_string()).await.unwrap();
        assert_eq!(cached.value, 2);
        assert!(cached.fresh);
    }

    #[tokio::test]
    async fn test_entries_lists_all_values() {
        let cache = RateCache::<String, f64>::default();
        cache.put("SBER".to_string(), 3.1).await;
        cache.put("GAZP".to_string(), 1.7).await;

        let mut entries = cache.entries().await;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            entries,
            vec![("GAZP".to_string(), 1.7), ("SBER".to_string(), 3.1)]
        );
    }
}
