//! Short-TTL read-through / write-through cache for device status
//!
//! Each key has its own async lock. Readers of one key queue on it, so a
//! burst of reads past the TTL costs exactly one fetch; reads of other keys
//! are not blocked. A failed fetch leaves the previous entry in place.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default time a status stays fresh.
pub const DEFAULT_TTL: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub timestamp: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            timestamp: Instant::now(),
            ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.timestamp.elapsed() < self.ttl
    }
}

type Slot<T> = Arc<Mutex<Option<CacheEntry<T>>>>;

pub struct StatusCache<T> {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot<T>>>,
}

impl<T: Clone> StatusCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value if younger than the TTL, otherwise the result of `fetch`,
    /// which is stored with a new timestamp.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let slot = self.slot(key).await;
        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.value.clone());
            }
        }

        debug!(key, "status cache miss");
        let value = fetch().await?;
        *entry = Some(CacheEntry::new(value.clone(), self.ttl));
        Ok(value)
    }

    /// Fresh cached value, without fetching.
    pub async fn get(&self, key: &str) -> Option<T> {
        let slot = self.slot(key).await;
        let entry = slot.lock().await;
        entry
            .as_ref()
            .filter(|cached| cached.is_fresh())
            .map(|cached| cached.value.clone())
    }

    /// Write-through: replace the entry with a just-confirmed value.
    pub async fn put(&self, key: &str, value: T) {
        let slot = self.slot(key).await;
        *slot.lock().await = Some(CacheEntry::new(value, self.ttl));
    }

    pub async fn invalidate(&self, key: &str) {
        let slot = self.slot(key).await;
        *slot.lock().await = None;
    }

    async fn slot(&self, key: &str) -> Slot<T> {
        self.slots
            .lock()
            .await
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}
