use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Storage for remote lists of trusted proxies
///
/// Implementations must support concurrent reads and refreshes: no lock is held while a list is
/// fetched, so two requests may refresh the same expired key at the same time.
pub trait ListCache: Send + Sync {
    /// Get a list if it is present and not expired
    fn get(&self, key: &str) -> Option<Vec<String>>;

    /// Store a list for `ttl`
    fn put(&self, key: &str, value: Vec<String>, ttl: Duration);
}

/// Return the list cached under `key`, or produce it, cache it for `ttl` and return it
///
/// Errors of `producer` are returned as is and nothing is cached.
pub async fn remember<F, Fut, E>(
    cache: &dyn ListCache,
    key: &str,
    ttl: Duration,
    producer: F,
) -> Result<Vec<String>, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<String>, E>>,
{
    if let Some(value) = cache.get(key) {
        tracing::debug!(key, "trusted proxy list cache hit");

        return Ok(value);
    }

    tracing::debug!(key, "trusted proxy list cache miss");

    let value = producer().await?;
    cache.put(key, value.clone(), ttl);

    Ok(value)
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<String>,
    // `None` when the ttl overflows `Instant`
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// In memory [`ListCache`], shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a cached list, the next request will fetch it again
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}

impl ListCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<String>> {
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }

        None
    }

    fn put(&self, key: &str, value: Vec<String>, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };

        self.entries.insert(key.to_string(), entry);
    }
}
