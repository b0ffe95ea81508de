use crate::core::errors::ExchangeError;
use crate::core::kernel::clock::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// A cached value and the clock reading taken when its fetch started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<V> {
    pub value: V,
    pub fetched_at: i64,
}

struct Entry<V> {
    expires_at: Instant,
    fetched_at: i64,
    value: V,
}

/// Response cache with a fixed time-to-live per entry.
///
/// Fetch errors are returned to the caller and never cached. Each entry
/// remembers when it was fetched so that callers can date what they read
/// from it instead of treating it as current.
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            clock: Arc::new(SystemClock),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stamp entries with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_stamped(key).map(|fetched| fetched.value)
    }

    pub fn get_stamped(&self, key: &K) -> Option<Fetched<V>> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| Fetched {
                value: entry.value.clone(),
                fetched_at: entry.fetched_at,
            })
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_fetched(key, value, self.clock.now_ms());
    }

    fn insert_fetched(&self, key: K, value: V, fetched_at: i64) {
        let entry = Entry {
            expires_at: Instant::now() + self.ttl,
            fetched_at,
            value,
        };
        self.entries.lock().insert(key, entry);
    }

    /// Return the cached value for `key`, or run `fetcher` and cache its result.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetcher: F) -> Result<V, ExchangeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ExchangeError>>,
    {
        self.get_or_fetch_stamped(key, fetcher)
            .await
            .map(|fetched| fetched.value)
    }

    /// Like [`TtlCache::get_or_fetch`], also reporting when the value was fetched.
    pub async fn get_or_fetch_stamped<F, Fut>(
        &self,
        key: K,
        fetcher: F,
    ) -> Result<Fetched<V>, ExchangeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ExchangeError>>,
    {
        if let Some(fetched) = self.get_stamped(&key) {
            trace!(?key, fetched_at = fetched.fetched_at, "cache hit");
            return Ok(fetched);
        }

        trace!(?key, "cache miss");
        let fetched_at = self.clock.now_ms();
        let value = fetcher().await?;
        self.insert_fetched(key, value.clone(), fetched_at);
        Ok(Fetched { value, fetched_at })
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop expired entries
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, entry| entry.expires_at > now);
    }
}
