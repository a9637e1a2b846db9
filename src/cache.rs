use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    computed_at: Instant,
}

impl<V> CacheEntry<V> {
    /// `None` when `computed_at` lies after `now`; such an entry is never served.
    fn age(&self, now: Instant) -> Option<Duration> {
        now.checked_duration_since(self.computed_at)
    }
}

/// Memoizes computed values per structured key for a caller-supplied TTL.
///
/// The lock is only held to read or store an entry, never while computing, so several callers
/// missing on the same key at once may each compute. Failed computations are not stored.
#[derive(Debug)]
pub struct ResultCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> Default for ResultCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    pub fn get_fresh(&self, key: &K, ttl: Duration, now: Instant) -> Option<V> {
        let guard = self.lock();
        let entry = guard.get(key)?;
        match entry.age(now) {
            Some(age) if age < ttl => Some(entry.value.clone()),
            _ => None,
        }
    }

    pub fn insert(&self, key: K, value: V, computed_at: Instant) {
        self.lock().insert(key, CacheEntry { value, computed_at });
    }

    pub async fn get_or_compute<F, Fut, E>(&self, key: K, ttl: Duration, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.get_fresh(&key, ttl, Instant::now()) {
            return Ok(v);
        }
        let value = compute().await?;
        self.insert(key, value.clone(), Instant::now());
        Ok(value)
    }

    #[cfg(test)]
    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
