use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::CacheError;

pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Key-value store with per-entry expiry backing the cache-aside layer.
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>>;
    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()>;
    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()>;
    fn ping<'a>(&'a self) -> CacheFuture<'a, ()>;
}

#[derive(Debug)]
struct StoredValue {
    payload: String,
    expires_at: Instant,
}

/// Process-local backend used when no shared cache is configured.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock_entries()
            .values()
            .filter(|stored| stored.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, StoredValue>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.lock_entries();
            match entries.get(key) {
                Some(stored) if stored.expires_at > now => Ok(Some(stored.payload.clone())),
                Some(_) => {
                    entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let expires_at = Instant::now() + ttl;
            self.lock_entries().insert(
                key.to_string(),
                StoredValue {
                    payload: value,
                    expires_at,
                },
            );
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            self.lock_entries().remove(key);
            Ok(())
        })
    }

    fn ping<'a>(&'a self) -> CacheFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}
