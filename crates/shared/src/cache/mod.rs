use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

mod backend;
mod redis_backend;

pub use backend::{CacheBackend, CacheFuture, InMemoryCacheBackend};
pub use redis_backend::RedisCacheBackend;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache backend timed out")]
    Timeout,
    #[error("cache entry is corrupt: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Tenant-scoped key layout for cached restaurant data.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn restaurant(&self, slug: &str) -> String {
        format!("{}:restaurant:{slug}", self.prefix)
    }

    pub fn menu(&self, restaurant_id: Uuid) -> String {
        format!("{}:menu:{restaurant_id}", self.prefix)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope<T> {
    value: T,
    inserted_at_ms: i64,
    ttl_ms: u64,
}

impl<T> CacheEnvelope<T> {
    fn is_expired(&self, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        self.inserted_at_ms.saturating_add(ttl_ms) <= now_ms
    }
}

type ErasedFlight = Arc<dyn Any + Send + Sync>;

struct Flight<T, E> {
    cell: Arc<OnceCell<Result<T, E>>>,
    erased: ErasedFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Connected(&'static str),
    Unavailable(&'static str),
    Disabled,
}

impl CacheStatus {
    pub fn label(self) -> String {
        match self {
            Self::Connected(name) => format!("{name}:connected"),
            Self::Unavailable(name) => format!("{name}:unavailable"),
            Self::Disabled => "disabled".to_string(),
        }
    }
}

/// Cache-aside store with single-flight population.
///
/// Concurrent misses on one key share a single `populate` call: the first
/// caller becomes the leader and every other caller awaits its outcome.
/// Backend failures never reach the caller; reads degrade to a miss and
/// writes are dropped, both logged at `warn`.
pub struct CacheStore {
    backend: Option<Arc<dyn CacheBackend>>,
    backend_timeout: Duration,
    in_flight: Mutex<HashMap<String, ErasedFlight>>,
}

impl CacheStore {
    pub fn new(backend: Option<Arc<dyn CacheBackend>>, backend_timeout: Duration) -> Self {
        Self {
            backend,
            backend_timeout,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory(backend_timeout: Duration) -> Self {
        Self::new(Some(Arc::new(InMemoryCacheBackend::new())), backend_timeout)
    }

    pub async fn get_or_populate<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        populate: F,
    ) -> Result<T, E>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.read::<T>(key).await {
            return Ok(hit);
        }

        let Some(flight) = self.join_flight::<T, E>(key) else {
            warn!(cache_key = %key, "cache flight type mismatch; populating without coalescing");
            return self.populate_and_store(key, ttl, populate).await;
        };

        let outcome = flight
            .cell
            .get_or_init(|| async {
                if let Some(hit) = self.read::<T>(key).await {
                    return Ok(hit);
                }
                self.populate_and_store(key, ttl, populate).await
            })
            .await
            .clone();

        self.finish_flight(key, &flight.erased);
        outcome
    }

    pub async fn invalidate(&self, key: &str) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };

        match self.bounded(backend.delete(key)).await {
            Ok(()) => debug!(cache_key = %key, "cache entry invalidated"),
            Err(err) => {
                warn!(cache_key = %key, backend = backend.name(), "cache invalidation failed: {err}")
            }
        }
    }

    pub async fn status(&self) -> CacheStatus {
        let Some(backend) = self.backend.as_ref() else {
            return CacheStatus::Disabled;
        };

        match self.bounded(backend.ping()).await {
            Ok(()) => CacheStatus::Connected(backend.name()),
            Err(_) => CacheStatus::Unavailable(backend.name()),
        }
    }

    async fn read<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let backend = self.backend.as_ref()?;
        let raw = match self.bounded(backend.get(key)).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    cache_key = %key,
                    backend = backend.name(),
                    "cache read degraded; falling back to repository: {err}"
                );
                return None;
            }
        };

        let Some(payload) = raw else {
            debug!(cache_key = %key, "cache miss");
            return None;
        };

        match serde_json::from_str::<CacheEnvelope<T>>(&payload) {
            Ok(envelope) if envelope.is_expired(Utc::now().timestamp_millis()) => {
                debug!(cache_key = %key, "cache entry expired");
                None
            }
            Ok(envelope) => {
                debug!(cache_key = %key, "cache hit");
                Some(envelope.value)
            }
            Err(err) => {
                let err = CacheError::Corrupt(err.to_string());
                warn!(cache_key = %key, "ignoring cache entry: {err}");
                None
            }
        }
    }

    async fn populate_and_store<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        populate: F,
    ) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = populate().await?;
        self.write(key, &value, ttl).await;
        Ok(value)
    }

    async fn write<T>(&self, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };

        let envelope = CacheEnvelope {
            value,
            inserted_at_ms: Utc::now().timestamp_millis(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(cache_key = %key, "failed to serialize cache entry: {err}");
                return;
            }
        };

        match self.bounded(backend.set_ex(key, payload, ttl)).await {
            Ok(()) => debug!(cache_key = %key, ttl_seconds = ttl.as_secs(), "cache populated"),
            Err(err) => warn!(
                cache_key = %key,
                backend = backend.name(),
                "cache write degraded; serving uncached value: {err}"
            ),
        }
    }

    async fn bounded<T>(&self, operation: CacheFuture<'_, T>) -> Result<T, CacheError> {
        timeout(self.backend_timeout, operation)
            .await
            .unwrap_or(Err(CacheError::Timeout))
    }

    fn join_flight<T, E>(&self, key: &str) -> Option<Flight<T, E>>
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let mut in_flight = self.lock_in_flight();
        let erased = in_flight
            .entry(key.to_string())
            .or_insert_with(|| {
                let cell: Arc<OnceCell<Result<T, E>>> = Arc::new(OnceCell::new());
                cell as ErasedFlight
            })
            .clone();

        let cell = Arc::clone(&erased)
            .downcast::<OnceCell<Result<T, E>>>()
            .ok()?;
        Some(Flight { cell, erased })
    }

    fn finish_flight(&self, key: &str, erased: &ErasedFlight) {
        let mut in_flight = self.lock_in_flight();
        if in_flight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, erased))
        {
            in_flight.remove(key);
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, ErasedFlight>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{CacheEnvelope, CacheKeys};

    #[test]
    fn keys_are_scoped_by_prefix_and_tenant() {
        let keys = CacheKeys::new("tablechat:v1");
        let restaurant_id = Uuid::nil();
        assert_eq!(keys.restaurant("luigi"), "tablechat:v1:restaurant:luigi");
        assert_eq!(
            keys.menu(restaurant_id),
            "tablechat:v1:menu:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn envelope_expires_at_inserted_plus_ttl() {
        let envelope = CacheEnvelope {
            value: 1_u8,
            inserted_at_ms: 1_000,
            ttl_ms: 500,
        };
        assert!(!envelope.is_expired(1_499));
        assert!(envelope.is_expired(1_500));
    }
}
