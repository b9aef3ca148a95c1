use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use shared::cache::{CacheBackend, CacheError, CacheFuture, CacheStatus, CacheStore};
use tokio::task::JoinSet;

const KEY: &str = "tablechat:test:restaurant:luigi";

struct FailingBackend;

impl CacheBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn get<'a>(&'a self, _key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async { Err(CacheError::Unavailable("connection refused".to_string())) })
    }

    fn set_ex<'a>(&'a self, _key: &'a str, _value: String, _ttl: Duration) -> CacheFuture<'a, ()> {
        Box::pin(async { Err(CacheError::Unavailable("connection refused".to_string())) })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async { Err(CacheError::Unavailable("connection refused".to_string())) })
    }

    fn ping<'a>(&'a self) -> CacheFuture<'a, ()> {
        Box::pin(async { Err(CacheError::Unavailable("connection refused".to_string())) })
    }
}

struct HangingBackend;

impl CacheBackend for HangingBackend {
    fn name(&self) -> &'static str {
        "hanging"
    }

    fn get<'a>(&'a self, _key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        })
    }

    fn set_ex<'a>(&'a self, _key: &'a str, _value: String, _ttl: Duration) -> CacheFuture<'a, ()> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn ping<'a>(&'a self) -> CacheFuture<'a, ()> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
    }
}

async fn slow_read(reads: Arc<AtomicUsize>) -> Result<String, String> {
    reads.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok("Luigi's Trattoria".to_string())
}

async fn concurrent_lookups(
    cache: Arc<CacheStore>,
    reads: Arc<AtomicUsize>,
    callers: usize,
    ttl: Duration,
) -> Vec<Result<String, String>> {
    let mut tasks = JoinSet::new();
    for _ in 0..callers {
        let cache = Arc::clone(&cache);
        let reads = Arc::clone(&reads);
        tasks.spawn(async move {
            cache
                .get_or_populate(KEY, ttl, || slow_read(reads))
                .await
        });
    }

    let mut results = Vec::with_capacity(callers);
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.expect("lookup task should not panic"));
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_misses_share_one_read() {
    let cache = Arc::new(CacheStore::in_memory(Duration::from_millis(250)));
    let reads = Arc::new(AtomicUsize::new(0));

    let results = concurrent_lookups(
        Arc::clone(&cache),
        Arc::clone(&reads),
        50,
        Duration::from_secs(60),
    )
    .await;

    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert_eq!(results.len(), 50);
    assert!(
        results
            .iter()
            .all(|result| result.as_deref() == Ok("Luigi's Trattoria"))
    );

    let cached = cache
        .get_or_populate(KEY, Duration::from_secs(60), || slow_read(Arc::clone(&reads)))
        .await;
    assert_eq!(cached.as_deref(), Ok("Luigi's Trattoria"));
    assert_eq!(reads.load(Ordering::SeqCst), 1, "warm entry must be a hit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_entry_is_repopulated_once() {
    let cache = Arc::new(CacheStore::in_memory(Duration::from_millis(250)));
    let reads = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_millis(100);

    concurrent_lookups(Arc::clone(&cache), Arc::clone(&reads), 10, ttl).await;
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;

    concurrent_lookups(Arc::clone(&cache), Arc::clone(&reads), 10, ttl).await;
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unavailable_backend_degrades_to_coalesced_reads() {
    let cache = Arc::new(CacheStore::new(
        Some(Arc::new(FailingBackend)),
        Duration::from_millis(250),
    ));
    let reads = Arc::new(AtomicUsize::new(0));

    let results = concurrent_lookups(
        Arc::clone(&cache),
        Arc::clone(&reads),
        20,
        Duration::from_secs(60),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.status().await, CacheStatus::Unavailable("failing"));

    // Nothing could be stored, so the next caller reads again.
    let again = cache
        .get_or_populate(KEY, Duration::from_secs(60), || slow_read(Arc::clone(&reads)))
        .await;
    assert!(again.is_ok());
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn slow_backend_is_bounded_by_its_timeout() {
    let cache = CacheStore::new(Some(Arc::new(HangingBackend)), Duration::from_millis(50));
    let reads = Arc::new(AtomicUsize::new(0));

    let started = tokio::time::Instant::now();
    let value = cache
        .get_or_populate(KEY, Duration::from_secs(60), || slow_read(Arc::clone(&reads)))
        .await;

    assert_eq!(value.as_deref(), Ok("Luigi's Trattoria"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(cache.status().await, CacheStatus::Unavailable("hanging"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn populate_errors_are_shared_but_not_cached() {
    let cache = Arc::new(CacheStore::in_memory(Duration::from_millis(250)));
    let reads = Arc::new(AtomicUsize::new(0));

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let cache = Arc::clone(&cache);
        let reads = Arc::clone(&reads);
        tasks.spawn(async move {
            cache
                .get_or_populate(KEY, Duration::from_secs(60), || async move {
                    reads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err::<String, String>("database down".to_string())
                })
                .await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        let result = joined.expect("lookup task should not panic");
        assert_eq!(result, Err("database down".to_string()));
    }
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    let recovered = cache
        .get_or_populate(KEY, Duration::from_secs(60), || slow_read(Arc::clone(&reads)))
        .await;
    assert_eq!(recovered.as_deref(), Ok("Luigi's Trattoria"));
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidation_forces_a_fresh_read() {
    let cache = CacheStore::in_memory(Duration::from_millis(250));
    let reads = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        cache
            .get_or_populate(KEY, Duration::from_secs(60), || slow_read(Arc::clone(&reads)))
            .await
            .expect("populate should succeed");
    }
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    cache.invalidate(KEY).await;
    cache
        .get_or_populate(KEY, Duration::from_secs(60), || slow_read(Arc::clone(&reads)))
        .await
        .expect("populate should succeed");
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}
