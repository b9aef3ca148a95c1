use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shared::cache::{CacheBackend, CacheKeys, CacheStore, InMemoryCacheBackend, RedisCacheBackend};
use shared::config::AppConfig;
use shared::conversation::{ConversationStore, InMemoryConversationStore, RedisConversationStore};
use shared::engine::ResponseEngine;
use shared::repos::Store;
use shared::service::{ConciergeDependencies, ConciergeService};
use shared::tenant::{TenantDirectory, TenantResolver};
use tracing::{error, info, warn};

mod http;

const DEFAULT_LOG_FILTER: &str = "api_server=debug,shared=info,tower_http=info";
const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read config: {err}");
            std::process::exit(1);
        }
    };

    let store = match Store::connect(
        &config.database.url,
        config.database.min_connections,
        config.database.max_connections,
        config.database.acquire_timeout,
    )
    .await
    {
        Ok(store) => store,
        Err(err) => {
            error!("failed to connect to postgres: {err}");
            std::process::exit(1);
        }
    };

    let redis = match config.cache.redis_url.as_deref() {
        Some(redis_url) => match RedisCacheBackend::connect(redis_url).await {
            Ok(backend) => Some(backend),
            Err(err) => {
                warn!("redis unavailable at startup; using in-process cache and history: {err}");
                None
            }
        },
        None => None,
    };

    let (cache_backend, conversations): (Arc<dyn CacheBackend>, Arc<dyn ConversationStore>) =
        match redis {
            Some(backend) => {
                let conversations: Arc<dyn ConversationStore> = Arc::new(RedisConversationStore::new(
                    backend.connection(),
                    config.cache.key_prefix.clone(),
                    config.conversation.history_limit,
                    config.conversation.session_ttl,
                    config.cache.backend_timeout,
                ));
                let backend: Arc<dyn CacheBackend> = Arc::new(backend);
                (backend, conversations)
            }
            None => {
                let memory = InMemoryConversationStore::new(
                    config.conversation.history_limit,
                    config.conversation.session_ttl,
                );
                memory.spawn_pruner(SESSION_PRUNE_INTERVAL);
                let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
                let conversations: Arc<dyn ConversationStore> = Arc::new(memory);
                (backend, conversations)
            }
        };

    let gateway = match config.remote_models.build_gateway(&config.remote_budget) {
        Ok(gateway) => gateway,
        Err(err) => {
            error!("failed to configure remote model: {err}");
            std::process::exit(1);
        }
    };

    let restaurants = Arc::new(store.clone());
    let service = Arc::new(ConciergeService::new(ConciergeDependencies {
        resolver: Arc::new(TenantResolver::new(
            TenantDirectory::default(),
            config.tenancy.reserved_subdomains.clone(),
            config.tenancy.default_slug.clone(),
        )),
        cache: Arc::new(CacheStore::new(
            Some(Arc::clone(&cache_backend)),
            config.cache.backend_timeout,
        )),
        cache_keys: CacheKeys::new(config.cache.key_prefix.clone()),
        cache_ttl: config.cache.ttl,
        restaurants: restaurants.clone(),
        conversation_log: restaurants,
        engine: ResponseEngine::new(gateway, config.remote_budget, Arc::clone(&conversations)),
    }));

    match service.refresh_tenant_directory().await {
        Ok(known) => info!(subdomains = known, "tenant directory loaded"),
        Err(err) => warn!("initial tenant directory load failed; retrying in background: {err}"),
    }
    Arc::clone(&service).spawn_directory_refresh(config.tenancy.directory_refresh);

    info!(
        cache_backend = cache_backend.name(),
        conversation_backend = conversations.name(),
        history_limit = conversations.limit(),
        ai_mode = %service.ai_mode(),
        "concierge service ready"
    );

    let app = http::build_router(http::AppState { service });

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(bind_addr = %config.bind_addr, "invalid bind address: {err}");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!(
        "api server listening on {}",
        listener.local_addr().unwrap_or(addr)
    );
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server terminated: {err}");
    }

    store.close().await;
    info!("api server stopped");
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
