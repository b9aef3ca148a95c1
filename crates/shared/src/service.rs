use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::cache::{CacheKeys, CacheStatus, CacheStore};
use crate::conversation::{ANONYMOUS_SESSION_ID, SessionKey, session_hash};
use crate::engine::{EngineInput, ResponseEngine};
use crate::models::{ChatReply, MenuItem, Restaurant, RestaurantStats};
use crate::repos::{ConversationLog, RestaurantRepository, StatsWindow, StoreError};
use crate::tenant::{
    ResolvedTenant, TenantDirectory, TenantError, TenantResolver, is_valid_slug,
};

/// Longest user message forwarded to the engine, in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;
const MAX_SESSION_ID_CHARS: usize = 128;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("restaurant not found: {0}")]
    TenantNotFound(String),
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl From<TenantError> for ServiceError {
    fn from(err: TenantError) -> Self {
        Self::TenantNotFound(err.to_string())
    }
}

fn repository_unavailable(err: StoreError) -> ServiceError {
    error!("repository read failed: {err}");
    ServiceError::RepositoryUnavailable(err.to_string())
}

pub struct ConciergeDependencies {
    pub resolver: Arc<TenantResolver>,
    pub cache: Arc<CacheStore>,
    pub cache_keys: CacheKeys,
    pub cache_ttl: Duration,
    pub restaurants: Arc<dyn RestaurantRepository>,
    pub conversation_log: Arc<dyn ConversationLog>,
    pub engine: ResponseEngine,
}

#[derive(Debug, Clone)]
pub struct ReadinessReport {
    pub database_ok: bool,
    pub cache: CacheStatus,
    pub ai_mode: String,
}

/// Entry point for the HTTP layer: tenant resolution, cache-backed tenant
/// data, chat handling and per-tenant analytics.
pub struct ConciergeService {
    resolver: Arc<TenantResolver>,
    cache: Arc<CacheStore>,
    cache_keys: CacheKeys,
    cache_ttl: Duration,
    restaurants: Arc<dyn RestaurantRepository>,
    conversation_log: Arc<dyn ConversationLog>,
    engine: ResponseEngine,
}

impl ConciergeService {
    pub fn new(dependencies: ConciergeDependencies) -> Self {
        let ConciergeDependencies {
            resolver,
            cache,
            cache_keys,
            cache_ttl,
            restaurants,
            conversation_log,
            engine,
        } = dependencies;

        Self {
            resolver,
            cache,
            cache_keys,
            cache_ttl,
            restaurants,
            conversation_log,
            engine,
        }
    }

    pub fn resolve_tenant(&self, host: &str, path: &str) -> Result<String, ServiceError> {
        Ok(self.resolver.resolve(host, path)?)
    }

    pub fn resolve_tenant_with_hint(
        &self,
        host: &str,
        path: &str,
        hint: Option<&str>,
    ) -> Result<ResolvedTenant, ServiceError> {
        Ok(self.resolver.resolve_with_hint(host, path, hint)?)
    }

    pub async fn get_restaurant(&self, slug: &str) -> Result<Restaurant, ServiceError> {
        let slug = normalize_slug(slug)?;
        let key = self.cache_keys.restaurant(&slug);
        let restaurants = Arc::clone(&self.restaurants);

        self.cache
            .get_or_populate(&key, self.cache_ttl, || async move {
                restaurants
                    .restaurant_by_slug(&slug)
                    .await
                    .map_err(repository_unavailable)?
                    .ok_or_else(|| ServiceError::TenantNotFound(slug.clone()))
            })
            .await
    }

    /// Active menu for a tenant, in display order.
    pub async fn get_menu(&self, slug: &str) -> Result<Vec<MenuItem>, ServiceError> {
        let restaurant = self.get_restaurant(slug).await?;
        self.menu_for(&restaurant).await
    }

    pub async fn menu_for(&self, restaurant: &Restaurant) -> Result<Vec<MenuItem>, ServiceError> {
        let key = self.cache_keys.menu(restaurant.id);
        let restaurants = Arc::clone(&self.restaurants);
        let restaurant_id = restaurant.id;

        self.cache
            .get_or_populate(&key, self.cache_ttl, || async move {
                restaurants
                    .active_menu(restaurant_id)
                    .await
                    .map_err(repository_unavailable)
            })
            .await
    }

    /// Answers one chat message. Only tenant lookup failures, repository
    /// outages on a cache miss, and empty messages are surfaced as errors.
    pub async fn handle_chat_message(
        &self,
        slug: &str,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<ChatReply, ServiceError> {
        let message = normalize_message(message)?;
        let session_id = normalize_session_id(session_id);
        let restaurant = self.get_restaurant(slug).await?;
        let menu = self.menu_for(&restaurant).await?;
        let session = match session_id {
            Some(session_id) => SessionKey::new(restaurant.id, session_id),
            None => SessionKey::anonymous(restaurant.id),
        };

        let outcome = self
            .engine
            .respond(EngineInput {
                restaurant: &restaurant,
                menu: &menu,
                session: &session,
                message: &message,
            })
            .await;

        let conversation_log = Arc::clone(&self.conversation_log);
        let turn = outcome.turn;
        tokio::spawn(async move {
            if let Err(err) = conversation_log.record_turn(&turn).await {
                warn!(
                    restaurant_id = %turn.restaurant_id,
                    session_hash = %session_hash(&turn.session_id),
                    "failed to persist conversation turn: {err}"
                );
            }
        });

        Ok(outcome.reply)
    }

    pub async fn restaurant_stats(
        &self,
        slug: &str,
        window_days: Option<u32>,
    ) -> Result<RestaurantStats, ServiceError> {
        let restaurant = self.get_restaurant(slug).await?;
        let window = window_days.map(StatsWindow::new).unwrap_or_default();
        self.conversation_log
            .restaurant_stats(restaurant.id, window)
            .await
            .map_err(repository_unavailable)
    }

    /// Drops the cached restaurant and menu entries for one tenant.
    pub async fn invalidate_tenant(&self, slug: &str) -> Result<(), ServiceError> {
        let slug = normalize_slug(slug)?;
        match self.restaurants.restaurant_by_slug(&slug).await {
            Ok(Some(restaurant)) => {
                self.cache
                    .invalidate(&self.cache_keys.menu(restaurant.id))
                    .await;
            }
            Ok(None) => {}
            Err(err) => warn!(slug = %slug, "menu cache entry left to expire: {err}"),
        }
        self.cache.invalidate(&self.cache_keys.restaurant(&slug)).await;
        info!(slug = %slug, "tenant cache invalidated");
        Ok(())
    }

    /// Reloads the subdomain directory from the repository. Returns the
    /// number of subdomains now known.
    pub async fn refresh_tenant_directory(&self) -> Result<usize, ServiceError> {
        let tenants = self
            .restaurants
            .list_active_tenants()
            .await
            .map_err(repository_unavailable)?;
        self.resolver
            .replace_directory(TenantDirectory::from_records(&tenants));
        Ok(self.resolver.known_subdomains())
    }

    pub fn spawn_directory_refresh(
        self: Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.refresh_tenant_directory().await {
                    Ok(known) => info!(subdomains = known, "tenant directory refreshed"),
                    Err(err) => warn!("tenant directory refresh failed; keeping previous: {err}"),
                }
            }
        })
    }

    pub async fn readiness(&self) -> ReadinessReport {
        let database_ok = match self.restaurants.ping().await {
            Ok(()) => true,
            Err(err) => {
                warn!("readiness database ping failed: {err}");
                false
            }
        };

        ReadinessReport {
            database_ok,
            cache: self.cache.status().await,
            ai_mode: self.engine.mode_label(),
        }
    }

    pub fn ai_mode(&self) -> String {
        self.engine.mode_label()
    }
}

fn normalize_slug(slug: &str) -> Result<String, ServiceError> {
    let slug = slug.trim().to_ascii_lowercase();
    if is_valid_slug(&slug) {
        Ok(slug)
    } else {
        Err(ServiceError::TenantNotFound(slug))
    }
}

/// Trims the message and caps it at [`MAX_MESSAGE_CHARS`].
pub fn normalize_message(message: &str) -> Result<String, ServiceError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::InvalidMessage(
            "message must not be empty".to_string(),
        ));
    }
    Ok(trimmed.chars().take(MAX_MESSAGE_CHARS).collect())
}

/// `None` for a missing, blank or literally anonymous id.
fn normalize_session_id(session_id: Option<&str>) -> Option<String> {
    session_id
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != ANONYMOUS_SESSION_ID)
        .map(|value| value.chars().take(MAX_SESSION_ID_CHARS).collect())
}
