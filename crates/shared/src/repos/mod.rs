use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ConversationTurn, MenuItem, Restaurant, RestaurantStats};
use crate::tenant::TenantRecord;

mod conversations;
mod memory;
mod restaurants;

pub use memory::InMemoryRepository;

pub const DEFAULT_STATS_WINDOW_DAYS: u32 = 30;
pub const MAX_STATS_WINDOW_DAYS: u32 = 90;
pub const TOP_MESSAGES_LIMIT: usize = 5;

pub type RepositoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

/// Read path for tenant configuration and menus. Every query is scoped to
/// active rows.
pub trait RestaurantRepository: Send + Sync {
    fn restaurant_by_slug<'a>(&'a self, slug: &'a str) -> RepositoryFuture<'a, Option<Restaurant>>;
    fn list_active_tenants(&self) -> RepositoryFuture<'_, Vec<TenantRecord>>;
    /// Active items for one restaurant, in display order.
    fn active_menu(&self, restaurant_id: Uuid) -> RepositoryFuture<'_, Vec<MenuItem>>;
    fn ping(&self) -> RepositoryFuture<'_, ()>;
}

/// Append-only record of chat exchanges, queried for per-tenant analytics.
pub trait ConversationLog: Send + Sync {
    fn record_turn<'a>(&'a self, turn: &'a ConversationTurn) -> RepositoryFuture<'a, ()>;
    fn restaurant_stats(
        &self,
        restaurant_id: Uuid,
        window: StatsWindow,
    ) -> RepositoryFuture<'_, RestaurantStats>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsWindow {
    days: u32,
}

impl StatsWindow {
    pub fn new(days: u32) -> Self {
        Self {
            days: days.clamp(1, MAX_STATS_WINDOW_DAYS),
        }
    }

    pub fn days(self) -> u32 {
        self.days
    }
}

impl Default for StatsWindow {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_WINDOW_DAYS)
    }
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(
        database_url: &str,
        min_connections: u32,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .min_connections(min_connections.min(max_connections))
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
