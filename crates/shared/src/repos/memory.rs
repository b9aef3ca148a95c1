use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::models::{ConversationTurn, MenuItem, MessageFrequency, ResponsePath, Restaurant, RestaurantStats};
use crate::tenant::TenantRecord;

use super::{
    ConversationLog, RepositoryFuture, RestaurantRepository, StatsWindow, StoreError,
    TOP_MESSAGES_LIMIT,
};

/// Process-local repository for development and tests. Mirrors the Postgres
/// query semantics: only active rows are visible and menus come back in
/// display order. Fault injection and read counters need the `test-util`
/// feature.
#[derive(Default)]
pub struct InMemoryRepository {
    restaurants: RwLock<HashMap<String, Restaurant>>,
    menus: RwLock<HashMap<Uuid, Vec<MenuItem>>>,
    conversations: RwLock<Vec<ConversationTurn>>,
    turn_recorded: Notify,
    unavailable: AtomicBool,
    read_delay: Option<Duration>,
    restaurant_reads: AtomicUsize,
    menu_reads: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every read sleeps for `delay` first, widening the window in which
    /// concurrent callers can miss the cache together.
    #[cfg(any(test, feature = "test-util"))]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub async fn insert_restaurant(&self, restaurant: Restaurant) {
        self.restaurants
            .write()
            .await
            .insert(restaurant.slug.clone(), restaurant);
    }

    pub async fn insert_menu_item(&self, item: MenuItem) {
        self.menus
            .write()
            .await
            .entry(item.restaurant_id)
            .or_default()
            .push(item);
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn restaurant_reads(&self) -> usize {
        self.restaurant_reads.load(Ordering::SeqCst)
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn menu_reads(&self) -> usize {
        self.menu_reads.load(Ordering::SeqCst)
    }

    #[cfg(any(test, feature = "test-util"))]
    pub async fn recorded_turns(&self) -> Vec<ConversationTurn> {
        self.conversations.read().await.clone()
    }

    /// Waits until at least `count` turns were recorded or `within` elapses.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn wait_for_turns(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let notified = self.turn_recorded.notified();
            if self.conversations.read().await.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.conversations.read().await.len() >= count;
            }
        }
    }

    async fn before_read(&self) -> Result<(), StoreError> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory repository marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn find_restaurant(&self, slug: &str) -> Result<Option<Restaurant>, StoreError> {
        self.restaurant_reads.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        Ok(self
            .restaurants
            .read()
            .await
            .get(slug)
            .filter(|restaurant| restaurant.active)
            .cloned())
    }

    async fn tenants(&self) -> Result<Vec<TenantRecord>, StoreError> {
        self.before_read().await?;
        let mut tenants = self
            .restaurants
            .read()
            .await
            .values()
            .filter(|restaurant| restaurant.active)
            .map(|restaurant| TenantRecord {
                slug: restaurant.slug.clone(),
                subdomain: restaurant.subdomain.clone(),
            })
            .collect::<Vec<_>>();
        tenants.sort_by(|left, right| left.slug.cmp(&right.slug));
        Ok(tenants)
    }

    async fn menu(&self, restaurant_id: Uuid) -> Result<Vec<MenuItem>, StoreError> {
        self.menu_reads.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        let mut items = self
            .menus
            .read()
            .await
            .get(&restaurant_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.active && item.check_invariants().is_ok())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        items.sort_by(|left, right| {
            left.display_order
                .cmp(&right.display_order)
                .then_with(|| left.category.as_str().cmp(right.category.as_str()))
                .then_with(|| left.name.cmp(&right.name))
        });
        Ok(items)
    }

    async fn record(&self, turn: &ConversationTurn) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory repository marked unavailable".to_string(),
            ));
        }
        self.conversations.write().await.push(turn.clone());
        self.turn_recorded.notify_waiters();
        Ok(())
    }

    async fn stats(
        &self,
        restaurant_id: Uuid,
        window: StatsWindow,
    ) -> Result<RestaurantStats, StoreError> {
        self.before_read().await?;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(window.days()));
        let conversations = self.conversations.read().await;
        let in_window = conversations
            .iter()
            .filter(|turn| turn.restaurant_id == restaurant_id && turn.created_at > cutoff)
            .collect::<Vec<_>>();

        let mut sessions = HashSet::new();
        let mut daily_conversations = BTreeMap::new();
        let mut message_counts: HashMap<String, i64> = HashMap::new();
        let mut remote_model_responses = 0_i64;
        let mut latency_total = 0_f64;
        for turn in &in_window {
            sessions.insert(turn.session_id.as_str());
            *daily_conversations
                .entry(turn.created_at.date_naive())
                .or_insert(0_i64) += 1;
            *message_counts
                .entry(turn.user_message.trim().to_lowercase())
                .or_insert(0) += 1;
            if turn.response_path == ResponsePath::RemoteModel {
                remote_model_responses += 1;
            }
            latency_total += turn.latency_ms as f64;
        }

        let mut top_messages = message_counts
            .into_iter()
            .map(|(message, count)| MessageFrequency { message, count })
            .collect::<Vec<_>>();
        top_messages.sort_by(|left, right| {
            right
                .count
                .cmp(&left.count)
                .then_with(|| left.message.cmp(&right.message))
        });
        top_messages.truncate(TOP_MESSAGES_LIMIT);

        let total = in_window.len() as i64;
        Ok(RestaurantStats {
            restaurant_id,
            window_days: window.days(),
            total_conversations: total,
            unique_sessions: sessions.len() as i64,
            remote_model_responses,
            fallback_responses: total - remote_model_responses,
            average_latency_ms: (total > 0).then(|| latency_total / total as f64),
            daily_conversations,
            top_messages,
        })
    }
}

impl RestaurantRepository for InMemoryRepository {
    fn restaurant_by_slug<'a>(&'a self, slug: &'a str) -> RepositoryFuture<'a, Option<Restaurant>> {
        Box::pin(self.find_restaurant(slug))
    }

    fn list_active_tenants(&self) -> RepositoryFuture<'_, Vec<TenantRecord>> {
        Box::pin(self.tenants())
    }

    fn active_menu(&self, restaurant_id: Uuid) -> RepositoryFuture<'_, Vec<MenuItem>> {
        Box::pin(self.menu(restaurant_id))
    }

    fn ping(&self) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable(
                    "in-memory repository marked unavailable".to_string(),
                ));
            }
            Ok(())
        })
    }
}

impl ConversationLog for InMemoryRepository {
    fn record_turn<'a>(&'a self, turn: &'a ConversationTurn) -> RepositoryFuture<'a, ()> {
        Box::pin(self.record(turn))
    }

    fn restaurant_stats(
        &self,
        restaurant_id: Uuid,
        window: StatsWindow,
    ) -> RepositoryFuture<'_, RestaurantStats> {
        Box::pin(self.stats(restaurant_id, window))
    }
}
