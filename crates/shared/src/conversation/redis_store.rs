use std::future::Future;
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::timeout;
use tracing::warn;

use crate::models::ConversationTurn;

use super::{ConversationFuture, ConversationStore, ConversationStoreError, SessionKey};

const CONVERSATION_SCOPE: &str = "conversation";

/// Shared history kept in a capped Redis list per session. The list is
/// trimmed and its expiry refreshed in the same atomic pipeline as the push.
#[derive(Clone)]
pub struct RedisConversationStore {
    connection: ConnectionManager,
    key_prefix: String,
    limit: usize,
    idle_ttl: Duration,
    backend_timeout: Duration,
}

impl RedisConversationStore {
    pub fn new(
        connection: ConnectionManager,
        key_prefix: impl Into<String>,
        limit: usize,
        idle_ttl: Duration,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
            limit: limit.max(1),
            idle_ttl,
            backend_timeout,
        }
    }

    fn session_key(&self, key: &SessionKey) -> String {
        format!(
            "{}:{CONVERSATION_SCOPE}:{}:{}",
            self.key_prefix,
            key.restaurant_id(),
            key.hashed()
        )
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, ConversationStoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.backend_timeout, operation).await {
            Ok(result) => result.map_err(ConversationStoreError::from),
            Err(_) => Err(ConversationStoreError::Timeout),
        }
    }

    async fn push(&self, key: &SessionKey, turn: ConversationTurn) -> Result<(), ConversationStoreError> {
        let payload = serde_json::to_string(&turn)
            .map_err(|err| ConversationStoreError::Corrupt(err.to_string()))?;
        let redis_key = self.session_key(key);
        let keep_from = -isize::try_from(self.limit).unwrap_or(isize::MAX);
        let ttl_seconds = i64::try_from(self.idle_ttl.as_secs().max(1)).unwrap_or(i64::MAX);

        let mut pipeline = redis::pipe();
        pipeline
            .atomic()
            .rpush(&redis_key, payload)
            .ignore()
            .ltrim(&redis_key, keep_from, -1)
            .ignore()
            .expire(&redis_key, ttl_seconds)
            .ignore();

        let mut connection = self.connection.clone();
        self.bounded(pipeline.query_async::<()>(&mut connection)).await
    }

    async fn load(&self, key: &SessionKey) -> Result<Vec<ConversationTurn>, ConversationStoreError> {
        let redis_key = self.session_key(key);
        let keep_from = -isize::try_from(self.limit).unwrap_or(isize::MAX);
        let mut connection = self.connection.clone();
        let raw: Vec<String> = self
            .bounded(connection.lrange(&redis_key, keep_from, -1))
            .await?;

        let mut turns = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<ConversationTurn>(&entry) {
                Ok(turn) => turns.push(turn),
                Err(err) => warn!(
                    session_hash = %key.hashed(),
                    "skipping unreadable conversation turn: {err}"
                ),
            }
        }
        Ok(turns)
    }
}

impl ConversationStore for RedisConversationStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn append_turn<'a>(
        &'a self,
        key: &'a SessionKey,
        turn: ConversationTurn,
    ) -> ConversationFuture<'a, ()> {
        Box::pin(self.push(key, turn))
    }

    fn history<'a>(&'a self, key: &'a SessionKey) -> ConversationFuture<'a, Vec<ConversationTurn>> {
        Box::pin(self.load(key))
    }
}
