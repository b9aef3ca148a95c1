use std::future::Future;
use std::pin::Pin;

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ConversationTurn;

mod memory;
mod redis_store;

pub use memory::InMemoryConversationStore;
pub use redis_store::RedisConversationStore;

/// Turns retained per session and replayed to the remote model as context.
pub const DEFAULT_HISTORY_LIMIT: usize = 6;

const SESSION_HASH_HEX_LEN: usize = 16;

pub type ConversationFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ConversationStoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ConversationStoreError {
    #[error("conversation backend unavailable: {0}")]
    Unavailable(String),
    #[error("conversation backend timed out")]
    Timeout,
    #[error("conversation history is corrupt: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for ConversationStoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Label recorded for chats that arrive without a session id.
pub const ANONYMOUS_SESSION_ID: &str = "anonymous";

/// Identifies one chat session inside one tenant. Sessions with the same
/// client-provided id at different restaurants never share history.
/// Anonymous keys keep no history at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    restaurant_id: Uuid,
    session_id: String,
    keeps_history: bool,
}

impl SessionKey {
    pub fn new(restaurant_id: Uuid, session_id: impl Into<String>) -> Self {
        Self {
            restaurant_id,
            session_id: session_id.into(),
            keeps_history: true,
        }
    }

    pub fn anonymous(restaurant_id: Uuid) -> Self {
        Self {
            restaurant_id,
            session_id: ANONYMOUS_SESSION_ID.to_string(),
            keeps_history: false,
        }
    }

    pub fn keeps_history(&self) -> bool {
        self.keeps_history
    }

    pub fn restaurant_id(&self) -> Uuid {
        self.restaurant_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn hashed(&self) -> String {
        session_hash(&self.session_id)
    }
}

/// Short SHA-256 digest used wherever a session id would otherwise be logged
/// or stored verbatim.
pub fn session_hash(session_id: &str) -> String {
    let digest = Sha256::digest(session_id.as_bytes());
    let mut hex = String::with_capacity(SESSION_HASH_HEX_LEN);
    for byte in digest.iter().take(SESSION_HASH_HEX_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Bounded per-session history. `append_turn` evicts the oldest turns once
/// more than `limit()` are held; `history` returns oldest first.
pub trait ConversationStore: Send + Sync {
    fn name(&self) -> &'static str;
    fn limit(&self) -> usize;
    fn append_turn<'a>(
        &'a self,
        key: &'a SessionKey,
        turn: ConversationTurn,
    ) -> ConversationFuture<'a, ()>;
    fn history<'a>(&'a self, key: &'a SessionKey) -> ConversationFuture<'a, Vec<ConversationTurn>>;
}
