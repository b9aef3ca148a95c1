use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::models::ConversationTurn;

use super::{ConversationFuture, ConversationStore, SessionKey};

#[derive(Debug)]
struct SessionEntry {
    turns: VecDeque<ConversationTurn>,
    last_touched: Instant,
}

type Sessions = Arc<Mutex<HashMap<SessionKey, SessionEntry>>>;

/// Process-local history. Sessions idle for longer than `idle_ttl` read as
/// empty and are dropped by the pruner.
#[derive(Clone)]
pub struct InMemoryConversationStore {
    sessions: Sessions,
    limit: usize,
    idle_ttl: Duration,
}

impl InMemoryConversationStore {
    pub fn new(limit: usize, idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            limit: limit.max(1),
            idle_ttl,
        }
    }

    pub fn session_count(&self) -> usize {
        lock_sessions(&self.sessions).len()
    }

    pub fn spawn_pruner(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let idle_ttl = self.idle_ttl;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = prune_sessions(&sessions, idle_ttl, Instant::now());
                if removed > 0 {
                    debug!(removed, "pruned idle conversation sessions");
                }
            }
        })
    }

    fn append_at(&self, key: &SessionKey, turn: ConversationTurn, now: Instant) {
        let mut sessions = lock_sessions(&self.sessions);
        let entry = sessions.entry(key.clone()).or_insert_with(|| SessionEntry {
            turns: VecDeque::with_capacity(self.limit + 1),
            last_touched: now,
        });

        if is_idle(entry, self.idle_ttl, now) {
            entry.turns.clear();
        }

        entry.turns.push_back(turn);
        while entry.turns.len() > self.limit {
            entry.turns.pop_front();
        }
        entry.last_touched = now;
    }

    fn history_at(&self, key: &SessionKey, now: Instant) -> Vec<ConversationTurn> {
        let sessions = lock_sessions(&self.sessions);
        match sessions.get(key) {
            Some(entry) if !is_idle(entry, self.idle_ttl, now) => {
                entry.turns.iter().cloned().collect()
            }
            _ => Vec::new(),
        }
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn append_turn<'a>(
        &'a self,
        key: &'a SessionKey,
        turn: ConversationTurn,
    ) -> ConversationFuture<'a, ()> {
        Box::pin(async move {
            self.append_at(key, turn, Instant::now());
            Ok(())
        })
    }

    fn history<'a>(&'a self, key: &'a SessionKey) -> ConversationFuture<'a, Vec<ConversationTurn>> {
        Box::pin(async move { Ok(self.history_at(key, Instant::now())) })
    }
}

fn is_idle(entry: &SessionEntry, idle_ttl: Duration, now: Instant) -> bool {
    now.saturating_duration_since(entry.last_touched) >= idle_ttl
}

fn prune_sessions(sessions: &Sessions, idle_ttl: Duration, now: Instant) -> usize {
    let mut sessions = lock_sessions(sessions);
    let before = sessions.len();
    sessions.retain(|_, entry| !is_idle(entry, idle_ttl, now));
    before - sessions.len()
}

fn lock_sessions(sessions: &Sessions) -> MutexGuard<'_, HashMap<SessionKey, SessionEntry>> {
    match sessions.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use uuid::Uuid;

    use super::{InMemoryConversationStore, prune_sessions};
    use crate::conversation::SessionKey;
    use crate::models::{ConversationTurn, ResponsePath};

    fn turn(key: &SessionKey, index: usize) -> ConversationTurn {
        ConversationTurn {
            session_id: key.session_id().to_string(),
            restaurant_id: key.restaurant_id(),
            user_message: format!("message {index}"),
            assistant_response: format!("reply {index}"),
            response_path: ResponsePath::Fallback,
            latency_ms: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn keeps_only_most_recent_turns_in_arrival_order() {
        let store = InMemoryConversationStore::new(3, Duration::from_secs(60));
        let key = SessionKey::new(Uuid::new_v4(), "s1");
        let now = Instant::now();
        for index in 0..5 {
            store.append_at(&key, turn(&key, index), now);
        }

        let messages = store
            .history_at(&key, now)
            .into_iter()
            .map(|turn| turn.user_message)
            .collect::<Vec<_>>();
        assert_eq!(messages, vec!["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn idle_sessions_read_empty_and_are_pruned() {
        let store = InMemoryConversationStore::new(6, Duration::from_secs(10));
        let key = SessionKey::new(Uuid::new_v4(), "s1");
        let start = Instant::now();
        store.append_at(&key, turn(&key, 0), start);

        let later = start + Duration::from_secs(11);
        assert!(store.history_at(&key, later).is_empty());
        assert_eq!(prune_sessions(&store.sessions, store.idle_ttl, later), 1);
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn idle_session_restarts_on_next_append() {
        let store = InMemoryConversationStore::new(6, Duration::from_secs(10));
        let key = SessionKey::new(Uuid::new_v4(), "s1");
        let start = Instant::now();
        store.append_at(&key, turn(&key, 0), start);
        let later = start + Duration::from_secs(30);
        store.append_at(&key, turn(&key, 1), later);

        let history = store.history_at(&key, later);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_message, "message 1");
    }
}
