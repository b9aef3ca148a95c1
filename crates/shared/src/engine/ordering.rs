use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

use crate::conversation::SessionKey;

type TurnLock = Arc<tokio::sync::Mutex<()>>;

/// One FIFO lock per live session. A turn holds its session's lock from
/// history read to history append, so turns land in arrival order. Entries
/// are removed once no turn holds or waits on them.
#[derive(Default)]
pub(crate) struct SessionTurnLocks {
    locks: Mutex<HashMap<SessionKey, TurnLock>>,
}

pub(crate) struct SessionTurn<'a> {
    owner: &'a SessionTurnLocks,
    key: SessionKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionTurnLocks {
    pub(crate) async fn begin(&self, key: &SessionKey) -> SessionTurn<'_> {
        let lock = Arc::clone(self.lock_map().entry(key.clone()).or_default());
        let mut turn = SessionTurn {
            owner: self,
            key: key.clone(),
            guard: None,
        };
        turn.guard = Some(lock.lock_owned().await);
        turn
    }

    fn release(&self, key: &SessionKey) {
        let mut locks = self.lock_map();
        if locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.lock_map().len()
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<SessionKey, TurnLock>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for SessionTurn<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.owner.release(&self.key);
    }
}
