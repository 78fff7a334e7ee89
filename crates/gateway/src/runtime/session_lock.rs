//! Per-conversation concurrency control.
//!
//! One turn runs per conversation at a time. A second request arriving
//! while a turn is in flight waits on the same semaphore and proceeds
//! when the current turn finishes, so turns within a conversation are
//! strictly ordered by lock acquisition.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Manages per-conversation turn locks.
///
/// Each conversation id maps to a `Semaphore(1)`. Holding the permit
/// grants exclusive access for one turn; it auto-releases on drop.
pub struct ConversationLockMap {
    locks: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl Default for ConversationLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the turn lock for a conversation, waiting behind any
    /// in-flight turn for the same id.
    pub async fn acquire(&self, conversation_id: Uuid) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        sem.acquire_owned()
            .await
            .expect("conversation semaphore is never closed")
    }

    /// Number of tracked conversations (for monitoring).
    pub fn conversation_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries for conversations with no turn in flight.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}
