//! Per-turn cancellation tokens.
//!
//! Each running turn registers a token keyed by conversation id. The
//! graph executor checks the token between nodes; a cancelled turn skips
//! straight to the finalize path without persisting partial slot
//! mutations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// A cancellation token checked cooperatively by the turn loop.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Active cancellation tokens, one per in-flight turn.
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a fresh token for a conversation's turn.
    pub fn register(&self, conversation_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(conversation_id, token.clone());
        token
    }

    /// Signal cancellation of an in-flight turn. Returns true when a
    /// token was found.
    pub fn cancel(&self, conversation_id: Uuid) -> bool {
        match self.tokens.lock().get(&conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when a turn completes.
    pub fn remove(&self, conversation_id: Uuid) {
        self.tokens.lock().remove(&conversation_id);
    }

    pub fn is_running(&self, conversation_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&conversation_id)
    }
}
