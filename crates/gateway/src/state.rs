use std::sync::Arc;
use std::time::Instant;

use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::ConversationLockMap;
use crate::runtime::TurnDeps;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    /// Everything a turn needs (config, store, backend, cache,
    /// classifier, LLM adapter, metrics).
    pub deps: Arc<TurnDeps>,
    /// Per-conversation turn locks.
    pub locks: Arc<ConversationLockMap>,
    /// Active cancellation tokens for in-flight turns.
    pub cancel_map: Arc<CancelMap>,
    /// SHA-256 hash of the inbound API bearer token (read once at
    /// startup). `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
    pub started_at: Instant,
}
