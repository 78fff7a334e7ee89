//! Per-conversation state: the typed session model and the pluggable
//! session store with TTL + LRU eviction.

pub mod state;
pub mod store;

pub use state::{MetricsDelta, SessionState, DEFAULT_SCAN_PAGE_SIZE, RECENT_MESSAGES_MAX};
pub use store::{InMemorySessionStore, SessionStore, StoreStats};
