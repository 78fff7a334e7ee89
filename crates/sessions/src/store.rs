//! Session store: concurrency-safe map conversation_id → state.
//!
//! Two eviction mechanisms run together, both synchronously on access:
//! TTL (stale entries expire on every get/put) and an LRU cap. The store
//! is defined as a trait so an out-of-process implementation (a
//! distributed KV with TTL) can be substituted; the in-memory one is
//! authoritative for correctness.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::state::SessionState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Occupancy and eviction counters for the operator stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_evictions: u64,
    pub lru_evictions: u64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch live state for a conversation. Expired entries are evicted
    /// and reported as absent.
    async fn get(&self, id: Uuid, now: DateTime<Utc>) -> Option<SessionState>;

    /// Persist state for a conversation, evicting the least-recently
    /// touched entry if the cap is exceeded.
    async fn put(&self, state: SessionState, now: DateTime<Utc>);

    /// Drop a conversation's state. Returns true when something was removed.
    async fn delete(&self, id: Uuid) -> bool;

    async fn stats(&self) -> StoreStats;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct InMemorySessionStore {
    inner: Mutex<LruCache<Uuid, SessionState>>,
    ttl: Duration,
    capacity: usize,
    ttl_evictions: AtomicU64,
    lru_evictions: AtomicU64,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).expect("non-zero");
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            ttl,
            capacity: cap.get(),
            ttl_evictions: AtomicU64::new(0),
            lru_evictions: AtomicU64::new(0),
        }
    }

    /// TTL check. A zero TTL means "expire immediately after the request
    /// completes": every stored entry is already stale on the next access.
    fn is_expired(&self, state: &SessionState, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(state.last_touched_at);
        if elapsed < chrono::Duration::zero() {
            return false;
        }
        elapsed.to_std().map_or(false, |e| e >= self.ttl) || self.ttl.is_zero()
    }

    /// Evict expired entries from the cold end of the LRU order.
    /// Entries are ordered by recency, so the sweep stops at the first
    /// live one.
    fn sweep_tail(&self, cache: &mut LruCache<Uuid, SessionState>, now: DateTime<Utc>) {
        while let Some((_, state)) = cache.peek_lru() {
            if self.is_expired(state, now) {
                cache.pop_lru();
                self.ttl_evictions.fetch_add(1, Ordering::Relaxed);
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: Uuid, now: DateTime<Utc>) -> Option<SessionState> {
        let mut cache = self.inner.lock();
        self.sweep_tail(&mut cache, now);

        let expired = match cache.get(&id) {
            Some(state) if self.is_expired(state, now) => true,
            Some(state) => return Some(state.clone()),
            None => return None,
        };
        if expired {
            cache.pop(&id);
            self.ttl_evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    async fn put(&self, state: SessionState, now: DateTime<Utc>) {
        let mut cache = self.inner.lock();
        self.sweep_tail(&mut cache, now);

        let id = state.conversation_id;
        if let Some((evicted_id, _)) = cache.push(id, state) {
            if evicted_id != id {
                self.lru_evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn delete(&self, id: Uuid) -> bool {
        self.inner.lock().pop(&id).is_some()
    }

    async fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.inner.lock().len(),
            capacity: self.capacity,
            ttl_evictions: self.ttl_evictions.load(Ordering::Relaxed),
            lru_evictions: self.lru_evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn state_at(now: DateTime<Utc>) -> SessionState {
        SessionState::new(Uuid::new_v4(), now)
    }

    #[tokio::test]
    async fn get_returns_what_put_stored() {
        let store = InMemorySessionStore::new(Duration::from_secs(60), 10);
        let s = state_at(t0());
        let id = s.conversation_id;
        store.put(s.clone(), t0()).await;

        let got = store.get(id, t0() + chrono::Duration::seconds(1)).await;
        assert_eq!(got, Some(s));
    }

    #[tokio::test]
    async fn ttl_expiry_on_access() {
        let store = InMemorySessionStore::new(Duration::from_secs(60), 10);
        let s = state_at(t0());
        let id = s.conversation_id;
        store.put(s, t0()).await;

        // Exactly at the TTL boundary the entry is already gone.
        let got = store.get(id, t0() + chrono::Duration::seconds(60)).await;
        assert!(got.is_none());
        assert_eq!(store.stats().await.ttl_evictions, 1);
    }

    #[tokio::test]
    async fn zero_ttl_expires_between_requests() {
        let store = InMemorySessionStore::new(Duration::ZERO, 10);
        let s = state_at(t0());
        let id = s.conversation_id;
        store.put(s, t0()).await;

        // A put followed by a get yields fresh state: nothing leaks to the
        // next request with the same id.
        assert!(store.get(id, t0()).await.is_none());
    }

    #[tokio::test]
    async fn lru_cap_evicts_least_recently_touched() {
        let store = InMemorySessionStore::new(Duration::from_secs(3600), 2);
        let a = state_at(t0());
        let b = state_at(t0());
        let c = state_at(t0());
        let (ida, idb, idc) = (a.conversation_id, b.conversation_id, c.conversation_id);

        store.put(a, t0()).await;
        store.put(b, t0()).await;
        // Touch `a` so `b` becomes the LRU victim.
        store.get(ida, t0()).await.unwrap();
        store.put(c, t0()).await;

        assert!(store.get(idb, t0()).await.is_none());
        assert!(store.get(ida, t0()).await.is_some());
        assert!(store.get(idc, t0()).await.is_some());
        assert_eq!(store.stats().await.lru_evictions, 1);
    }

    #[tokio::test]
    async fn replacing_same_id_is_not_an_lru_eviction() {
        let store = InMemorySessionStore::new(Duration::from_secs(3600), 2);
        let mut s = state_at(t0());
        let id = s.conversation_id;
        store.put(s.clone(), t0()).await;
        s.clarification_count = 1;
        store.put(s, t0()).await;

        let stats = store.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.lru_evictions, 0);
        assert_eq!(
            store.get(id, t0()).await.unwrap().clarification_count,
            1
        );
    }

    #[tokio::test]
    async fn tail_sweep_removes_stale_entries_on_put() {
        let store = InMemorySessionStore::new(Duration::from_secs(30), 10);
        let old = state_at(t0());
        store.put(old, t0()).await;

        let later = t0() + chrono::Duration::seconds(120);
        let mut fresh = state_at(later);
        fresh.touch(later);
        store.put(fresh, later).await;

        let stats = store.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.ttl_evictions, 1);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = InMemorySessionStore::new(Duration::from_secs(60), 10);
        let s = state_at(t0());
        let id = s.conversation_id;
        store.put(s, t0()).await;

        assert!(store.delete(id).await);
        assert!(!store.delete(id).await);
        assert!(store.get(id, t0()).await.is_none());
    }
}
