//! Name-resolution cache.
//!
//! Two indexes over a periodically refreshed patient snapshot: normalized
//! full name → records with that name (kept distinct, never silently
//! disambiguated), and patient id → record. Reads past the TTL trigger a
//! refresh under a single-flight guard; writes mark the cache stale after
//! backend success.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::types::{normalize_full_name, Patient, ToolResult};

use crate::client::PatientBackend;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of resolving a full name against the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum NameResolution {
    Unique(Patient),
    Ambiguous(Vec<Patient>),
    None,
}

/// Snapshot health for the operator stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct NameCacheStats {
    pub entries: usize,
    pub age_seconds: Option<u64>,
    pub stale: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Snapshot {
    by_name: HashMap<String, Vec<Patient>>,
    by_id: HashMap<i64, Patient>,
    fetched_at: Option<Instant>,
}

pub struct NameCache {
    backend: Arc<dyn PatientBackend>,
    ttl: Duration,
    snapshot: RwLock<Snapshot>,
    /// Set by `invalidate`; cleared by a successful refresh.
    stale: AtomicBool,
    /// Single-flight gate: at most one refresh runs at a time; other
    /// readers wait on it rather than stampeding the backend.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl NameCache {
    pub fn new(backend: Arc<dyn PatientBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            snapshot: RwLock::new(Snapshot::default()),
            stale: AtomicBool::new(true),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn resolve(&self, full_name: &str) -> NameResolution {
        self.ensure_fresh().await;
        let key = normalize_full_name(full_name);
        let snapshot = self.snapshot.read();
        match snapshot.by_name.get(&key) {
            Some(matches) if matches.len() == 1 => {
                NameResolution::Unique(matches[0].clone())
            }
            Some(matches) if !matches.is_empty() => {
                NameResolution::Ambiguous(matches.clone())
            }
            _ => NameResolution::None,
        }
    }

    pub async fn lookup(&self, id: i64) -> Option<Patient> {
        self.ensure_fresh().await;
        self.snapshot.read().by_id.get(&id).cloned()
    }

    /// Full snapshot ordered by id, for listing.
    pub async fn all_patients(&self) -> Vec<Patient> {
        self.ensure_fresh().await;
        let snapshot = self.snapshot.read();
        let mut all: Vec<Patient> = snapshot.by_id.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        all
    }

    /// A few known names, used to make a failed resolution actionable.
    pub async fn sample_names(&self, n: usize) -> Vec<String> {
        self.all_patients()
            .await
            .into_iter()
            .take(n)
            .map(|p| p.full_name())
            .collect()
    }

    pub fn stats(&self) -> NameCacheStats {
        let snapshot = self.snapshot.read();
        NameCacheStats {
            entries: snapshot.by_id.len(),
            age_seconds: snapshot.fetched_at.map(|at| at.elapsed().as_secs()),
            stale: self.stale.load(Ordering::Acquire),
        }
    }

    // ── Freshness ────────────────────────────────────────────────────

    /// Mark the snapshot stale; the next read refreshes. Called after
    /// every successful create/update/delete.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    fn is_fresh(&self) -> bool {
        if self.stale.load(Ordering::Acquire) {
            return false;
        }
        let snapshot = self.snapshot.read();
        match snapshot.fetched_at {
            Some(at) => !self.ttl.is_zero() && at.elapsed() < self.ttl,
            None => false,
        }
    }

    async fn ensure_fresh(&self) {
        if self.is_fresh() {
            return;
        }
        let _flight = self.refresh_gate.lock().await;
        // Re-check: a concurrent reader may have refreshed while we
        // waited on the gate.
        if self.is_fresh() {
            return;
        }
        self.refresh().await;
    }

    /// Replace both indexes atomically from a full backend listing. On
    /// failure the previous snapshot continues to be served.
    pub async fn refresh(&self) {
        match self.backend.list_patients().await {
            ToolResult::Ok(patients) => {
                let mut by_name: HashMap<String, Vec<Patient>> = HashMap::new();
                let mut by_id = HashMap::with_capacity(patients.len());
                for p in patients {
                    by_name
                        .entry(normalize_full_name(&p.full_name()))
                        .or_default()
                        .push(p.clone());
                    by_id.insert(p.id, p);
                }
                *self.snapshot.write() = Snapshot {
                    by_name,
                    by_id,
                    fetched_at: Some(Instant::now()),
                };
                self.stale.store(false, Ordering::Release);
            }
            failure => {
                LogRecord::new(
                    LogCategory::Error,
                    "name cache refresh failed, serving previous snapshot",
                )
                .extra(serde_json::json!({ "outcome": format!("{failure:?}") }))
                .emit();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hc_domain::types::{ScanRecord, SlotMap};
    use std::sync::atomic::AtomicU64;

    use crate::types::NewPatient;

    fn patient(id: i64, first: &str, last: &str, nid: &str) -> Patient {
        Patient {
            id,
            first_name: first.into(),
            last_name: last.into(),
            national_id: nid.into(),
            contact: None,
            date_of_birth: None,
            details: None,
        }
    }

    /// Stub backend: serves a fixed listing, counts calls, optionally
    /// fails, optionally delays to widen race windows.
    struct StubBackend {
        patients: RwLock<Vec<Patient>>,
        list_calls: AtomicU64,
        fail_listing: AtomicBool,
        delay: Option<Duration>,
    }

    impl StubBackend {
        fn with(patients: Vec<Patient>) -> Self {
            Self {
                patients: RwLock::new(patients),
                list_calls: AtomicU64::new(0),
                fail_listing: AtomicBool::new(false),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl PatientBackend for StubBackend {
        async fn create_patient(&self, _new: &NewPatient) -> ToolResult<Patient> {
            unimplemented!("not exercised")
        }

        async fn list_patients(&self) -> ToolResult<Vec<Patient>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail_listing.load(Ordering::SeqCst) {
                return ToolResult::TransportError { retryable: true };
            }
            ToolResult::Ok(self.patients.read().clone())
        }

        async fn get_patient(&self, _id: i64) -> ToolResult<Patient> {
            unimplemented!("not exercised")
        }

        async fn update_patient(&self, _id: i64, _f: &SlotMap) -> ToolResult<Patient> {
            unimplemented!("not exercised")
        }

        async fn delete_patient(&self, _id: i64) -> ToolResult<()> {
            unimplemented!("not exercised")
        }

        async fn list_scans(
            &self,
            _patient_id: Option<i64>,
            _limit: Option<usize>,
        ) -> ToolResult<Vec<ScanRecord>> {
            unimplemented!("not exercised")
        }
    }

    fn roster() -> Vec<Patient> {
        vec![
            patient(1, "Jane", "Tan", "S1234567A"),
            patient(2, "John", "Tan", "T0000001B"),
            patient(3, "John", "Tan", "T0000002C"),
        ]
    }

    #[tokio::test]
    async fn resolves_unique_ambiguous_and_none() {
        let backend = Arc::new(StubBackend::with(roster()));
        let cache = NameCache::new(backend, Duration::from_secs(300));

        match cache.resolve("jane tan").await {
            NameResolution::Unique(p) => assert_eq!(p.id, 1),
            other => panic!("expected unique, got {other:?}"),
        }

        match cache.resolve("John  TAN").await {
            NameResolution::Ambiguous(ps) => {
                assert_eq!(ps.len(), 2);
                assert!(ps.iter().all(|p| p.full_name() == "John Tan"));
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }

        assert_eq!(cache.resolve("Nobody Here").await, NameResolution::None);
    }

    #[tokio::test]
    async fn lookup_by_id_and_listing_order() {
        let backend = Arc::new(StubBackend::with(roster()));
        let cache = NameCache::new(backend, Duration::from_secs(300));

        assert_eq!(cache.lookup(2).await.unwrap().national_id, "T0000001B");
        assert!(cache.lookup(99).await.is_none());

        let all = cache.all_patients().await;
        assert_eq!(all.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn fresh_reads_do_not_refetch() {
        let backend = Arc::new(StubBackend::with(roster()));
        let cache = NameCache::new(backend.clone(), Duration::from_secs(300));

        cache.resolve("jane tan").await;
        cache.resolve("john tan").await;
        cache.lookup(1).await;
        assert_eq!(backend.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_next_read_to_refresh() {
        let backend = Arc::new(StubBackend::with(roster()));
        let cache = NameCache::new(backend.clone(), Duration::from_secs(300));

        cache.resolve("jane tan").await;
        cache.invalidate();
        assert!(cache.stats().stale);

        cache.resolve("jane tan").await;
        assert_eq!(backend.list_calls.load(Ordering::SeqCst), 2);
        assert!(!cache.stats().stale);
    }

    #[tokio::test]
    async fn refresh_failure_serves_previous_snapshot() {
        let backend = Arc::new(StubBackend::with(roster()));
        let cache = NameCache::new(backend.clone(), Duration::from_secs(300));

        cache.resolve("jane tan").await;
        backend.fail_listing.store(true, Ordering::SeqCst);
        cache.invalidate();

        // Refresh fails, but the old snapshot still answers.
        match cache.resolve("jane tan").await {
            NameResolution::Unique(p) => assert_eq!(p.id, 1),
            other => panic!("expected stale-served unique, got {other:?}"),
        }
        // Still stale: the failed refresh did not clear the flag.
        assert!(cache.stats().stale);
    }

    #[tokio::test]
    async fn concurrent_reads_share_a_single_refresh() {
        let backend = Arc::new(StubBackend {
            patients: RwLock::new(roster()),
            list_calls: AtomicU64::new(0),
            fail_listing: AtomicBool::new(false),
            delay: Some(Duration::from_millis(50)),
        });
        let cache = Arc::new(NameCache::new(backend.clone(), Duration::from_secs(300)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.resolve("jane tan").await
            }));
        }
        for h in handles {
            assert!(matches!(
                h.await.unwrap(),
                NameResolution::Unique(_)
            ));
        }
        assert_eq!(backend.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_refreshes_every_read() {
        let backend = Arc::new(StubBackend::with(roster()));
        let cache = NameCache::new(backend.clone(), Duration::ZERO);

        cache.resolve("jane tan").await;
        cache.resolve("jane tan").await;
        assert_eq!(backend.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sample_names_for_suggestions() {
        let backend = Arc::new(StubBackend::with(roster()));
        let cache = NameCache::new(backend, Duration::from_secs(300));
        let names = cache.sample_names(2).await;
        assert_eq!(names, vec!["Jane Tan".to_string(), "John Tan".to_string()]);
    }
}
