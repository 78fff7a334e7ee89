//! Whole-turn tests: the graph driven end to end against an in-process
//! backend stub, covering the documented conversation scenarios and the
//! masking/confirmation/pagination invariants.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use hc_backend::{NameCache, NewPatient, PatientBackend};
use hc_domain::config::Config;
use hc_domain::intent::AgentOp;
use hc_domain::mask;
use hc_domain::metrics::Metrics;
use hc_domain::types::{Patient, ScanRecord, Slot, SlotMap, ToolResult};
use hc_llm::IntentClassifier;
use hc_sessions::{InMemorySessionStore, SessionState, SessionStore};

use super::{finalize_deadline_exceeded, run_turn, ConverseReply, TurnDeps};
use crate::runtime::cancel::CancelToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend stub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Counters {
    list_patients: AtomicU64,
    create: AtomicU64,
    update: AtomicU64,
    delete: AtomicU64,
    list_scans: AtomicU64,
}

struct FakeBackend {
    patients: RwLock<Vec<Patient>>,
    scans: RwLock<Vec<ScanRecord>>,
    next_id: AtomicI64,
    calls: Counters,
    reject_create_with: RwLock<Option<BTreeMap<String, Vec<String>>>>,
}

impl FakeBackend {
    fn new(patients: Vec<Patient>, scans: Vec<ScanRecord>) -> Self {
        let next = patients.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        Self {
            patients: RwLock::new(patients),
            scans: RwLock::new(scans),
            next_id: AtomicI64::new(next),
            calls: Counters::default(),
            reject_create_with: RwLock::new(None),
        }
    }
}

#[async_trait]
impl PatientBackend for FakeBackend {
    async fn create_patient(&self, new: &NewPatient) -> ToolResult<Patient> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        if let Some(errors) = self.reject_create_with.read().clone() {
            return ToolResult::ValidationFailed(errors);
        }
        let patient = Patient {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            first_name: new.first_name.clone(),
            last_name: new.last_name.clone(),
            national_id: new.national_id.clone(),
            contact: new.contact.clone(),
            date_of_birth: new.date_of_birth,
            details: new.details.clone(),
        };
        self.patients.write().push(patient.clone());
        ToolResult::Ok(patient)
    }

    async fn list_patients(&self) -> ToolResult<Vec<Patient>> {
        self.calls.list_patients.fetch_add(1, Ordering::SeqCst);
        ToolResult::Ok(self.patients.read().clone())
    }

    async fn get_patient(&self, id: i64) -> ToolResult<Patient> {
        match self.patients.read().iter().find(|p| p.id == id) {
            Some(p) => ToolResult::Ok(p.clone()),
            None => ToolResult::NotFound,
        }
    }

    async fn update_patient(&self, id: i64, fields: &SlotMap) -> ToolResult<Patient> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        let mut patients = self.patients.write();
        let Some(p) = patients.iter_mut().find(|p| p.id == id) else {
            return ToolResult::NotFound;
        };
        for (slot, value) in fields {
            match slot {
                Slot::Contact => p.contact = Some(value.clone()),
                Slot::Details => p.details = Some(value.clone()),
                Slot::FirstName => p.first_name = value.clone(),
                Slot::LastName => p.last_name = value.clone(),
                Slot::NationalId => p.national_id = value.clone(),
                _ => {}
            }
        }
        ToolResult::Ok(p.clone())
    }

    async fn delete_patient(&self, id: i64) -> ToolResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        let mut patients = self.patients.write();
        let before = patients.len();
        patients.retain(|p| p.id != id);
        if patients.len() == before {
            ToolResult::NotFound
        } else {
            ToolResult::Ok(())
        }
    }

    async fn list_scans(
        &self,
        patient_id: Option<i64>,
        limit: Option<usize>,
    ) -> ToolResult<Vec<ScanRecord>> {
        self.calls.list_scans.fetch_add(1, Ordering::SeqCst);
        let mut scans: Vec<ScanRecord> = self
            .scans
            .read()
            .iter()
            .filter(|s| patient_id.map_or(true, |id| s.patient_id == id))
            .cloned()
            .collect();
        if let Some(n) = limit {
            scans.truncate(n);
        }
        ToolResult::Ok(scans)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

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

fn scan(id: i64, patient_id: i64) -> ScanRecord {
    ScanRecord {
        id,
        patient_id,
        created_at: Utc::now(),
        preview_image_url: format!("https://cdn.example/scans/{id}/preview.png"),
        volume_estimate: Some(10.0 + id as f64),
        stl_file_url: Some(format!("https://cdn.example/scans/{id}/model.stl")),
        depth_map_8bit_url: Some(format!("https://cdn.example/scans/{id}/depth8.png")),
        depth_map_16bit_url: Some(format!("https://cdn.example/scans/{id}/depth16.png")),
    }
}

struct Harness {
    deps: TurnDeps,
    backend: Arc<FakeBackend>,
    store: Arc<InMemorySessionStore>,
}

fn harness(patients: Vec<Patient>, scans: Vec<ScanRecord>) -> Harness {
    let backend = Arc::new(FakeBackend::new(patients, scans));
    let metrics = Arc::new(Metrics::new(100, Duration::from_secs(3600)));
    let cache = Arc::new(NameCache::new(backend.clone(), Duration::from_secs(300)));
    let store = Arc::new(InMemorySessionStore::new(Duration::from_secs(1800), 100));
    let deps = TurnDeps {
        config: Arc::new(Config::default()),
        store: store.clone(),
        backend: backend.clone(),
        cache,
        classifier: Arc::new(IntentClassifier::new(None)),
        llm: None,
        metrics,
    };
    Harness {
        deps,
        backend,
        store,
    }
}

impl Harness {
    /// One full turn the way the converse handler drives it: load or
    /// create state, run the graph, return the envelope.
    async fn turn(&self, conversation_id: Uuid, message: &str) -> ConverseReply {
        let now = Utc::now();
        let mut state = match self.deps.store.get(conversation_id, now).await {
            Some(s) => s,
            None => SessionState::new(conversation_id, now),
        };
        run_turn(
            &self.deps,
            &mut state,
            message.to_owned(),
            CancelToken::new(),
            now,
        )
        .await
    }
}

fn text_of(reply: &ConverseReply) -> String {
    reply
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1: one-shot create with masking and cache reuse
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn one_shot_create_masks_id_and_fires_backend_once() {
    let h = harness(vec![], vec![]);
    let id = Uuid::new_v4();

    let reply = h.turn(id, "create patient Jane Tan NRIC S1234567A").await;

    assert_eq!(reply.agent_op, AgentOp::Create);
    let text = text_of(&reply);
    assert!(text.contains("Jane Tan"), "{text}");
    assert!(text.contains("S*******A"), "{text}");
    assert!(!mask::contains_unmasked_id(&text), "{text}");
    assert_eq!(h.backend.calls.create.load(Ordering::SeqCst), 1);

    // Fresh cache snapshot after the write: one refresh serves repeated
    // reads within the TTL.
    h.turn(id, "list patients").await;
    let after_first_list = h.backend.calls.list_patients.load(Ordering::SeqCst);
    h.turn(id, "list patients").await;
    assert_eq!(
        h.backend.calls.list_patients.load(Ordering::SeqCst),
        after_first_list
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2: delete requires explicit confirmation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn delete_gated_behind_affirmative_confirmation() {
    let h = harness(vec![patient(42, "Mary", "Lim", "T7654321Z")], vec![]);
    let id = Uuid::new_v4();

    // Seed a session that already selected patient 42.
    let now = Utc::now();
    let mut seeded = SessionState::new(id, now);
    seeded.selected_patient_id = Some(42);
    h.store.put(seeded, now).await;

    let reply = h.turn(id, "delete").await;
    assert_eq!(reply.agent_op, AgentOp::None);
    assert!(reply.agent_state.awaiting_confirmation);
    assert_eq!(h.backend.calls.delete.load(Ordering::SeqCst), 0);
    let text = text_of(&reply);
    assert!(text.contains("yes"), "{text}");
    assert!(text.contains("no"), "{text}");

    let reply = h.turn(id, "yes").await;
    assert_eq!(reply.agent_op, AgentOp::Delete);
    assert!(!reply.agent_state.awaiting_confirmation);
    assert_eq!(h.backend.calls.delete.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delete_declined_leaves_record_alone() {
    let h = harness(vec![patient(42, "Mary", "Lim", "T7654321Z")], vec![]);
    let id = Uuid::new_v4();

    h.turn(id, "delete patient 42").await;
    let reply = h.turn(id, "no").await;

    assert_eq!(reply.agent_op, AgentOp::None);
    assert!(!reply.agent_state.awaiting_confirmation);
    assert_eq!(h.backend.calls.delete.load(Ordering::SeqCst), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3: two-stage STL flow with pagination
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn stl_urls_held_back_until_affirmed_and_scoped_to_visible_page() {
    let scans: Vec<ScanRecord> = (1..=15).map(|i| scan(i, 7)).collect();
    let h = harness(vec![patient(7, "Jane", "Tan", "S1234567A")], scans);
    let id = Uuid::new_v4();

    // Stage one: previews only, ten entries, confirmation armed.
    let reply = h.turn(id, "scan results for patient 7").await;
    let text = text_of(&reply);
    assert!(reply.agent_state.awaiting_confirmation);
    assert!(!text.contains(".stl"), "STL leaked in stage one: {text}");
    assert!(text.contains("preview.png"), "{text}");
    assert_eq!(text.matches("- scan ").count(), 10, "{text}");

    // Page two: entries 11-15, confirmation re-armed for the new batch.
    let reply = h.turn(id, "show more").await;
    let text = text_of(&reply);
    assert!(reply.agent_state.awaiting_confirmation);
    assert!(!text.contains(".stl"), "STL leaked in pagination: {text}");
    assert_eq!(text.matches("- scan ").count(), 5, "{text}");
    assert!(text.contains("11-15"), "{text}");

    // Affirmation: STL links only for the visible page (11..=15).
    let reply = h.turn(id, "yes").await;
    let text = text_of(&reply);
    assert!(text.contains("scans/11/model.stl"), "{text}");
    assert!(text.contains("scans/15/model.stl"), "{text}");
    assert!(!text.contains("scans/1/model.stl"), "{text}");
    assert!(!text.contains("scans/10/model.stl"), "{text}");
}

#[tokio::test]
async fn short_scan_list_is_a_single_page_and_show_more_reports_end() {
    let scans: Vec<ScanRecord> = (1..=4).map(|i| scan(i, 7)).collect();
    let h = harness(vec![patient(7, "Jane", "Tan", "S1234567A")], scans);
    let id = Uuid::new_v4();

    let reply = h.turn(id, "scan results for patient 7").await;
    assert_eq!(text_of(&reply).matches("- scan ").count(), 4);

    let reply = h.turn(id, "show more").await;
    let text = text_of(&reply);
    assert!(text.contains("end of the list"), "{text}");
}

#[tokio::test]
async fn depth_maps_only_with_an_open_scan_list() {
    let scans: Vec<ScanRecord> = (1..=3).map(|i| scan(i, 7)).collect();
    let h = harness(vec![patient(7, "Jane", "Tan", "S1234567A")], scans);
    let id = Uuid::new_v4();

    // Without context the request falls through to the capability guide.
    let reply = h.turn(id, "depth maps").await;
    assert!(!text_of(&reply).contains("depth8.png"));

    h.turn(id, "scan results for patient 7").await;
    let reply = h.turn(id, "depth maps").await;
    let text = text_of(&reply);
    assert!(text.contains("depth8.png"), "{text}");
    assert!(text.contains("depth16.png"), "{text}");
    assert!(!text.contains(".stl"), "{text}");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4: clarification bound on the create flow
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn create_prompts_then_offers_cancellation() {
    let h = harness(vec![], vec![]);
    let id = Uuid::new_v4();

    // No slots at all: first prompt lists everything needed.
    let reply = h.turn(id, "create patient").await;
    let text = text_of(&reply);
    assert!(text.contains("first name"), "{text}");
    assert!(text.contains("last name"), "{text}");
    assert!(text.contains("national ID"), "{text}");
    assert_eq!(
        reply.agent_state.missing_fields,
        vec!["first_name", "last_name", "national_id"]
    );

    // One slot arrives: progress resets the bound, so prompt again.
    let reply = h.turn(id, "John").await;
    let text = text_of(&reply);
    assert!(!text.to_lowercase().contains("cancel"), "{text}");
    assert_eq!(
        reply.agent_state.missing_fields,
        vec!["last_name", "national_id"]
    );

    // Still incomplete with no progress: offer cancellation, not another
    // bare prompt.
    let reply = h.turn(id, "hmm let me think").await;
    let text = text_of(&reply);
    assert!(text.contains("cancel"), "{text}");
    assert_eq!(h.backend.calls.create.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn backend_validation_reopens_collection() {
    let h = harness(vec![], vec![]);
    *h.backend.reject_create_with.write() = Some(BTreeMap::from([(
        "national_id".to_owned(),
        vec!["already registered".to_owned()],
    )]));
    let id = Uuid::new_v4();

    let reply = h.turn(id, "create patient Jane Tan NRIC S1234567A").await;
    assert_eq!(reply.agent_op, AgentOp::None);
    let text = text_of(&reply);
    assert!(text.contains("already registered"), "{text}");
    assert_eq!(reply.agent_state.missing_fields, vec!["national_id"]);

    // The reflected field can be re-supplied and the create retried.
    *h.backend.reject_create_with.write() = None;
    let reply = h.turn(id, "T0000001B").await;
    assert_eq!(reply.agent_op, AgentOp::Create);
    assert_eq!(h.backend.calls.create.load(Ordering::SeqCst), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5: ambiguous names stay ambiguous
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn ambiguous_name_lists_masked_candidates() {
    let h = harness(
        vec![
            patient(1, "John", "Tan", "S1111111A"),
            patient(2, "John", "Tan", "S2222222B"),
        ],
        vec![],
    );
    let id = Uuid::new_v4();

    let reply = h.turn(id, "show John Tan").await;
    assert_eq!(reply.agent_op, AgentOp::None);
    let text = text_of(&reply);
    assert!(text.contains("S*******A"), "{text}");
    assert!(text.contains("S*******B"), "{text}");
    assert!(!mask::contains_unmasked_id(&text), "{text}");
    assert!(text.contains("ID"), "{text}");

    // A bare id answer resolves the selection.
    let reply = h.turn(id, "2").await;
    let text = text_of(&reply);
    assert!(text.contains("John Tan"), "{text}");
    assert!(text.contains("id 2"), "{text}");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6: cancel mid-create
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cancel_mid_create_clears_pending_and_counts_abort() {
    let h = harness(vec![], vec![]);
    let id = Uuid::new_v4();

    h.turn(id, "create patient").await;
    let reply = h.turn(id, "cancel").await;

    assert_eq!(reply.agent_op, AgentOp::None);
    assert!(reply.agent_state.missing_fields.is_empty());
    assert!(!reply.agent_state.awaiting_confirmation);
    assert_eq!(h.deps.metrics.snapshot().aborted_ops, 1);
    assert_eq!(h.backend.calls.create.load(Ordering::SeqCst), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cross-cutting invariants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn every_reply_is_masked_even_when_echoing_input() {
    let h = harness(vec![patient(3, "Lee", "Wong", "G7777777H")], vec![]);
    let id = Uuid::new_v4();

    for message in [
        "show Lee Wong",
        "list patients",
        "create patient Lee Wong NRIC G7777777H",
        "tell me about S1234567A",
    ] {
        let reply = h.turn(id, message).await;
        let text = text_of(&reply);
        assert!(
            !mask::contains_unmasked_id(&text),
            "unmasked id in reply to {message:?}: {text}"
        );
    }
}

#[tokio::test]
async fn cancelled_turn_persists_only_the_user_message() {
    let h = harness(vec![], vec![]);
    let id = Uuid::new_v4();
    let now = Utc::now();

    let token = CancelToken::new();
    token.cancel();

    let mut state = SessionState::new(id, now);
    let reply = run_turn(
        &h.deps,
        &mut state,
        "create patient Jane Tan NRIC S1234567A".to_owned(),
        token,
        now,
    )
    .await;

    assert_eq!(reply.agent_op, AgentOp::None);
    assert!(text_of(&reply).contains("cancelled"));
    assert_eq!(h.backend.calls.create.load(Ordering::SeqCst), 0);

    // Only the user turn (and the cancellation notice) survive; no
    // pending action or slots leak into the stored state.
    let stored = h.deps.store.get(id, now).await.unwrap();
    assert!(stored.slots.is_empty());
    assert!(stored.missing_slots.is_empty());
    assert_eq!(
        stored.pending_action,
        hc_domain::intent::PendingAction::None
    );
    assert!(stored
        .recent_messages
        .iter()
        .any(|m| m.text.contains("create patient")));
}

#[tokio::test]
async fn deadline_path_runs_through_finalize() {
    let h = harness(vec![], vec![]);
    let id = Uuid::new_v4();
    let now = Utc::now();

    let mut state = SessionState::new(id, now);
    let reply =
        finalize_deadline_exceeded(&h.deps, &mut state, "look up S1234567A now", now).await;

    // A complete, masked envelope even though no node ran.
    assert_eq!(reply.agent_op, AgentOp::None);
    assert!(!reply.agent_state.awaiting_confirmation);
    let text = text_of(&reply);
    assert!(text.contains("too long"), "{text}");
    assert!(!mask::contains_unmasked_id(&text), "{text}");

    // The user's message and the notice were persisted for context;
    // nothing else changed.
    let stored = h.deps.store.get(id, now).await.unwrap();
    assert!(stored
        .recent_messages
        .iter()
        .any(|m| m.text.contains("look up")));
    assert!(stored.recent_messages.iter().any(|m| m.text.contains("too long")));
    assert!(stored.slots.is_empty());
    assert_eq!(
        stored.pending_action,
        hc_domain::intent::PendingAction::None
    );
}

#[tokio::test]
async fn update_flow_changes_contact() {
    let h = harness(vec![patient(7, "Jane", "Tan", "S1234567A")], vec![]);
    let id = Uuid::new_v4();

    let reply = h.turn(id, "update patient 7 contact 91234567").await;
    assert_eq!(reply.agent_op, AgentOp::Update);
    assert_eq!(h.backend.calls.update.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.backend.patients.read()[0].contact.as_deref(),
        Some("91234567")
    );
}

#[tokio::test]
async fn unknown_messages_get_the_capability_guide() {
    let h = harness(vec![], vec![]);
    let reply = h.turn(Uuid::new_v4(), "what's the weather like").await;
    assert_eq!(reply.agent_op, AgentOp::None);
    let text = text_of(&reply);
    assert!(text.contains("create patient"), "{text}");
    assert!(text.contains("scan results"), "{text}");
}

#[tokio::test]
async fn stats_request_reports_counters() {
    let h = harness(vec![], vec![]);
    let id = Uuid::new_v4();

    h.turn(id, "create patient Jane Tan NRIC S1234567A").await;
    let reply = h.turn(id, "agent stats").await;
    let text = text_of(&reply);
    assert!(text.contains("successful_ops"), "{text}");
    assert!(text.contains("name_cache"), "{text}");
}
