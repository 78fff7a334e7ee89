//! The per-conversation state record.
//!
//! Pure data: every field has a defined initial value, serialization is
//! round-trip exact, and unknown fields are ignored on deserialize so a
//! pluggable store can hold records written by newer builds.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hc_domain::intent::{ConfirmationKind, DownloadStage, Intent, PendingAction};
use hc_domain::types::{ScanRecord, Slot, TurnMessage};

/// Bound on the retained (role, text) window.
pub const RECENT_MESSAGES_MAX: usize = 5;

/// Scan entries shown per page in the two-stage STL flow.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-turn metrics delta
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Counters accumulated during a turn and merged into the global
/// registry at finalize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsDelta {
    #[serde(default)]
    pub successful_ops: u64,
    #[serde(default)]
    pub failed_ops: u64,
    #[serde(default)]
    pub aborted_ops: u64,
}

impl MetricsDelta {
    pub fn is_empty(&self) -> bool {
        *self == MetricsDelta::default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub conversation_id: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_touched_at: DateTime<Utc>,
    #[serde(default)]
    pub recent_messages: Vec<TurnMessage>,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub pending_action: PendingAction,
    #[serde(default)]
    pub slots: BTreeMap<Slot, String>,
    #[serde(default)]
    pub missing_slots: BTreeSet<Slot>,
    #[serde(default)]
    pub selected_patient_id: Option<i64>,
    #[serde(default)]
    pub confirmation_required: bool,
    #[serde(default)]
    pub confirmation_kind: ConfirmationKind,
    #[serde(default)]
    pub scan_buffer: Vec<ScanRecord>,
    #[serde(default)]
    pub scan_offset: usize,
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
    #[serde(default)]
    pub download_stage: DownloadStage,
    #[serde(default)]
    pub clarification_count: u32,
    #[serde(default)]
    pub history_summary: Option<String>,
    #[serde(default)]
    pub metrics_delta: MetricsDelta,
}

fn default_scan_page_size() -> usize {
    DEFAULT_SCAN_PAGE_SIZE
}

impl SessionState {
    /// Fresh state for a conversation, all fields at their initial values.
    pub fn new(conversation_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            created_at: now,
            last_touched_at: now,
            recent_messages: Vec::new(),
            intent: Intent::Unknown,
            pending_action: PendingAction::None,
            slots: BTreeMap::new(),
            missing_slots: BTreeSet::new(),
            selected_patient_id: None,
            confirmation_required: false,
            confirmation_kind: ConfirmationKind::None,
            scan_buffer: Vec::new(),
            scan_offset: 0,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            download_stage: DownloadStage::None,
            clarification_count: 0,
            history_summary: None,
            metrics_delta: MetricsDelta::default(),
        }
    }

    /// Append a turn to the recent-message window, evicting the oldest
    /// entry past [`RECENT_MESSAGES_MAX`].
    pub fn push_message(&mut self, message: TurnMessage) {
        self.recent_messages.push(message);
        if self.recent_messages.len() > RECENT_MESSAGES_MAX {
            let overflow = self.recent_messages.len() - RECENT_MESSAGES_MAX;
            self.recent_messages.drain(..overflow);
        }
    }

    /// Update the recency timestamp.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_touched_at = now;
    }

    /// Cancel semantics: clear everything except the conversation
    /// identity, its creation time, the recent-message window, and the
    /// compressed history summary.
    pub fn reset_on_cancel(&mut self) {
        self.intent = Intent::Unknown;
        self.pending_action = PendingAction::None;
        self.slots.clear();
        self.missing_slots.clear();
        self.selected_patient_id = None;
        self.confirmation_required = false;
        self.confirmation_kind = ConfirmationKind::None;
        self.scan_buffer.clear();
        self.scan_offset = 0;
        self.scan_page_size = DEFAULT_SCAN_PAGE_SIZE;
        self.download_stage = DownloadStage::None;
        self.clarification_count = 0;
    }

    /// True when no slot-filling or confirmation obligation is open.
    pub fn pending_resolved(&self) -> bool {
        self.pending_action == PendingAction::None
            && self.missing_slots.is_empty()
            && !self.confirmation_required
    }

    /// The index range of the currently visible scan page, `[start, end)`.
    /// Pages are aligned to multiples of `scan_page_size`.
    pub fn visible_scan_page(&self) -> (usize, usize) {
        if self.scan_offset == 0 || self.scan_buffer.is_empty() {
            return (0, 0);
        }
        let end = self.scan_offset.min(self.scan_buffer.len());
        let start = ((end - 1) / self.scan_page_size) * self.scan_page_size;
        (start, end)
    }

    // ── Serialization for pluggable stores ───────────────────────────

    pub fn serialize(&self) -> hc_domain::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn deserialize(raw: &str) -> hc_domain::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
