//! Structured log taxonomy.
//!
//! Every log line HydroChat emits starts with one of six categories:
//! `intent`, `missing`, `tool`, `success`, `error`, `flow`. Records are
//! built as [`LogRecord`] values and emitted through the PII masker; a
//! record that cannot be rendered masked is dropped and counted, never
//! printed raw.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::mask;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Categories
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// First token of every structured log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Intent,
    Missing,
    Tool,
    Success,
    Error,
    Flow,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Intent => "intent",
            LogCategory::Missing => "missing",
            LogCategory::Tool => "tool",
            LogCategory::Success => "success",
            LogCategory::Error => "error",
            LogCategory::Flow => "flow",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One structured log record. Timestamp is added by the subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub category: LogCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl LogRecord {
    pub fn new(category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            session_id: None,
            node: None,
            message: message.into(),
            extra: serde_json::Value::Null,
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn node(mut self, node: &'static str) -> Self {
        self.node = Some(node);
        self
    }

    pub fn extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }

    /// Mask and emit this record.
    ///
    /// The message and every string inside `extra` are passed through the
    /// PII masker. If an unmasked identifier survives (or the record does
    /// not serialize), the record is dropped and [`dropped_records`] is
    /// incremented; an unmasked line is never written.
    pub fn emit(mut self) {
        self.message = mask::mask(&self.message);
        mask_value(&mut self.extra);

        let payload = match serde_json::to_string(&self) {
            Ok(p) => p,
            Err(_) => {
                DROPPED_RECORDS.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if mask::contains_unmasked_id(&payload) {
            DROPPED_RECORDS.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let category = self.category.as_str();
        match self.category {
            LogCategory::Error => {
                tracing::error!(category, record = %payload, "hc_event")
            }
            LogCategory::Missing => {
                tracing::warn!(category, record = %payload, "hc_event")
            }
            _ => tracing::info!(category, record = %payload, "hc_event"),
        }
    }
}

/// Recursively mask every string in a JSON value.
fn mask_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => *s = mask::mask(s),
        serde_json::Value::Array(items) => {
            for item in items {
                mask_value(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                mask_value(v);
            }
        }
        _ => {}
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Drop accounting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static DROPPED_RECORDS: AtomicU64 = AtomicU64::new(0);

/// Number of records dropped because they could not be rendered masked.
pub fn dropped_records() -> u64 {
    DROPPED_RECORDS.load(Ordering::Relaxed)
}
