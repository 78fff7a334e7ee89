//! Core data model: patients, scan records, conversation turns, slots,
//! and the result sum returned by every backend tool call.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Patient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cached projection of a patient record held by the backend.
///
/// `national_id` is unique across patients and must never reach a log
/// handler or user channel unmasked (see [`crate::mask`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub details: Option<String>,
}

impl Patient {
    /// Display name, `"First Last"`.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Normalize a full name for cache keying: lowercased, whitespace-collapsed.
pub fn normalize_full_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scan record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single scan held by the backend.
///
/// `stl_file_url` is only ever emitted to a user channel after an
/// affirmative STL-download confirmation for the enclosing scan batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: i64,
    pub patient_id: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub preview_image_url: String,
    #[serde(default)]
    pub volume_estimate: Option<f64>,
    #[serde(default)]
    pub stl_file_url: Option<String>,
    #[serde(default)]
    pub depth_map_8bit_url: Option<String>,
    #[serde(default)]
    pub depth_map_16bit_url: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One (role, text) turn retained in the session's recent-message window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: MessageRole,
    pub text: String,
}

impl TurnMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: MessageRole::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, text: text.into() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named field collected from the user to complete an action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    FirstName,
    LastName,
    NationalId,
    Contact,
    DateOfBirth,
    Details,
    PatientId,
}

impl Slot {
    /// The backend field name for this slot (also the wire name used in
    /// validation-error maps and the response envelope).
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::FirstName => "first_name",
            Slot::LastName => "last_name",
            Slot::NationalId => "national_id",
            Slot::Contact => "contact",
            Slot::DateOfBirth => "date_of_birth",
            Slot::Details => "details",
            Slot::PatientId => "patient_id",
        }
    }

    /// Parse a backend field name back into a slot, if it names one.
    pub fn from_field(field: &str) -> Option<Slot> {
        match field {
            "first_name" => Some(Slot::FirstName),
            "last_name" => Some(Slot::LastName),
            "national_id" => Some(Slot::NationalId),
            "contact" => Some(Slot::Contact),
            "date_of_birth" => Some(Slot::DateOfBirth),
            "details" => Some(Slot::Details),
            "patient_id" => Some(Slot::PatientId),
            _ => None,
        }
    }

    /// Human label used in prompts ("first name", "NRIC", ...).
    pub fn label(&self) -> &'static str {
        match self {
            Slot::FirstName => "first name",
            Slot::LastName => "last name",
            Slot::NationalId => "national ID",
            Slot::Contact => "contact",
            Slot::DateOfBirth => "date of birth",
            Slot::Details => "details",
            Slot::PatientId => "patient ID",
        }
    }
}

/// Accumulated slot values for the current pending action.
pub type SlotMap = BTreeMap<Slot, String>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool call results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Backend field validation errors: field name → messages.
pub type ValidationErrors = BTreeMap<String, Vec<String>>;

/// Outcome of one typed backend tool call.
///
/// Transport retries are already absorbed by the client; a
/// `TransportError` here means the retry budget is exhausted.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult<T> {
    Ok(T),
    ValidationFailed(ValidationErrors),
    NotFound,
    Conflict,
    Unauthorized,
    TransportError { retryable: bool },
    ServerError { status: u16 },
}

impl<T> ToolResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok(_))
    }

    /// Map the success payload, preserving every failure variant.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ToolResult<U> {
        match self {
            ToolResult::Ok(v) => ToolResult::Ok(f(v)),
            ToolResult::ValidationFailed(e) => ToolResult::ValidationFailed(e),
            ToolResult::NotFound => ToolResult::NotFound,
            ToolResult::Conflict => ToolResult::Conflict,
            ToolResult::Unauthorized => ToolResult::Unauthorized,
            ToolResult::TransportError { retryable } => {
                ToolResult::TransportError { retryable }
            }
            ToolResult::ServerError { status } => ToolResult::ServerError { status },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_concatenation() {
        let p = Patient {
            id: 1,
            first_name: "Jane".into(),
            last_name: "Tan".into(),
            national_id: "S1234567A".into(),
            contact: None,
            date_of_birth: None,
            details: None,
        };
        assert_eq!(p.full_name(), "Jane Tan");
    }

    #[test]
    fn name_normalization_collapses_whitespace() {
        assert_eq!(normalize_full_name("  Jane   TAN "), "jane tan");
        assert_eq!(normalize_full_name("John\tTan"), "john tan");
    }

    #[test]
    fn slot_round_trip_through_field_names() {
        for slot in [
            Slot::FirstName,
            Slot::LastName,
            Slot::NationalId,
            Slot::Contact,
            Slot::DateOfBirth,
            Slot::Details,
            Slot::PatientId,
        ] {
            assert_eq!(Slot::from_field(slot.as_str()), Some(slot));
        }
        assert_eq!(Slot::from_field("unknown_field"), None);
    }

    #[test]
    fn tool_result_map_preserves_failures() {
        let r: ToolResult<i32> = ToolResult::NotFound;
        assert_eq!(r.map(|v| v * 2), ToolResult::NotFound);

        let ok: ToolResult<i32> = ToolResult::Ok(21);
        assert_eq!(ok.map(|v| v * 2), ToolResult::Ok(42));
    }
}
