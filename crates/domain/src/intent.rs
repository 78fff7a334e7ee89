//! Closed enumerations driving the conversation state machine: intents,
//! pending actions, confirmation kinds, download stages, and the agent
//! operation reported in the response envelope.
//!
//! Persisted forms are uppercase identifier strings so pluggable session
//! stores stay readable and forward-compatible.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classified intent of the current user message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    CreatePatient,
    UpdatePatient,
    DeletePatient,
    ListPatients,
    GetPatientDetails,
    GetScanResults,
    ShowMoreScans,
    ProvideDepthMaps,
    ProvideAgentStats,
    Cancel,
    #[default]
    Unknown,
}

impl Intent {
    /// The envelope name for this intent (`agent_state.intent`).
    pub fn name(&self) -> &'static str {
        match self {
            Intent::CreatePatient => "CreatePatient",
            Intent::UpdatePatient => "UpdatePatient",
            Intent::DeletePatient => "DeletePatient",
            Intent::ListPatients => "ListPatients",
            Intent::GetPatientDetails => "GetPatientDetails",
            Intent::GetScanResults => "GetScanResults",
            Intent::ShowMoreScans => "ShowMoreScans",
            Intent::ProvideDepthMaps => "ProvideDepthMaps",
            Intent::ProvideAgentStats => "ProvideAgentStats",
            Intent::Cancel => "Cancel",
            Intent::Unknown => "Unknown",
        }
    }

    /// Parse an envelope name back into an intent. Used to validate LLM
    /// fallback classifications against the closed set.
    pub fn from_name(name: &str) -> Option<Intent> {
        match name {
            "CreatePatient" => Some(Intent::CreatePatient),
            "UpdatePatient" => Some(Intent::UpdatePatient),
            "DeletePatient" => Some(Intent::DeletePatient),
            "ListPatients" => Some(Intent::ListPatients),
            "GetPatientDetails" => Some(Intent::GetPatientDetails),
            "GetScanResults" => Some(Intent::GetScanResults),
            "ShowMoreScans" => Some(Intent::ShowMoreScans),
            "ProvideDepthMaps" => Some(Intent::ProvideDepthMaps),
            "ProvideAgentStats" => Some(Intent::ProvideAgentStats),
            "Cancel" => Some(Intent::Cancel),
            "Unknown" => Some(Intent::Unknown),
            _ => None,
        }
    }

    /// All envelope names, in declaration order. Fed verbatim into the
    /// LLM fallback prompt so the model answers from the closed set.
    pub const NAMES: [&'static str; 11] = [
        "CreatePatient",
        "UpdatePatient",
        "DeletePatient",
        "ListPatients",
        "GetPatientDetails",
        "GetScanResults",
        "ShowMoreScans",
        "ProvideDepthMaps",
        "ProvideAgentStats",
        "Cancel",
        "Unknown",
    ];
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending action / confirmation / download stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A slot-filling or confirmation obligation that must resolve before the
/// next tool call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingAction {
    #[default]
    None,
    AwaitingSlotsForCreate,
    AwaitingSlotsForUpdate,
    AwaitingDeleteConfirmation,
    AwaitingStlConfirmation,
}

/// What an armed confirmation gate is protecting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationKind {
    #[default]
    None,
    Delete,
    StlDownload,
}

/// Progress through the two-stage STL download flow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStage {
    #[default]
    None,
    PreviewShown,
    AwaitingStlConfirm,
    StlLinksSent,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent op
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The write operation this turn completed, reported in the envelope.
/// `None` for every non-success outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentOp {
    Create,
    Update,
    Delete,
    #[default]
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_names_round_trip() {
        for name in Intent::NAMES {
            let intent = Intent::from_name(name).expect("known name");
            assert_eq!(intent.name(), name);
        }
        assert_eq!(Intent::from_name("MakeCoffee"), None);
    }

    #[test]
    fn persisted_enums_are_uppercase_identifiers() {
        assert_eq!(
            serde_json::to_string(&Intent::CreatePatient).unwrap(),
            "\"CREATE_PATIENT\""
        );
        assert_eq!(
            serde_json::to_string(&PendingAction::AwaitingDeleteConfirmation).unwrap(),
            "\"AWAITING_DELETE_CONFIRMATION\""
        );
        assert_eq!(
            serde_json::to_string(&DownloadStage::StlLinksSent).unwrap(),
            "\"STL_LINKS_SENT\""
        );
    }

    #[test]
    fn agent_op_envelope_form() {
        assert_eq!(serde_json::to_string(&AgentOp::Create).unwrap(), "\"Create\"");
        assert_eq!(serde_json::to_string(&AgentOp::None).unwrap(), "\"None\"");
    }

    #[test]
    fn defaults_match_initial_session_values() {
        assert_eq!(Intent::default(), Intent::Unknown);
        assert_eq!(PendingAction::default(), PendingAction::None);
        assert_eq!(ConfirmationKind::default(), ConfirmationKind::None);
        assert_eq!(DownloadStage::default(), DownloadStage::None);
    }
}
