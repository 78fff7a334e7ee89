//! Patient creation: slot collection with the clarification bound, and
//! the backend call with validation reflection.

use std::collections::BTreeSet;

use hc_backend::NewPatient;
use hc_domain::intent::{AgentOp, Intent, PendingAction};
use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::mask;
use hc_domain::types::{Slot, ToolResult};

use super::super::graph::RouteToken;
use super::super::TurnCtx;
use super::{patient_line, tool_failure_reply};

/// Slots that must be present before a create is attempted.
const REQUIRED: [Slot; 3] = [Slot::FirstName, Slot::LastName, Slot::NationalId];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// collect_create_fields
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) fn collect(ctx: &mut TurnCtx<'_>) -> RouteToken {
    let mut missing: BTreeSet<Slot> = REQUIRED
        .iter()
        .filter(|s| !ctx.state.slots.contains_key(s))
        .copied()
        .collect();

    // A malformed identifier counts as missing: it must be re-collected,
    // not sent to the backend.
    if let Some(nid) = ctx.state.slots.get(&Slot::NationalId) {
        if !mask::is_national_id(nid) {
            ctx.state.slots.remove(&Slot::NationalId);
            missing.insert(Slot::NationalId);
            ctx.reply(
                "That national ID doesn't look right — it should be a letter, \
                 seven digits, then a letter (like S1234567A).",
            );
        }
    }

    if missing.is_empty() {
        ctx.state.missing_slots.clear();
        return RouteToken::ExecuteCreate;
    }

    ctx.state.intent = Intent::CreatePatient;
    ctx.state.pending_action = PendingAction::AwaitingSlotsForCreate;
    ctx.state.missing_slots = missing.clone();

    let labels: Vec<&str> = missing.iter().map(|s| s.label()).collect();
    LogRecord::new(
        LogCategory::Missing,
        format!("create needs: {}", labels.join(", ")),
    )
    .session(ctx.state.conversation_id.to_string())
    .node("collect_create_fields")
    .emit();

    if ctx.state.clarification_count < 1 {
        ctx.state.clarification_count += 1;
        ctx.reply(format!(
            "To create the patient I still need: {}.",
            labels.join(", ")
        ));
    } else {
        // Second consecutive re-prompt for the same pending action:
        // offer a way out instead of looping.
        ctx.reply(format!(
            "I still don't have: {}. Reply with those details, or say \
             \"cancel\" to abandon creating this patient.",
            labels.join(", ")
        ));
    }
    RouteToken::Prompted
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// execute_create_patient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn execute(ctx: &mut TurnCtx<'_>) -> RouteToken {
    let new = match NewPatient::from_slots(&ctx.state.slots) {
        Ok(n) => n,
        Err(errors) => {
            reflect_validation(ctx, &errors);
            return RouteToken::ValidationFailed;
        }
    };

    match ctx.deps.backend.create_patient(&new).await {
        ToolResult::Ok(patient) => {
            ctx.deps.cache.invalidate();
            ctx.state.metrics_delta.successful_ops += 1;
            ctx.state.selected_patient_id = Some(patient.id);
            ctx.state.slots.clear();
            ctx.state.missing_slots.clear();
            ctx.state.pending_action = PendingAction::None;
            ctx.state.clarification_count = 0;
            ctx.agent_op = AgentOp::Create;

            LogRecord::new(
                LogCategory::Success,
                format!("created patient id {}", patient.id),
            )
            .session(ctx.state.conversation_id.to_string())
            .node("execute_create_patient")
            .emit();

            ctx.reply(format!("Created {}.", patient_line(&patient)));
            RouteToken::Done
        }
        ToolResult::ValidationFailed(errors) => {
            reflect_validation(ctx, &errors);
            RouteToken::ValidationFailed
        }
        ToolResult::Conflict => {
            // A national-id uniqueness clash is fixable by the user:
            // reopen collection for the identifier.
            ctx.state.slots.remove(&Slot::NationalId);
            ctx.state.missing_slots.insert(Slot::NationalId);
            ctx.state.pending_action = PendingAction::AwaitingSlotsForCreate;
            ctx.state.clarification_count = 0;
            ctx.reply(
                "A patient with that national ID already exists. Give me a \
                 different ID, or say \"cancel\".",
            );
            RouteToken::ValidationFailed
        }
        failure => {
            // Terminal for this pending op: the obligation is dropped
            // whole, never half-cleared.
            ctx.state.slots.clear();
            ctx.state.missing_slots.clear();
            ctx.state.pending_action = PendingAction::None;
            ctx.state.clarification_count = 0;

            LogRecord::new(LogCategory::Error, "create_patient failed")
                .session(ctx.state.conversation_id.to_string())
                .node("execute_create_patient")
                .extra(serde_json::json!({ "outcome": format!("{failure:?}") }))
                .emit();
            tool_failure_reply(ctx, "create the patient", &failure);
            RouteToken::Done
        }
    }
}

/// Reflect a validation-error map into slot-filling: failed fields are
/// re-collected, their messages shown, and the clarification bound reset
/// so the user gets a fresh prompt rather than an immediate cancel offer.
fn reflect_validation(
    ctx: &mut TurnCtx<'_>,
    errors: &hc_domain::types::ValidationErrors,
) {
    let mut lines = Vec::new();
    for (field, messages) in errors {
        if let Some(slot) = Slot::from_field(field) {
            ctx.state.slots.remove(&slot);
            ctx.state.missing_slots.insert(slot);
            lines.push(format!("{}: {}", slot.label(), messages.join("; ")));
        } else {
            lines.push(format!("{field}: {}", messages.join("; ")));
        }
    }
    ctx.state.pending_action = PendingAction::AwaitingSlotsForCreate;
    ctx.state.clarification_count = 0;

    LogRecord::new(
        LogCategory::Missing,
        format!("create rejected: {}", lines.join(" / ")),
    )
    .session(ctx.state.conversation_id.to_string())
    .node("execute_create_patient")
    .emit();

    ctx.reply(format!(
        "The backend rejected some fields — {}.",
        lines.join("; ")
    ));
}
