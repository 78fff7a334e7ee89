//! Patient update: identity resolution plus field collection, then the
//! GET-merge-PUT backend call (merging happens in the tool client).

use std::collections::BTreeSet;

use hc_domain::intent::{AgentOp, Intent, PendingAction};
use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::types::{Slot, SlotMap, ToolResult};

use super::super::graph::RouteToken;
use super::super::TurnCtx;
use super::{patient_line, resolve_target, tool_failure_reply, Resolved};

/// Fields a clinician can change through this flow.
const UPDATABLE: [Slot; 6] = [
    Slot::FirstName,
    Slot::LastName,
    Slot::NationalId,
    Slot::Contact,
    Slot::DateOfBirth,
    Slot::Details,
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// collect_update_fields
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn collect(ctx: &mut TurnCtx<'_>) -> RouteToken {
    ctx.state.intent = Intent::UpdatePatient;

    let (turn_has_name_pair, turn_has_id) = ctx
        .classified
        .as_ref()
        .map(|c| {
            (
                c.slots.contains_key(&Slot::FirstName)
                    && c.slots.contains_key(&Slot::LastName),
                c.slots.contains_key(&Slot::PatientId),
            )
        })
        .unwrap_or((false, false));

    let patient = match resolve_target(ctx).await {
        Resolved::One(p) => p,
        Resolved::Ambiguous(candidates) => {
            let lines: Vec<String> =
                candidates.iter().map(|p| format!("- {}", patient_line(p))).collect();
            ctx.state.missing_slots = BTreeSet::from([Slot::PatientId]);
            return prompt_or_offer(
                ctx,
                format!(
                    "I found more than one match:\n{}\nWhich patient ID should I update?",
                    lines.join("\n")
                ),
            );
        }
        Resolved::NotFound { asked_for } => {
            let known = ctx.deps.cache.sample_names(3).await;
            let hint = if known.is_empty() {
                String::new()
            } else {
                format!(" Patients on file include: {}.", known.join(", "))
            };
            ctx.state.missing_slots = BTreeSet::from([Slot::PatientId]);
            return prompt_or_offer(
                ctx,
                format!("I couldn't find {asked_for}.{hint} Which patient should I update?"),
            );
        }
        Resolved::Unspecified => {
            ctx.state.missing_slots = BTreeSet::from([Slot::PatientId]);
            return prompt_or_offer(
                ctx,
                "Which patient should I update? Give me a name or a patient ID.".to_owned(),
            );
        }
    };

    ctx.state.selected_patient_id = Some(patient.id);

    // When the patient was named rather than numbered, the name slots are
    // identity, not new values.
    let mut updates = SlotMap::new();
    for slot in UPDATABLE {
        if turn_has_name_pair
            && !turn_has_id
            && matches!(slot, Slot::FirstName | Slot::LastName)
        {
            continue;
        }
        if let Some(value) = ctx.state.slots.get(&slot) {
            updates.insert(slot, value.clone());
        }
    }

    if updates.is_empty() {
        ctx.state.missing_slots =
            BTreeSet::from([Slot::Contact, Slot::DateOfBirth, Slot::Details]);
        return prompt_or_offer(
            ctx,
            format!(
                "What should I change for {}? You can give a new contact, \
                 date of birth, or details.",
                patient.full_name()
            ),
        );
    }

    ctx.state.missing_slots.clear();
    ctx.update_fields = updates;
    RouteToken::ExecuteUpdate
}

/// Prompt once; on the second consecutive re-prompt for this pending
/// action, offer cancellation instead.
fn prompt_or_offer(ctx: &mut TurnCtx<'_>, text: String) -> RouteToken {
    ctx.state.pending_action = PendingAction::AwaitingSlotsForUpdate;

    LogRecord::new(
        LogCategory::Missing,
        format!(
            "update needs: {}",
            ctx.state
                .missing_slots
                .iter()
                .map(|s| s.label())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    )
    .session(ctx.state.conversation_id.to_string())
    .node("collect_update_fields")
    .emit();

    if ctx.state.clarification_count < 1 {
        ctx.state.clarification_count += 1;
        ctx.reply(text);
    } else {
        ctx.reply(format!(
            "{text} Or say \"cancel\" to abandon the update."
        ));
    }
    RouteToken::Prompted
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// execute_update_patient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn execute(ctx: &mut TurnCtx<'_>) -> RouteToken {
    let Some(id) = ctx.state.selected_patient_id else {
        // Collect guarantees a selection before routing here; losing it
        // mid-turn is state damage, not a user error.
        LogRecord::new(LogCategory::Error, "update executed without a selection")
            .session(ctx.state.conversation_id.to_string())
            .node("execute_update_patient")
            .emit();
        ctx.state.metrics_delta.failed_ops += 1;
        ctx.reply("I lost track of which patient to update — please start over.");
        return RouteToken::Done;
    };

    let fields = std::mem::take(&mut ctx.update_fields);
    match ctx.deps.backend.update_patient(id, &fields).await {
        ToolResult::Ok(patient) => {
            ctx.deps.cache.invalidate();
            ctx.state.metrics_delta.successful_ops += 1;
            ctx.state.slots.clear();
            ctx.state.missing_slots.clear();
            ctx.state.pending_action = PendingAction::None;
            ctx.state.clarification_count = 0;
            ctx.agent_op = AgentOp::Update;

            LogRecord::new(
                LogCategory::Success,
                format!("updated patient id {}", patient.id),
            )
            .session(ctx.state.conversation_id.to_string())
            .node("execute_update_patient")
            .emit();

            let changed: Vec<&str> = fields.keys().map(|s| s.label()).collect();
            ctx.reply(format!(
                "Updated {} ({}).",
                patient_line(&patient),
                changed.join(", ")
            ));
            RouteToken::Done
        }
        ToolResult::ValidationFailed(errors) => {
            // The merged body was rejected; reopen collection for the
            // offending fields with the backend's own messages.
            let mut lines = Vec::new();
            for (field, messages) in &errors {
                if let Some(slot) = Slot::from_field(field) {
                    ctx.state.slots.remove(&slot);
                    ctx.state.missing_slots.insert(slot);
                    lines.push(format!("{}: {}", slot.label(), messages.join("; ")));
                } else {
                    lines.push(format!("{field}: {}", messages.join("; ")));
                }
            }
            ctx.state.pending_action = PendingAction::AwaitingSlotsForUpdate;
            ctx.state.clarification_count = 0;

            LogRecord::new(
                LogCategory::Missing,
                format!("update rejected: {}", lines.join(" / ")),
            )
            .session(ctx.state.conversation_id.to_string())
            .node("execute_update_patient")
            .emit();

            ctx.reply(format!(
                "The backend rejected some fields — {}.",
                lines.join("; ")
            ));
            RouteToken::ValidationFailed
        }
        ToolResult::NotFound => {
            ctx.state.metrics_delta.failed_ops += 1;
            ctx.state.slots.clear();
            ctx.state.missing_slots.clear();
            ctx.state.pending_action = PendingAction::None;
            ctx.state.selected_patient_id = None;
            ctx.reply("That patient no longer exists — maybe someone else removed them.");
            RouteToken::Done
        }
        failure => {
            ctx.state.slots.clear();
            ctx.state.missing_slots.clear();
            ctx.state.pending_action = PendingAction::None;
            ctx.state.clarification_count = 0;

            LogRecord::new(LogCategory::Error, "update_patient failed")
                .session(ctx.state.conversation_id.to_string())
                .node("execute_update_patient")
                .extra(serde_json::json!({ "outcome": format!("{failure:?}") }))
                .emit();
            tool_failure_reply(ctx, "update the patient", &failure);
            RouteToken::Done
        }
    }
}
