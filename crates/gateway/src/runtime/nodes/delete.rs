//! Patient deletion: always gated behind an explicit affirmative
//! confirmation. The execute node is reachable only through the
//! confirmation gate's affirmative edge.

use hc_domain::intent::{AgentOp, ConfirmationKind, Intent, PendingAction};
use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::types::ToolResult;

use super::super::graph::RouteToken;
use super::super::TurnCtx;
use super::{patient_line, resolve_target, tool_failure_reply, Resolved};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// delete_patient (arm the gate)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn arm(ctx: &mut TurnCtx<'_>) -> RouteToken {
    ctx.state.intent = Intent::DeletePatient;

    match resolve_target(ctx).await {
        Resolved::One(patient) => {
            ctx.state.selected_patient_id = Some(patient.id);
            ctx.state.confirmation_required = true;
            ctx.state.confirmation_kind = ConfirmationKind::Delete;
            ctx.state.pending_action = PendingAction::AwaitingDeleteConfirmation;
            ctx.state.clarification_count = 0;

            LogRecord::new(
                LogCategory::Flow,
                format!("delete armed for patient id {}", patient.id),
            )
            .session(ctx.state.conversation_id.to_string())
            .node("delete_patient")
            .emit();

            ctx.reply(format!(
                "Delete {}? This cannot be undone — reply \"yes\" to confirm \
                 or \"no\" to keep the record.",
                patient_line(&patient)
            ));
            RouteToken::NeedConfirmation
        }
        Resolved::Ambiguous(candidates) => {
            let lines: Vec<String> = candidates
                .iter()
                .map(|p| format!("- {}", patient_line(p)))
                .collect();
            ctx.reply(format!(
                "More than one patient matches:\n{}\nTell me the patient ID to delete.",
                lines.join("\n")
            ));
            RouteToken::Done
        }
        Resolved::NotFound { asked_for } => {
            let known = ctx.deps.cache.sample_names(3).await;
            let hint = if known.is_empty() {
                String::new()
            } else {
                format!(" Patients on file include: {}.", known.join(", "))
            };
            ctx.reply(format!("I couldn't find {asked_for}.{hint}"));
            RouteToken::Done
        }
        Resolved::Unspecified => {
            ctx.reply("Which patient should I delete? Give me a name or a patient ID.");
            RouteToken::Done
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// execute_delete_patient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn execute(ctx: &mut TurnCtx<'_>) -> RouteToken {
    // Reachable only via the affirmative confirmation edge; the state
    // must still describe an armed delete.
    if !ctx.state.confirmation_required
        || ctx.state.confirmation_kind != ConfirmationKind::Delete
    {
        LogRecord::new(
            LogCategory::Error,
            "execute_delete reached without an armed delete gate",
        )
        .session(ctx.state.conversation_id.to_string())
        .node("execute_delete_patient")
        .emit();
        ctx.state.metrics_delta.failed_ops += 1;
        ctx.reply("I lost track of the delete confirmation — please start over.");
        return RouteToken::Done;
    }

    let Some(id) = ctx.state.selected_patient_id else {
        ctx.state.metrics_delta.failed_ops += 1;
        ctx.state.confirmation_required = false;
        ctx.state.confirmation_kind = ConfirmationKind::None;
        ctx.state.pending_action = PendingAction::None;
        ctx.reply("I lost track of which patient to delete — please start over.");
        return RouteToken::Done;
    };

    let display = ctx
        .deps
        .cache
        .lookup(id)
        .await
        .map(|p| patient_line(&p))
        .unwrap_or_else(|| format!("patient {id}"));

    // The gate is spent regardless of the outcome below.
    ctx.state.confirmation_required = false;
    ctx.state.confirmation_kind = ConfirmationKind::None;
    ctx.state.pending_action = PendingAction::None;
    ctx.state.clarification_count = 0;

    match ctx.deps.backend.delete_patient(id).await {
        ToolResult::Ok(()) => {
            ctx.deps.cache.invalidate();
            ctx.state.metrics_delta.successful_ops += 1;
            ctx.state.selected_patient_id = None;
            ctx.agent_op = AgentOp::Delete;

            LogRecord::new(LogCategory::Success, format!("deleted patient id {id}"))
                .session(ctx.state.conversation_id.to_string())
                .node("execute_delete_patient")
                .emit();

            ctx.reply(format!("Deleted {display}."));
            RouteToken::Done
        }
        ToolResult::NotFound => {
            ctx.deps.cache.invalidate();
            ctx.state.metrics_delta.failed_ops += 1;
            ctx.state.selected_patient_id = None;
            ctx.reply(format!(
                "{display} was already gone — the record no longer exists."
            ));
            RouteToken::Done
        }
        failure => {
            LogRecord::new(LogCategory::Error, "delete_patient failed")
                .session(ctx.state.conversation_id.to_string())
                .node("execute_delete_patient")
                .extra(serde_json::json!({ "outcome": format!("{failure:?}") }))
                .emit();
            tool_failure_reply(ctx, "delete the patient", &failure);
            RouteToken::Done
        }
    }
}
