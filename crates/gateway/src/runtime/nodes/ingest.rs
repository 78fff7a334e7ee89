//! Front of the graph: ingest, classification-and-routing, cancel, and
//! the capability guide for unmatched messages.

use hc_domain::intent::{Intent, PendingAction};
use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::mask;
use hc_domain::types::{Slot, TurnMessage};
use hc_llm::rules;

use super::super::graph::RouteToken;
use super::super::TurnCtx;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ingest_user_message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) fn ingest(ctx: &mut TurnCtx<'_>) -> RouteToken {
    ctx.message = rules::truncate_message(ctx.raw_message.trim());
    ctx.state
        .push_message(TurnMessage::user(ctx.message.clone()));

    if mask::contains_unmasked_id(&ctx.message) {
        LogRecord::new(
            LogCategory::Flow,
            "inbound message contains identifier-shaped content",
        )
        .session(ctx.state.conversation_id.to_string())
        .node("ingest_user_message")
        .emit();
    }

    LogRecord::new(
        LogCategory::Flow,
        format!("turn started ({} chars)", ctx.message.chars().count()),
    )
    .session(ctx.state.conversation_id.to_string())
    .node("ingest_user_message")
    .emit();

    RouteToken::Ingested
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// classify_intent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn classify(ctx: &mut TurnCtx<'_>) -> RouteToken {
    // Confirmation answers and slot continuations are not commands; the
    // LLM fallback only sees messages that could plausibly start one.
    let allow_fallback = !ctx.state.confirmation_required
        && ctx.state.pending_action == PendingAction::None;

    let classified = ctx
        .deps
        .classifier
        .classify(&ctx.message, &ctx.state.recent_messages, allow_fallback)
        .await;
    let intent = classified.intent;

    LogRecord::new(
        LogCategory::Intent,
        format!(
            "classified as {} with {} slot(s)",
            intent.name(),
            classified.slots.len()
        ),
    )
    .session(ctx.state.conversation_id.to_string())
    .node("classify_intent")
    .emit();

    merge_slots(ctx, &classified.slots);
    ctx.classified = Some(classified);

    if ctx.progress {
        ctx.state.clarification_count = 0;
    }

    route(ctx, intent)
}

/// Fold this turn's extracted slots into the session, tracking progress.
/// A bare one-word answer during slot filling is applied to the first
/// missing name slot.
fn merge_slots(ctx: &mut TurnCtx<'_>, slots: &hc_domain::types::SlotMap) {
    let filling = matches!(
        ctx.state.pending_action,
        PendingAction::AwaitingSlotsForCreate | PendingAction::AwaitingSlotsForUpdate
    );

    for (slot, value) in slots {
        let changed = ctx.state.slots.get(slot) != Some(value);
        if changed {
            ctx.state.slots.insert(*slot, value.clone());
            if filling {
                ctx.progress = true;
            }
        }
        ctx.state.missing_slots.remove(slot);
    }

    if filling && slots.is_empty() {
        let word = ctx.message.trim();
        let is_bare_word = !word.is_empty()
            && !word.contains(char::is_whitespace)
            && word.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-');
        if is_bare_word {
            for candidate in [Slot::FirstName, Slot::LastName] {
                if ctx.state.missing_slots.contains(&candidate) {
                    ctx.state.slots.insert(candidate, word.to_owned());
                    ctx.state.missing_slots.remove(&candidate);
                    ctx.progress = true;
                    break;
                }
            }
        }
    }
}

/// Central routing decision. Pattern matches alone are not enough for
/// the contextual intents: "show more" with an empty scan buffer is a
/// capability question, not a pagination request.
fn route(ctx: &mut TurnCtx<'_>, intent: Intent) -> RouteToken {
    if intent == Intent::Cancel {
        return RouteToken::ToCancel;
    }

    // Context-dependent short-circuits stay available while a
    // confirmation is pending.
    match intent {
        Intent::ShowMoreScans if !ctx.state.scan_buffer.is_empty() => {
            ctx.state.intent = intent;
            return RouteToken::ToShowMore;
        }
        Intent::ProvideDepthMaps if !ctx.state.scan_buffer.is_empty() => {
            ctx.state.intent = intent;
            return RouteToken::ToDepthMaps;
        }
        Intent::ProvideAgentStats => {
            ctx.state.intent = intent;
            return RouteToken::ToStats;
        }
        _ => {}
    }

    if ctx.state.confirmation_required {
        return RouteToken::ToConfirm;
    }

    // Open slot-filling continues regardless of how the answer parses.
    match ctx.state.pending_action {
        PendingAction::AwaitingSlotsForCreate => return RouteToken::ToCollectCreate,
        PendingAction::AwaitingSlotsForUpdate => return RouteToken::ToCollectUpdate,
        _ => {}
    }

    match intent {
        Intent::CreatePatient => {
            start_flow(ctx, Intent::CreatePatient);
            RouteToken::ToCollectCreate
        }
        Intent::UpdatePatient => {
            start_flow(ctx, Intent::UpdatePatient);
            RouteToken::ToCollectUpdate
        }
        Intent::DeletePatient => {
            ctx.state.intent = intent;
            RouteToken::ToDelete
        }
        Intent::ListPatients => {
            ctx.state.intent = intent;
            RouteToken::ToList
        }
        Intent::GetPatientDetails => {
            ctx.state.intent = intent;
            RouteToken::ToDetails
        }
        Intent::GetScanResults => {
            ctx.state.intent = intent;
            RouteToken::ToScans
        }
        // A selection answer for a previous ambiguous lookup arrives as a
        // bare number; the id slot routes it back to details.
        Intent::Unknown
            if ctx.state.intent == Intent::GetPatientDetails
                && ctx
                    .classified
                    .as_ref()
                    .is_some_and(|c| c.slots.contains_key(&Slot::PatientId)) =>
        {
            RouteToken::ToDetails
        }
        Intent::ShowMoreScans | Intent::ProvideDepthMaps | Intent::Unknown => {
            RouteToken::ToUnknown
        }
        Intent::ProvideAgentStats | Intent::Cancel => unreachable!("handled above"),
    }
}

/// Starting a fresh create/update flow clears residue from any previous
/// flow before this turn's slots land.
fn start_flow(ctx: &mut TurnCtx<'_>, intent: Intent) {
    let expected = match intent {
        Intent::CreatePatient => PendingAction::AwaitingSlotsForCreate,
        _ => PendingAction::AwaitingSlotsForUpdate,
    };
    if ctx.state.pending_action != expected {
        let fresh = ctx
            .classified
            .as_ref()
            .map(|c| c.slots.clone())
            .unwrap_or_default();
        ctx.state.slots = fresh;
        ctx.state.missing_slots.clear();
        ctx.state.clarification_count = 0;
    }
    ctx.state.intent = intent;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// handle_cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) fn handle_cancel(ctx: &mut TurnCtx<'_>) -> RouteToken {
    ctx.state.reset_on_cancel();
    ctx.state.metrics_delta.aborted_ops += 1;
    ctx.state.intent = Intent::Cancel;

    LogRecord::new(LogCategory::Flow, "pending action cancelled by user")
        .session(ctx.state.conversation_id.to_string())
        .node("handle_cancel")
        .emit();

    ctx.reply("Cancelled — I've dropped what we were doing. Nothing was changed.");
    RouteToken::Done
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// unknown_intent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) fn unknown_intent(ctx: &mut TurnCtx<'_>) -> RouteToken {
    ctx.reply(
        "I can help with patient records and scans. Try for example:\n\
         - \"create patient Jane Tan NRIC S1234567A\"\n\
         - \"show Jane Tan\" or \"list patients\"\n\
         - \"update patient 7 contact 91234567\"\n\
         - \"scan results for patient 7\", then \"show more\" or \"depth maps\"\n\
         - \"delete patient 7\" (I'll ask you to confirm)\n\
         - \"cancel\" to abandon whatever we're in the middle of",
    );
    RouteToken::Done
}
