//! Tail of every turn: optional history compression, then the finalize
//! node that masks, persists, and assembles the response envelope.

use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::mask;
use hc_domain::types::TurnMessage;
use hc_llm::adapter::truncation_summary;
use hc_sessions::RECENT_MESSAGES_MAX;

use super::super::graph::RouteToken;
use super::super::{AgentStateSummary, AssistantMessage, ConverseReply, TurnCtx};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// summarize_history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn summarize(ctx: &mut TurnCtx<'_>) -> RouteToken {
    if ctx.state.recent_messages.len() < RECENT_MESSAGES_MAX {
        return RouteToken::Summarized;
    }

    let summary = match &ctx.deps.llm {
        Some(adapter) => match adapter.summarize(&ctx.state.recent_messages).await {
            Ok(text) => text,
            Err(e) => {
                LogRecord::new(
                    LogCategory::Error,
                    format!("summarization failed, using truncation fallback: {e}"),
                )
                .session(ctx.state.conversation_id.to_string())
                .node("summarize_history")
                .emit();
                truncation_summary(&ctx.state.recent_messages)
            }
        },
        None => truncation_summary(&ctx.state.recent_messages),
    };
    ctx.state.history_summary = Some(summary);
    RouteToken::Summarized
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// finalize_response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assemble the envelope: mask every outbound string exactly once,
/// append the assistant turns to the window, fold per-turn counters into
/// the global registry, and persist the state.
pub async fn finalize(ctx: &mut TurnCtx<'_>) -> ConverseReply {
    if ctx.replies.is_empty() {
        ctx.replies
            .push("Something went wrong — please try again.".to_owned());
    }

    let masked: Vec<String> = ctx
        .replies
        .iter()
        .map(|r| {
            if ctx.deps.config.mask_pii {
                mask::mask(r)
            } else {
                r.clone()
            }
        })
        .collect();

    for text in &masked {
        ctx.state.push_message(TurnMessage::assistant(text.clone()));
    }

    let delta = std::mem::take(&mut ctx.state.metrics_delta);
    ctx.deps
        .metrics
        .merge_ops(delta.successful_ops, delta.failed_ops, delta.aborted_ops);

    ctx.state.touch(ctx.now);
    ctx.deps.store.put(ctx.state.clone(), ctx.now).await;

    LogRecord::new(
        LogCategory::Flow,
        format!(
            "turn finished: op={:?}, {} message(s)",
            ctx.agent_op,
            masked.len()
        ),
    )
    .session(ctx.state.conversation_id.to_string())
    .node("finalize_response")
    .emit();

    ConverseReply {
        conversation_id: ctx.state.conversation_id.to_string(),
        messages: masked
            .into_iter()
            .map(|content| AssistantMessage {
                role: "assistant",
                content,
            })
            .collect(),
        agent_op: ctx.agent_op,
        agent_state: AgentStateSummary {
            intent: ctx.state.intent.name(),
            awaiting_confirmation: ctx.state.confirmation_required,
            missing_fields: ctx.state.missing_slots.iter().map(|s| s.as_str()).collect(),
        },
        internal_error: ctx.routing_failure,
    }
}
