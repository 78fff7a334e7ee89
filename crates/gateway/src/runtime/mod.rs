//! Turn execution: the context threaded through graph nodes, the
//! response envelope, and the per-turn orchestration around the graph
//! executor.

pub mod cancel;
pub mod graph;
pub mod metrics_view;
pub mod nodes;
pub mod session_lock;

#[cfg(test)]
mod turn_tests;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use hc_backend::{NameCache, PatientBackend};
use hc_domain::config::Config;
use hc_domain::intent::AgentOp;
use hc_domain::metrics::Metrics;
use hc_domain::types::{SlotMap, TurnMessage};
use hc_llm::{ClassifiedMessage, IntentClassifier, LlmAdapter};
use hc_sessions::{SessionState, SessionStore};

use cancel::CancelToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dependencies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a turn needs, composed once at bootstrap. Tests wire
/// stubs through the same structure; no global state anywhere.
pub struct TurnDeps {
    pub config: Arc<Config>,
    pub store: Arc<dyn SessionStore>,
    pub backend: Arc<dyn PatientBackend>,
    pub cache: Arc<NameCache>,
    pub classifier: Arc<IntentClassifier>,
    pub llm: Option<Arc<dyn LlmAdapter>>,
    pub metrics: Arc<Metrics>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable context for one turn. Nodes read the classified message,
/// mutate session state, and append replies; finalize masks and ships
/// whatever accumulated.
pub struct TurnCtx<'a> {
    pub deps: &'a TurnDeps,
    pub state: &'a mut SessionState,
    /// The inbound message exactly as received.
    pub raw_message: String,
    /// Trimmed and size-capped by the ingest node.
    pub message: String,
    pub classified: Option<ClassifiedMessage>,
    /// Field updates staged by collect_update_fields for the executor.
    pub update_fields: SlotMap,
    pub replies: Vec<String>,
    pub agent_op: AgentOp,
    /// A slot gained a value this turn (resets the clarification bound).
    pub progress: bool,
    pub cancelled: bool,
    pub routing_failure: bool,
    pub cancel: CancelToken,
    pub now: DateTime<Utc>,
}

impl<'a> TurnCtx<'a> {
    pub fn new(
        deps: &'a TurnDeps,
        state: &'a mut SessionState,
        raw_message: String,
        cancel: CancelToken,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            deps,
            state,
            raw_message,
            message: String::new(),
            classified: None,
            update_fields: SlotMap::new(),
            replies: Vec::new(),
            agent_op: AgentOp::None,
            progress: false,
            cancelled: false,
            routing_failure: false,
            cancel,
            now,
        }
    }

    pub fn reply(&mut self, text: impl Into<String>) {
        self.replies.push(text.into());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStateSummary {
    pub intent: &'static str,
    pub awaiting_confirmation: bool,
    pub missing_fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConverseReply {
    pub conversation_id: String,
    pub messages: Vec<AssistantMessage>,
    pub agent_op: AgentOp,
    pub agent_state: AgentStateSummary,
    /// Routing/assertion failure inside the turn; the envelope is still
    /// complete but the endpoint reports it as a server error.
    #[serde(skip)]
    pub internal_error: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one full turn against loaded state: walk the graph to the
/// terminal node, then finalize (mask, persist, envelope).
///
/// A cancellation observed mid-walk discards every state mutation except
/// the user's message itself, which is kept for context.
pub async fn run_turn(
    deps: &TurnDeps,
    state: &mut SessionState,
    raw_message: String,
    cancel: CancelToken,
    now: DateTime<Utc>,
) -> ConverseReply {
    let pristine = state.clone();
    let mut ctx = TurnCtx::new(deps, state, raw_message, cancel, now);

    graph::run_to_terminal(&mut ctx).await;

    if ctx.cancelled {
        // The ingest node may not have run yet; cap the raw text here.
        let message = if ctx.message.is_empty() {
            hc_llm::rules::truncate_message(ctx.raw_message.trim())
        } else {
            ctx.message.clone()
        };
        *ctx.state = pristine;
        if !message.is_empty() {
            ctx.state.push_message(TurnMessage::user(message));
        }
        ctx.replies.clear();
        ctx.agent_op = AgentOp::None;
        ctx.reply("The request was cancelled before it completed.");
    }

    nodes::finalize(&mut ctx).await
}

/// Finalize a turn that hit the deadline. The timed-out turn future was
/// dropped with its partial slot mutations; this runs the finalize node
/// over the pristine state so the reply is masked, the user's message is
/// kept for context, and the envelope stays complete.
pub async fn finalize_deadline_exceeded(
    deps: &TurnDeps,
    state: &mut SessionState,
    raw_message: &str,
    now: DateTime<Utc>,
) -> ConverseReply {
    let mut ctx = TurnCtx::new(deps, state, raw_message.to_owned(), CancelToken::new(), now);

    let message = hc_llm::rules::truncate_message(ctx.raw_message.trim());
    if !message.is_empty() {
        ctx.state.push_message(TurnMessage::user(message));
    }
    ctx.reply("That took too long and was stopped — please try again.");

    nodes::finalize(&mut ctx).await
}
