//! The converse endpoint: the single synchronous entry point that
//! drives a full turn: validate the envelope, lock the conversation,
//! load or create state, run the graph under the turn deadline, and
//! return the masked response envelope.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use hc_domain::log::{LogCategory, LogRecord};
use hc_sessions::SessionState;

use crate::runtime::{finalize_deadline_exceeded, run_turn};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConverseRequest {
    /// Opaque conversation identifier; absent or null starts a new
    /// conversation.
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
    /// Client-side correlation id, echoed into logs only.
    #[serde(default)]
    pub message_id: Option<String>,
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

pub async fn converse(
    State(state): State<AppState>,
    Json(body): Json<ConverseRequest>,
) -> Response {
    if body.message.trim().is_empty() {
        return bad_request("message must not be empty");
    }

    let conversation_id = match body.conversation_id.as_deref() {
        None | Some("") => Uuid::new_v4(),
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => id,
            Err(_) => return bad_request("conversation_id is not a valid identifier"),
        },
    };

    if let Some(message_id) = &body.message_id {
        LogRecord::new(LogCategory::Flow, format!("inbound message {message_id}"))
            .session(conversation_id.to_string())
            .emit();
    }

    // One turn per conversation: later requests for the same id wait
    // here until the running turn finishes.
    let _permit = state.locks.acquire(conversation_id).await;

    let now = Utc::now();
    let mut session = match state.deps.store.get(conversation_id, now).await {
        Some(s) => s,
        None => SessionState::new(conversation_id, now),
    };

    let cancel = state.cancel_map.register(conversation_id);
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        state.deps.config.turn_deadline,
        run_turn(&state.deps, &mut session, body.message.clone(), cancel, now),
    )
    .await;
    state.cancel_map.remove(conversation_id);
    state.deps.metrics.record_turn(started.elapsed());

    match outcome {
        Ok(reply) if reply.internal_error => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(reply)).into_response()
        }
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(_) => {
            // Deadline exceeded: the turn future (and any in-flight tool
            // call) was dropped. Partial slot mutations are discarded;
            // only the user's message is kept for context. The reply
            // still goes through the finalize node so masking and
            // persistence happen at the one enforcement point.
            LogRecord::new(LogCategory::Error, "turn deadline exceeded")
                .session(conversation_id.to_string())
                .node("finalize_response")
                .emit();
            state.deps.metrics.incr_failed_ops();

            let mut pristine = match state.deps.store.get(conversation_id, now).await {
                Some(s) => s,
                None => SessionState::new(conversation_id, now),
            };
            let reply =
                finalize_deadline_exceeded(&state.deps, &mut pristine, &body.message, now)
                    .await;

            (StatusCode::REQUEST_TIMEOUT, Json(reply)).into_response()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /hydrochat/converse/:conversation_id/stop/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Signal cancellation of an in-flight turn. The turn loop observes the
/// token between nodes, abandons its state mutations, and returns a
/// cancelled envelope to the original caller.
pub async fn stop(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Response {
    if !state.cancel_map.cancel(conversation_id) {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "no turn in flight for that conversation"
            })),
        )
            .into_response();
    }

    LogRecord::new(LogCategory::Flow, "turn cancellation requested")
        .session(conversation_id.to_string())
        .emit();

    Json(serde_json::json!({
        "conversation_id": conversation_id.to_string(),
        "cancelled": true,
    }))
    .into_response()
}
