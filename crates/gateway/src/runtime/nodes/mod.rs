//! Node implementations for the conversation graph.
//!
//! Each node consumes the turn context, performs at most one external
//! call, and returns a routing token. Tool failures become user-facing
//! messages here; nothing propagates past a node boundary as an error.

mod confirm;
mod create;
mod delete;
mod finalize;
mod ingest;
mod patients;
mod scans;
mod stats;
mod update;

pub use finalize::finalize;

use hc_backend::NameResolution;
use hc_domain::types::{Patient, Slot, ToolResult};

use super::graph::{Node, RouteToken};
use super::TurnCtx;

/// Dispatch one node. `FinalizeResponse` is never dispatched here; the
/// executor exits on it and the caller invokes [`finalize`] directly.
pub async fn run(node: Node, ctx: &mut TurnCtx<'_>) -> RouteToken {
    match node {
        Node::IngestUserMessage => ingest::ingest(ctx),
        Node::ClassifyIntent => ingest::classify(ctx).await,
        Node::HandleCancel => ingest::handle_cancel(ctx),
        Node::UnknownIntent => ingest::unknown_intent(ctx),
        Node::CollectCreateFields => create::collect(ctx),
        Node::ExecuteCreatePatient => create::execute(ctx).await,
        Node::CollectUpdateFields => update::collect(ctx).await,
        Node::ExecuteUpdatePatient => update::execute(ctx).await,
        Node::DeletePatient => delete::arm(ctx).await,
        Node::ExecuteDeletePatient => delete::execute(ctx).await,
        Node::HandleConfirmation => confirm::handle(ctx),
        Node::ListPatients => patients::list(ctx).await,
        Node::GetPatientDetails => patients::details(ctx).await,
        Node::GetScanResults => scans::fetch(ctx).await,
        Node::ShowMoreScans => scans::show_more(ctx),
        Node::ProvideStlLinks => scans::stl_links(ctx),
        Node::ProvideDepthMaps => scans::depth_maps(ctx),
        Node::ProvideAgentStats => stats::provide(ctx).await,
        Node::SummarizeHistory => finalize::summarize(ctx).await,
        Node::FinalizeResponse => RouteToken::Done,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared patient resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the target patient of this turn was (or was not) resolved.
pub(super) enum Resolved {
    One(Patient),
    Ambiguous(Vec<Patient>),
    NotFound { asked_for: String },
    Unspecified,
}

/// Resolve the patient this turn is about: an explicit id slot wins,
/// then a name pair through the cache, then the session's selection.
pub(super) async fn resolve_target(ctx: &TurnCtx<'_>) -> Resolved {
    let slots = ctx.classified.as_ref().map(|c| c.slots.clone()).unwrap_or_default();

    if let Some(raw_id) = slots.get(&Slot::PatientId) {
        return match raw_id.parse::<i64>() {
            Ok(id) => match ctx.deps.cache.lookup(id).await {
                Some(p) => Resolved::One(p),
                None => Resolved::NotFound {
                    asked_for: format!("patient {id}"),
                },
            },
            Err(_) => Resolved::NotFound {
                asked_for: format!("patient {raw_id}"),
            },
        };
    }

    if let (Some(first), Some(last)) =
        (slots.get(&Slot::FirstName), slots.get(&Slot::LastName))
    {
        let full = format!("{first} {last}");
        return match ctx.deps.cache.resolve(&full).await {
            NameResolution::Unique(p) => Resolved::One(p),
            NameResolution::Ambiguous(candidates) => Resolved::Ambiguous(candidates),
            NameResolution::None => Resolved::NotFound { asked_for: full },
        };
    }

    if let Some(id) = ctx.state.selected_patient_id {
        return match ctx.deps.cache.lookup(id).await {
            Some(p) => Resolved::One(p),
            None => Resolved::NotFound {
                asked_for: format!("patient {id}"),
            },
        };
    }

    Resolved::Unspecified
}

/// One-line rendering of a patient with the identifier in redacted form.
/// Finalize masks everything again; this keeps intermediate buffers
/// clean too.
pub(super) fn patient_line(p: &Patient) -> String {
    format!(
        "{} (id {}, {})",
        p.full_name(),
        p.id,
        hc_domain::mask::redact_id(&p.national_id)
    )
}

/// User-facing rendering of an infrastructure-level tool failure, plus
/// the failed-op accounting every such path shares.
pub(super) fn tool_failure_reply<T>(ctx: &mut TurnCtx<'_>, what: &str, result: &ToolResult<T>) {
    ctx.state.metrics_delta.failed_ops += 1;
    let text = match result {
        ToolResult::TransportError { .. } => format!(
            "I couldn't reach the records service to {what}. Please try again in a moment."
        ),
        ToolResult::ServerError { status } => format!(
            "The records service had a problem ({status}) while trying to {what}. Please try again."
        ),
        ToolResult::Unauthorized => format!(
            "I'm not authorized to {what} right now — an operator needs to check the backend credentials."
        ),
        ToolResult::Conflict => {
            format!("The records service reported a conflict while trying to {what}.")
        }
        ToolResult::NotFound => {
            format!("The record I tried to {what} no longer exists.")
        }
        _ => format!("Something unexpected happened while trying to {what}."),
    };
    ctx.reply(text);
}
