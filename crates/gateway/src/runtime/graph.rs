//! The conversation graph: node set, routing table, and step executor.
//!
//! The table is the single source of truth for edges. After every node
//! runs, the executor checks the returned token against the node's
//! permitted set and looks up the next node; any violation is a fatal
//! internal error for the turn: it fails closed to the finalize node
//! with an error envelope and never silently falls through.

use hc_domain::log::{LogCategory, LogRecord};

use super::nodes;
use super::TurnCtx;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Nodes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    IngestUserMessage,
    ClassifyIntent,
    HandleCancel,
    CollectCreateFields,
    ExecuteCreatePatient,
    CollectUpdateFields,
    ExecuteUpdatePatient,
    DeletePatient,
    ExecuteDeletePatient,
    ListPatients,
    GetPatientDetails,
    GetScanResults,
    ShowMoreScans,
    ProvideStlLinks,
    ProvideDepthMaps,
    HandleConfirmation,
    ProvideAgentStats,
    UnknownIntent,
    SummarizeHistory,
    FinalizeResponse,
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::IngestUserMessage => "ingest_user_message",
            Node::ClassifyIntent => "classify_intent",
            Node::HandleCancel => "handle_cancel",
            Node::CollectCreateFields => "collect_create_fields",
            Node::ExecuteCreatePatient => "execute_create_patient",
            Node::CollectUpdateFields => "collect_update_fields",
            Node::ExecuteUpdatePatient => "execute_update_patient",
            Node::DeletePatient => "delete_patient",
            Node::ExecuteDeletePatient => "execute_delete_patient",
            Node::ListPatients => "list_patients",
            Node::GetPatientDetails => "get_patient_details",
            Node::GetScanResults => "get_scan_results",
            Node::ShowMoreScans => "show_more_scans",
            Node::ProvideStlLinks => "provide_stl_links",
            Node::ProvideDepthMaps => "provide_depth_maps",
            Node::HandleConfirmation => "handle_confirmation",
            Node::ProvideAgentStats => "provide_agent_stats",
            Node::UnknownIntent => "unknown_intent",
            Node::SummarizeHistory => "summarize_history",
            Node::FinalizeResponse => "finalize_response",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteToken {
    Ingested,
    // classify_intent fan-out
    ToCancel,
    ToConfirm,
    ToCollectCreate,
    ToCollectUpdate,
    ToDelete,
    ToList,
    ToDetails,
    ToScans,
    ToShowMore,
    ToDepthMaps,
    ToStats,
    ToUnknown,
    // slot collection
    Prompted,
    ExecuteCreate,
    ExecuteUpdate,
    ValidationFailed,
    // confirmation gates
    NeedConfirmation,
    AffirmDelete,
    AffirmStl,
    Declined,
    Unclear,
    // generic completion
    Done,
    Summarized,
}

impl RouteToken {
    pub fn name(&self) -> &'static str {
        match self {
            RouteToken::Ingested => "ingested",
            RouteToken::ToCancel => "to_cancel",
            RouteToken::ToConfirm => "to_confirm",
            RouteToken::ToCollectCreate => "to_collect_create",
            RouteToken::ToCollectUpdate => "to_collect_update",
            RouteToken::ToDelete => "to_delete",
            RouteToken::ToList => "to_list",
            RouteToken::ToDetails => "to_details",
            RouteToken::ToScans => "to_scans",
            RouteToken::ToShowMore => "to_show_more",
            RouteToken::ToDepthMaps => "to_depth_maps",
            RouteToken::ToStats => "to_stats",
            RouteToken::ToUnknown => "to_unknown",
            RouteToken::Prompted => "prompted",
            RouteToken::ExecuteCreate => "execute_create",
            RouteToken::ExecuteUpdate => "execute_update",
            RouteToken::ValidationFailed => "validation_failed",
            RouteToken::NeedConfirmation => "need_confirmation",
            RouteToken::AffirmDelete => "affirm_delete",
            RouteToken::AffirmStl => "affirm_stl",
            RouteToken::Declined => "declined",
            RouteToken::Unclear => "unclear",
            RouteToken::Done => "done",
            RouteToken::Summarized => "summarized",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The permitted token set for each node. The executor asserts
/// membership before consulting the edge table.
pub fn allowed_tokens(node: Node) -> &'static [RouteToken] {
    use Node::*;
    use RouteToken::*;
    match node {
        IngestUserMessage => &[Ingested],
        ClassifyIntent => &[
            ToCancel,
            ToConfirm,
            ToCollectCreate,
            ToCollectUpdate,
            ToDelete,
            ToList,
            ToDetails,
            ToScans,
            ToShowMore,
            ToDepthMaps,
            ToStats,
            ToUnknown,
        ],
        HandleCancel => &[Done],
        CollectCreateFields => &[Prompted, ExecuteCreate],
        ExecuteCreatePatient => &[Done, ValidationFailed],
        CollectUpdateFields => &[Prompted, ExecuteUpdate],
        ExecuteUpdatePatient => &[Done, ValidationFailed],
        DeletePatient => &[NeedConfirmation, Done],
        ExecuteDeletePatient => &[Done],
        ListPatients => &[Done],
        GetPatientDetails => &[Done],
        GetScanResults => &[NeedConfirmation, Done],
        ShowMoreScans => &[NeedConfirmation, Done],
        ProvideStlLinks => &[Done],
        ProvideDepthMaps => &[Done],
        HandleConfirmation => &[AffirmDelete, AffirmStl, Declined, Unclear],
        ProvideAgentStats => &[Done],
        UnknownIntent => &[Done],
        SummarizeHistory => &[Summarized],
        FinalizeResponse => &[],
    }
}

/// The static edge table. Returns `None` for pairs outside the graph.
pub fn next_node(node: Node, token: RouteToken) -> Option<Node> {
    use Node::*;
    use RouteToken::*;
    let next = match (node, token) {
        (IngestUserMessage, Ingested) => ClassifyIntent,

        (ClassifyIntent, ToCancel) => HandleCancel,
        (ClassifyIntent, ToConfirm) => HandleConfirmation,
        (ClassifyIntent, ToCollectCreate) => CollectCreateFields,
        (ClassifyIntent, ToCollectUpdate) => CollectUpdateFields,
        (ClassifyIntent, ToDelete) => DeletePatient,
        (ClassifyIntent, ToList) => ListPatients,
        (ClassifyIntent, ToDetails) => GetPatientDetails,
        (ClassifyIntent, ToScans) => GetScanResults,
        (ClassifyIntent, ToShowMore) => ShowMoreScans,
        (ClassifyIntent, ToDepthMaps) => ProvideDepthMaps,
        (ClassifyIntent, ToStats) => ProvideAgentStats,
        (ClassifyIntent, ToUnknown) => UnknownIntent,

        (HandleCancel, Done) => SummarizeHistory,

        (CollectCreateFields, Prompted) => SummarizeHistory,
        (CollectCreateFields, ExecuteCreate) => ExecuteCreatePatient,
        (ExecuteCreatePatient, Done) => SummarizeHistory,
        (ExecuteCreatePatient, ValidationFailed) => CollectCreateFields,

        (CollectUpdateFields, Prompted) => SummarizeHistory,
        (CollectUpdateFields, ExecuteUpdate) => ExecuteUpdatePatient,
        (ExecuteUpdatePatient, Done) => SummarizeHistory,
        (ExecuteUpdatePatient, ValidationFailed) => CollectUpdateFields,

        (DeletePatient, NeedConfirmation) => SummarizeHistory,
        (DeletePatient, Done) => SummarizeHistory,
        (ExecuteDeletePatient, Done) => SummarizeHistory,

        (HandleConfirmation, AffirmDelete) => ExecuteDeletePatient,
        (HandleConfirmation, AffirmStl) => ProvideStlLinks,
        (HandleConfirmation, Declined) => SummarizeHistory,
        (HandleConfirmation, Unclear) => SummarizeHistory,

        (ListPatients, Done) => SummarizeHistory,
        (GetPatientDetails, Done) => SummarizeHistory,

        (GetScanResults, NeedConfirmation) => SummarizeHistory,
        (GetScanResults, Done) => SummarizeHistory,
        (ShowMoreScans, NeedConfirmation) => SummarizeHistory,
        (ShowMoreScans, Done) => SummarizeHistory,
        (ProvideStlLinks, Done) => SummarizeHistory,
        (ProvideDepthMaps, Done) => SummarizeHistory,

        (ProvideAgentStats, Done) => SummarizeHistory,
        (UnknownIntent, Done) => SummarizeHistory,

        (SummarizeHistory, Summarized) => FinalizeResponse,

        _ => return None,
    };
    Some(next)
}

/// Hard bound on steps per turn; the graph's only loops are the bounded
/// validation-reprompt edges, so any longer walk is a defect.
const MAX_STEPS: usize = 32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Walk the graph from ingest to the terminal node, mutating the turn
/// context. The caller runs the finalize node afterwards; every path,
/// including the failure ones, ends there.
pub async fn run_to_terminal(ctx: &mut TurnCtx<'_>) {
    let mut current = Node::IngestUserMessage;
    let mut steps = 0usize;

    while current != Node::FinalizeResponse {
        if ctx.cancel.is_cancelled() {
            ctx.cancelled = true;
            return;
        }
        steps += 1;
        if steps > MAX_STEPS {
            route_failure(ctx, current, None);
            return;
        }

        let token = nodes::run(current, ctx).await;

        if !allowed_tokens(current).contains(&token) {
            route_failure(ctx, current, Some(token));
            return;
        }
        match next_node(current, token) {
            Some(next) => {
                LogRecord::new(
                    LogCategory::Flow,
                    format!("{} -> {} via {}", current.name(), next.name(), token.name()),
                )
                .session(ctx.state.conversation_id.to_string())
                .node(current.name())
                .emit();
                current = next;
            }
            None => {
                route_failure(ctx, current, Some(token));
                return;
            }
        }
    }
}

/// Fail closed: log the violation, replace the reply with a safe
/// message, and let the caller finalize with an error envelope.
fn route_failure(ctx: &mut TurnCtx<'_>, node: Node, token: Option<RouteToken>) {
    ctx.routing_failure = true;
    ctx.replies.clear();
    ctx.replies
        .push("Something went wrong on our side — please try again.".to_owned());
    ctx.state.metrics_delta.failed_ops += 1;

    LogRecord::new(
        LogCategory::Error,
        match token {
            Some(t) => format!(
                "routing violation: node {} produced token {} with no edge",
                node.name(),
                t.name()
            ),
            None => format!("routing violation: step budget exhausted at {}", node.name()),
        },
    )
    .session(ctx.state.conversation_id.to_string())
    .node(node.name())
    .emit();
}
