//! Scan retrieval and the two-stage STL flow.
//!
//! Stage one returns preview metadata only and arms an STL confirmation
//! for the visible page; STL URLs are emitted exclusively by
//! `provide_stl_links` after an affirmative answer, and only for the
//! page the user is looking at.

use hc_domain::intent::{ConfirmationKind, DownloadStage, Intent, PendingAction};
use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::types::{ScanRecord, ToolResult};

use super::super::graph::RouteToken;
use super::super::TurnCtx;
use super::{resolve_target, tool_failure_reply, Resolved};

fn preview_line(scan: &ScanRecord) -> String {
    let mut line = format!(
        "- scan {} ({}): preview {}",
        scan.id,
        scan.created_at.format("%Y-%m-%d"),
        scan.preview_image_url
    );
    if let Some(v) = scan.volume_estimate {
        line.push_str(&format!(", est. volume {v:.1}"));
    }
    line
}

/// Arm the STL gate for the currently visible page.
fn arm_stl_gate(ctx: &mut TurnCtx<'_>) {
    ctx.state.confirmation_required = true;
    ctx.state.confirmation_kind = ConfirmationKind::StlDownload;
    ctx.state.pending_action = PendingAction::AwaitingStlConfirmation;
    ctx.state.download_stage = DownloadStage::PreviewShown;
    ctx.state.clarification_count = 0;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_scan_results (stage one)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn fetch(ctx: &mut TurnCtx<'_>) -> RouteToken {
    ctx.state.intent = Intent::GetScanResults;

    let patient = match resolve_target(ctx).await {
        Resolved::One(p) => p,
        Resolved::Ambiguous(candidates) => {
            let lines: Vec<String> = candidates
                .iter()
                .map(|p| format!("- {}", super::patient_line(p)))
                .collect();
            ctx.reply(format!(
                "More than one patient matches:\n{}\nWhose scans did you mean? Give me the patient ID.",
                lines.join("\n")
            ));
            return RouteToken::Done;
        }
        Resolved::NotFound { asked_for } => {
            ctx.reply(format!("I couldn't find {asked_for}, so I can't fetch scans."));
            return RouteToken::Done;
        }
        Resolved::Unspecified => {
            ctx.reply("Whose scans would you like? Give me a name or a patient ID.");
            return RouteToken::Done;
        }
    };

    match ctx.deps.backend.list_scans(Some(patient.id), None).await {
        ToolResult::Ok(scans) => {
            if scans.is_empty() {
                ctx.reply(format!("{} has no scans on file.", patient.full_name()));
                return RouteToken::Done;
            }

            let total = scans.len();
            let page = ctx.state.scan_page_size.min(total);
            ctx.state.scan_buffer = scans;
            ctx.state.scan_offset = page;
            ctx.state.selected_patient_id = Some(patient.id);
            arm_stl_gate(ctx);

            LogRecord::new(
                LogCategory::Success,
                format!("fetched {total} scan(s), showing {page}"),
            )
            .session(ctx.state.conversation_id.to_string())
            .node("get_scan_results")
            .emit();

            let lines: Vec<String> = ctx.state.scan_buffer[..page]
                .iter()
                .map(preview_line)
                .collect();
            let mut text = format!(
                "{} scan(s) for {}:\n{}",
                total,
                patient.full_name(),
                lines.join("\n")
            );
            if total > page {
                text.push_str(&format!(
                    "\nSay \"show more\" for the remaining {}.",
                    total - page
                ));
            }
            text.push_str(
                "\nWould you like the STL download links for these? (yes/no)",
            );
            ctx.reply(text);
            RouteToken::NeedConfirmation
        }
        failure => {
            LogRecord::new(LogCategory::Error, "list_scans failed")
                .session(ctx.state.conversation_id.to_string())
                .node("get_scan_results")
                .extra(serde_json::json!({ "outcome": format!("{failure:?}") }))
                .emit();
            tool_failure_reply(ctx, "fetch the scans", &failure);
            RouteToken::Done
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// show_more_scans
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) fn show_more(ctx: &mut TurnCtx<'_>) -> RouteToken {
    if ctx.state.scan_buffer.is_empty() {
        ctx.reply("There's no scan list open — ask for scan results first.");
        return RouteToken::Done;
    }

    let total = ctx.state.scan_buffer.len();
    let start = ctx.state.scan_offset.min(total);
    let end = (start + ctx.state.scan_page_size).min(total);
    if start >= end {
        ctx.reply("That's the end of the list — no more scans.");
        return RouteToken::Done;
    }

    // Advancing the page starts a fresh STL batch: the previous page's
    // confirmation no longer applies.
    ctx.state.scan_offset = end;
    arm_stl_gate(ctx);

    let lines: Vec<String> = ctx.state.scan_buffer[start..end]
        .iter()
        .map(preview_line)
        .collect();
    let mut text = format!(
        "Scans {}-{} of {}:\n{}",
        start + 1,
        end,
        total,
        lines.join("\n")
    );
    if end < total {
        text.push_str(&format!("\nSay \"show more\" for the remaining {}.", total - end));
    } else {
        text.push_str("\nThat's the end of the list.");
    }
    text.push_str("\nWould you like the STL download links for these? (yes/no)");
    ctx.reply(text);
    RouteToken::NeedConfirmation
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// provide_stl_links (stage two)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) fn stl_links(ctx: &mut TurnCtx<'_>) -> RouteToken {
    // Reachable only through the affirmative STL edge; verify the state
    // agrees before spending the gate.
    if !ctx.state.confirmation_required
        || ctx.state.confirmation_kind != ConfirmationKind::StlDownload
    {
        LogRecord::new(
            LogCategory::Error,
            "provide_stl_links reached without an armed STL gate",
        )
        .session(ctx.state.conversation_id.to_string())
        .node("provide_stl_links")
        .emit();
        ctx.state.metrics_delta.failed_ops += 1;
        ctx.reply("I lost track of the STL confirmation — fetch the scans again.");
        return RouteToken::Done;
    }

    ctx.state.confirmation_required = false;
    ctx.state.confirmation_kind = ConfirmationKind::None;
    ctx.state.pending_action = PendingAction::None;
    ctx.state.clarification_count = 0;
    ctx.state.download_stage = DownloadStage::StlLinksSent;

    let (start, end) = ctx.state.visible_scan_page();
    let links: Vec<String> = ctx.state.scan_buffer[start..end]
        .iter()
        .filter_map(|s| {
            s.stl_file_url
                .as_ref()
                .map(|url| format!("- scan {}: {}", s.id, url))
        })
        .collect();

    if links.is_empty() {
        ctx.reply("None of the scans on this page have an STL file attached.");
        return RouteToken::Done;
    }

    LogRecord::new(
        LogCategory::Success,
        format!("sent {} STL link(s) for scans {}-{}", links.len(), start + 1, end),
    )
    .session(ctx.state.conversation_id.to_string())
    .node("provide_stl_links")
    .emit();

    ctx.reply(format!(
        "STL downloads for the current page:\n{}",
        links.join("\n")
    ));
    RouteToken::Done
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// provide_depth_maps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) fn depth_maps(ctx: &mut TurnCtx<'_>) -> RouteToken {
    if ctx.state.scan_buffer.is_empty() {
        ctx.reply("There's no scan list open — ask for scan results first.");
        return RouteToken::Done;
    }

    let (start, end) = ctx.state.visible_scan_page();
    let mut lines = Vec::new();
    for scan in &ctx.state.scan_buffer[start..end] {
        match (&scan.depth_map_8bit_url, &scan.depth_map_16bit_url) {
            (None, None) => {}
            (eight, sixteen) => {
                let mut parts = Vec::new();
                if let Some(url) = eight {
                    parts.push(format!("8-bit {url}"));
                }
                if let Some(url) = sixteen {
                    parts.push(format!("16-bit {url}"));
                }
                lines.push(format!("- scan {}: {}", scan.id, parts.join(", ")));
            }
        }
    }

    if lines.is_empty() {
        ctx.reply("No depth maps are available for the scans on this page.");
    } else {
        ctx.reply(format!(
            "Depth maps for the current page:\n{}",
            lines.join("\n")
        ));
    }
    RouteToken::Done
}
