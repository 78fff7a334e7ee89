//! The confirmation gate shared by the delete flow and the two-stage
//! STL download flow.

use std::sync::OnceLock;

use regex::Regex;

use hc_domain::intent::{ConfirmationKind, DownloadStage, PendingAction};
use hc_domain::log::{LogCategory, LogRecord};

use super::super::graph::RouteToken;
use super::super::TurnCtx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Affirmative,
    Negative,
    Ambiguous,
}

fn affirmative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(yes|y|yeah|yep|yup|confirm|confirmed|sure|ok|okay|affirmative|go\s+ahead|proceed|do\s+it)\b",
        )
        .expect("static pattern")
    })
}

fn negative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(no|n|nope|nah|negative|don'?t|stop|skip|hold\s+off)\b")
            .expect("static pattern")
    })
}

fn parse_answer(message: &str) -> Answer {
    let affirmed = affirmative_re().is_match(message);
    let denied = negative_re().is_match(message);
    match (affirmed, denied) {
        (true, false) => Answer::Affirmative,
        (false, true) => Answer::Negative,
        _ => Answer::Ambiguous,
    }
}

pub(super) fn handle(ctx: &mut TurnCtx<'_>) -> RouteToken {
    let kind = ctx.state.confirmation_kind;
    let answer = parse_answer(&ctx.message);

    LogRecord::new(
        LogCategory::Flow,
        format!("confirmation answer parsed as {answer:?}"),
    )
    .session(ctx.state.conversation_id.to_string())
    .node("handle_confirmation")
    .emit();

    match (answer, kind) {
        (Answer::Affirmative, ConfirmationKind::Delete) => RouteToken::AffirmDelete,
        (Answer::Affirmative, ConfirmationKind::StlDownload) => RouteToken::AffirmStl,
        (Answer::Affirmative, ConfirmationKind::None) => {
            // A required confirmation with no kind is state damage;
            // repair by dropping the gate rather than executing anything.
            LogRecord::new(
                LogCategory::Error,
                "confirmation gate armed without a kind; clearing",
            )
            .session(ctx.state.conversation_id.to_string())
            .node("handle_confirmation")
            .emit();
            clear_gate(ctx);
            ctx.reply("I lost track of what needed confirming — please repeat the request.");
            RouteToken::Declined
        }
        (Answer::Negative, _) => {
            let text = match kind {
                ConfirmationKind::Delete => {
                    "Okay — I won't delete anything. The record is untouched."
                }
                ConfirmationKind::StlDownload => {
                    "Okay — previews only. Say \"yes\" later if you want the STL files."
                }
                ConfirmationKind::None => "Okay.",
            };
            clear_gate(ctx);
            if kind == ConfirmationKind::StlDownload {
                ctx.state.download_stage = DownloadStage::PreviewShown;
            }
            ctx.reply(text);
            RouteToken::Declined
        }
        (Answer::Ambiguous, _) => {
            if ctx.state.clarification_count < 1 {
                ctx.state.clarification_count += 1;
                if kind == ConfirmationKind::StlDownload {
                    ctx.state.download_stage = DownloadStage::AwaitingStlConfirm;
                }
                let what = match kind {
                    ConfirmationKind::Delete => "delete this patient",
                    ConfirmationKind::StlDownload => "send the STL download links",
                    ConfirmationKind::None => "proceed",
                };
                ctx.reply(format!(
                    "I need a clear yes or no: should I {what}?"
                ));
            } else {
                ctx.reply(
                    "Still not sure what you'd like. Reply \"yes\" to proceed, \
                     \"no\" to keep things as they are, or \"cancel\" to drop it.",
                );
            }
            RouteToken::Unclear
        }
    }
}

/// Drop the confirmation obligation, leaving the rest of the session
/// intact.
fn clear_gate(ctx: &mut TurnCtx<'_>) {
    ctx.state.confirmation_required = false;
    ctx.state.confirmation_kind = ConfirmationKind::None;
    ctx.state.pending_action = PendingAction::None;
    ctx.state.clarification_count = 0;
}
