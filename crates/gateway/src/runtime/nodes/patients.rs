//! Read paths over patients: listing (off the cache snapshot) and
//! single-patient details with name disambiguation.

use hc_domain::intent::Intent;
use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::mask;

use super::super::graph::RouteToken;
use super::super::TurnCtx;
use super::{patient_line, resolve_target, Resolved};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_patients
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn list(ctx: &mut TurnCtx<'_>) -> RouteToken {
    let all = ctx.deps.cache.all_patients().await;
    if all.is_empty() {
        ctx.reply("There are no patients on file yet.");
        return RouteToken::Done;
    }

    let page_size = ctx.state.scan_page_size;
    let shown: Vec<String> = all
        .iter()
        .take(page_size)
        .enumerate()
        .map(|(i, p)| format!("{}. {}", i + 1, patient_line(p)))
        .collect();

    let mut text = format!("{} patient(s) on file:\n{}", all.len(), shown.join("\n"));
    if all.len() > page_size {
        text.push_str(&format!(
            "\n…and {} more. Ask for a patient by name or ID for details.",
            all.len() - page_size
        ));
    }
    ctx.reply(text);
    RouteToken::Done
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_patient_details
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(super) async fn details(ctx: &mut TurnCtx<'_>) -> RouteToken {
    ctx.state.intent = Intent::GetPatientDetails;

    match resolve_target(ctx).await {
        Resolved::One(p) => {
            ctx.state.selected_patient_id = Some(p.id);

            let mut lines = vec![
                format!("{} — id {}", p.full_name(), p.id),
                format!("national ID: {}", mask::redact_id(&p.national_id)),
            ];
            if let Some(contact) = &p.contact {
                lines.push(format!("contact: {contact}"));
            }
            if let Some(dob) = &p.date_of_birth {
                lines.push(format!("date of birth: {dob}"));
            }
            if let Some(details) = &p.details {
                lines.push(format!("details: {details}"));
            }
            lines.push("You can ask for scan results, update, or delete.".to_owned());
            ctx.reply(lines.join("\n"));
            RouteToken::Done
        }
        Resolved::Ambiguous(candidates) => {
            // Keep the intent so a bare id selection on the next turn
            // routes straight back here.
            let lines: Vec<String> = candidates
                .iter()
                .map(|p| format!("- {}", patient_line(p)))
                .collect();

            LogRecord::new(
                LogCategory::Flow,
                format!("ambiguous name, {} candidates", candidates.len()),
            )
            .session(ctx.state.conversation_id.to_string())
            .node("get_patient_details")
            .emit();

            ctx.reply(format!(
                "I found more than one match:\n{}\nWhich patient ID did you mean?",
                lines.join("\n")
            ));
            RouteToken::Done
        }
        Resolved::NotFound { asked_for } => {
            let known = ctx.deps.cache.sample_names(3).await;
            let hint = if known.is_empty() {
                " There are no patients on file yet.".to_owned()
            } else {
                format!(
                    " Patients on file include: {}. You can also use a patient ID.",
                    known.join(", ")
                )
            };
            ctx.reply(format!("I couldn't find {asked_for}.{hint}"));
            RouteToken::Done
        }
        Resolved::Unspecified => {
            ctx.reply("Whose details would you like? Give me a name or a patient ID.");
            RouteToken::Done
        }
    }
}
