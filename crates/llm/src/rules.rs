//! Deterministic classification rules and slot extraction.
//!
//! Pattern ordering is part of the contract: the first matching pattern
//! wins, so specific phrasings ("show more", "depth maps") are listed
//! before the generic verbs that would otherwise swallow them. Slot
//! patterns fire independently of the chosen intent; consumers ignore
//! slots they have no use for.

use std::sync::OnceLock;

use regex::Regex;

use hc_domain::intent::Intent;
use hc_domain::types::{Slot, SlotMap};

/// Messages longer than this are truncated before any processing.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent patterns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn intent_patterns() -> &'static [(Intent, Regex)] {
    static PATTERNS: OnceLock<Vec<(Intent, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).expect("static pattern");
        vec![
            // Cancellation beats everything.
            (
                Intent::Cancel,
                compile(r"(?i)\b(cancel|abort|never\s*mind|nevermind|forget\s+it|start\s+over)\b"),
            ),
            // Specific multi-word phrasings before the generic verbs.
            (
                Intent::ShowMoreScans,
                compile(r"(?i)\b(show|load|see|view)\s+more\b|\bmore\s+scans\b|\bnext\s+page\b"),
            ),
            (
                Intent::ProvideDepthMaps,
                compile(r"(?i)\bdepth\s*maps?\b"),
            ),
            (
                Intent::ProvideAgentStats,
                compile(r"(?i)\b(stats|statistics|metrics)\b"),
            ),
            // Write verbs.
            (
                Intent::CreatePatient,
                compile(r"(?i)\b(create|add|register|enroll)\b|\bnew\s+patient\b"),
            ),
            (
                Intent::UpdatePatient,
                compile(r"(?i)\b(update|edit|modify|amend|change)\b"),
            ),
            (
                Intent::DeletePatient,
                compile(r"(?i)\b(delete|remove|erase)\b"),
            ),
            // Retrieval.
            (
                Intent::GetScanResults,
                compile(r"(?i)\bscans?\b"),
            ),
            (
                Intent::ListPatients,
                compile(r"(?i)\b(list|show|all)\s+(all\s+)?patients\b|\blist\b"),
            ),
            (
                Intent::GetPatientDetails,
                compile(r"(?i)\b(show|get|details?|info|find|lookup|who\s+is)\b"),
            ),
        ]
    })
}

/// Classify a message against the pattern list; first match wins.
pub fn classify_rules(message: &str) -> Intent {
    for (intent, pattern) in intent_patterns() {
        if pattern.is_match(message) {
            return *intent;
        }
    }
    Intent::Unknown
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SlotPatterns {
    national_id: Regex,
    patient_id: Regex,
    bare_number: Regex,
    date: Regex,
    contact: Regex,
    first_name: Regex,
    last_name: Regex,
    name_pair: Regex,
}

fn slot_patterns() -> &'static SlotPatterns {
    static PATTERNS: OnceLock<SlotPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).expect("static pattern");
        SlotPatterns {
            national_id: compile(r"\b[A-Z][0-9]{7}[A-Z]\b"),
            patient_id: compile(r"(?i)\b(?:patient|id)\s+(?:id\s+)?#?([0-9]+)\b"),
            bare_number: compile(r"^\s*#?([0-9]+)\s*$"),
            date: compile(r"\b([0-9]{4}-[0-9]{2}-[0-9]{2})\b"),
            contact: compile(
                r"(?i)\b(?:contact|phone|mobile|tel)(?:\s+number)?\s*(?:is|:)?\s*(\+?[0-9][0-9 \-]{4,20}[0-9])",
            ),
            first_name: compile(r"(?i)\bfirst\s+name\s*(?:is|:)?\s*([A-Za-z'\-]+)"),
            last_name: compile(r"(?i)\blast\s+name\s*(?:is|:)?\s*([A-Za-z'\-]+)"),
            name_pair: compile(
                r"(?i)\b(?:patient|show|find|named|called|for|delete|update|about)\s+([A-Za-z'\-]+)\s+([A-Za-z'\-]+)\b",
            ),
        }
    })
}

/// Tokens that disqualify a name-pair capture: verbs and domain nouns
/// that sit where a name would.
const NAME_STOPWORDS: &[&str] = &[
    "patient", "patients", "all", "more", "scan", "scans", "results", "result",
    "nric", "id", "the", "a", "an", "details", "info", "named", "called",
    "record", "records", "depth", "maps", "map", "for", "with", "contact",
    "name", "number", "stats",
];

fn is_name_token(token: &str) -> bool {
    !NAME_STOPWORDS.contains(&token.to_lowercase().as_str())
        && token.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-')
}

/// Pull every recognizable slot value out of a message. Multiple slots
/// may fire; none is mandatory.
pub fn extract_slots(message: &str) -> SlotMap {
    let p = slot_patterns();
    let mut slots = SlotMap::new();

    if let Some(m) = p.national_id.find(message) {
        slots.insert(Slot::NationalId, m.as_str().to_owned());
    }
    if let Some(c) = p.patient_id.captures(message) {
        slots.insert(Slot::PatientId, c[1].to_owned());
    } else if let Some(c) = p.bare_number.captures(message) {
        slots.insert(Slot::PatientId, c[1].to_owned());
    }
    if let Some(c) = p.date.captures(message) {
        slots.insert(Slot::DateOfBirth, c[1].to_owned());
    }
    if let Some(c) = p.contact.captures(message) {
        slots.insert(Slot::Contact, c[1].trim().to_owned());
    }
    if let Some(c) = p.first_name.captures(message) {
        slots.insert(Slot::FirstName, c[1].to_owned());
    }
    if let Some(c) = p.last_name.captures(message) {
        slots.insert(Slot::LastName, c[1].to_owned());
    }

    // A keyword-anchored "First Last" pair fills both name slots, but
    // never overrides explicit first/last captures.
    if !slots.contains_key(&Slot::FirstName) || !slots.contains_key(&Slot::LastName) {
        if let Some(c) = p.name_pair.captures(message) {
            let (first, last) = (c[1].to_owned(), c[2].to_owned());
            if is_name_token(&first) && is_name_token(&last) {
                slots.entry(Slot::FirstName).or_insert(first);
                slots.entry(Slot::LastName).or_insert(last);
            }
        }
    }

    slots
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Size cap and injection hygiene
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cap a message at [`MAX_MESSAGE_CHARS`] characters.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_owned();
    }
    message.chars().take(MAX_MESSAGE_CHARS).collect()
}

fn injection_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)ignore\s+(?:all\s+)?previous").expect("static pattern"),
            Regex::new(r"```").expect("static pattern"),
            Regex::new(r"(?im)^\s*(?:system|assistant|user)\s*:").expect("static pattern"),
        ]
    })
}

/// True when the message carries prompt-injection markers. Such messages
/// are still processed by the rules; only the LLM adapter sees a
/// sanitized variant.
pub fn injection_suspect(message: &str) -> bool {
    injection_patterns().iter().any(|p| p.is_match(message))
}

/// Strip injection markers before the text reaches the LLM adapter.
pub fn sanitize_for_llm(message: &str) -> String {
    let mut out = message.to_owned();
    for pattern in injection_patterns() {
        out = pattern.replace_all(&out, " ").into_owned();
    }
    out
}
