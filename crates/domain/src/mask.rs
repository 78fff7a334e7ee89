//! PII masking.
//!
//! Every string that leaves the process (agent responses, log records,
//! exception messages surfaced to clients) passes through [`mask`].
//! National-id shaped substrings (`^[A-Z]\d{7}[A-Z]$`) are replaced by a
//! fixed-shape redaction keeping only the first and last character:
//! `S1234567A` → `S*******A`.

use std::sync::OnceLock;

use regex::Regex;

/// The national-id shape, anchored on word boundaries so ordinary words
/// and already-masked forms are left alone.
fn national_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][0-9]{7}[A-Z]\b").expect("static pattern"))
}

/// Replace every national-id occurrence with its redacted form.
///
/// Idempotent: the redacted form contains `*` in the digit positions and
/// therefore never re-matches the pattern.
pub fn mask(input: &str) -> String {
    national_id_re()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let m = caps.get(0).expect("whole match").as_str();
            let first = &m[..1];
            let last = &m[m.len() - 1..];
            format!("{first}*******{last}")
        })
        .into_owned()
}

/// True when the string still contains an unmasked national id.
/// Used by tests and by the log layer's fail-closed check.
pub fn contains_unmasked_id(input: &str) -> bool {
    national_id_re().is_match(input)
}

/// Redacted display form of a single national id, without scanning.
pub fn redact_id(id: &str) -> String {
    mask(id)
}

/// Full-match validation of a candidate national id.
pub fn is_national_id(candidate: &str) -> bool {
    fn full_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"^[A-Z][0-9]{7}[A-Z]$").expect("static pattern"))
    }
    full_re().is_match(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_single_id() {
        assert_eq!(mask("S1234567A"), "S*******A");
    }

    #[test]
    fn masks_ids_embedded_in_text() {
        let out = mask("create patient Jane Tan NRIC S1234567A today");
        assert_eq!(out, "create patient Jane Tan NRIC S*******A today");
    }

    #[test]
    fn masks_multiple_ids() {
        let out = mask("S1234567A and T7654321Z");
        assert_eq!(out, "S*******A and T*******Z");
    }

    #[test]
    fn masking_is_idempotent() {
        let once = mask("patient G0000001X checked in");
        assert_eq!(mask(&once), once);
    }

    #[test]
    fn leaves_non_matching_text_alone() {
        let input = "ABCDEFGHI, 12345678, S123A, and plain words";
        assert_eq!(mask(input), input);
    }

    #[test]
    fn word_boundaries_respected() {
        // Part of a longer alphanumeric run: not an id on its own.
        let input = "XS1234567AB";
        assert_eq!(mask(input), input);
    }

    #[test]
    fn validates_full_ids_only() {
        assert!(is_national_id("S1234567A"));
        assert!(!is_national_id("S1234567"));
        assert!(!is_national_id("s1234567a"));
        assert!(!is_national_id("NRIC S1234567A"));
    }

    #[test]
    fn detector_agrees_with_masker() {
        assert!(contains_unmasked_id("id S1234567A"));
        assert!(!contains_unmasked_id(&mask("id S1234567A")));
        assert!(!contains_unmasked_id("S*******A"));
    }
}
