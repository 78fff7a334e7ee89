//! The external-LLM seam.
//!
//! HydroChat only uses an LLM for two things, both optional: fallback
//! intent classification when the rules come up Unknown, and history
//! summarization. Implementations report provider token usage into the
//! metrics registry.

use async_trait::async_trait;

use hc_domain::intent::Intent;
use hc_domain::types::TurnMessage;
use hc_domain::Result;

/// Result of a fallback classification.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f32,
    pub reason: String,
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Classify a (sanitized) user message against the closed intent set.
    async fn classify_intent(
        &self,
        message: &str,
        context: &[TurnMessage],
    ) -> Result<IntentClassification>;

    /// Compress a message window into a short prose summary.
    async fn summarize(&self, messages: &[TurnMessage]) -> Result<String>;

    /// Token estimate for budgeting; does not call the provider.
    fn count_tokens(&self, text: &str) -> usize;
}

/// Deterministic summary used whenever no adapter is configured or the
/// adapter call fails: the window itself, clipped per turn.
pub fn truncation_summary(messages: &[TurnMessage]) -> String {
    const PER_TURN_CHARS: usize = 120;
    messages
        .iter()
        .map(|m| {
            let text: String = m.text.chars().take(PER_TURN_CHARS).collect();
            let role = match m.role {
                hc_domain::types::MessageRole::User => "user",
                hc_domain::types::MessageRole::Assistant => "assistant",
            };
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_summary_clips_each_turn() {
        let messages = vec![
            TurnMessage::user("a".repeat(500)),
            TurnMessage::assistant("short"),
        ];
        let summary = truncation_summary(&messages);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].len() <= "user: ".len() + 120);
        assert_eq!(lines[1], "assistant: short");
    }
}
