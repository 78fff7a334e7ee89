//! OpenAI-compatible adapter.
//!
//! Works with any endpoint following the OpenAI chat completions
//! contract. Classification requests use JSON mode and a prompt that
//! enumerates the closed intent set; reported token usage is folded into
//! the metrics registry together with an estimated cost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use hc_domain::config::Config;
use hc_domain::intent::Intent;
use hc_domain::metrics::Metrics;
use hc_domain::types::{MessageRole, TurnMessage};
use hc_domain::{Error, Result};

use crate::adapter::{IntentClassification, LlmAdapter};

/// Approximate chars-per-token multiplier for local estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Cost rates in micro-dollars per 1000 tokens, small-model pricing.
const PROMPT_MICROS_PER_1K: u64 = 150;
const COMPLETION_MICROS_PER_1K: u64 = 600;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ClassifyBody {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    metrics: Arc<Metrics>,
}

impl OpenAiCompatAdapter {
    pub fn new(cfg: &Config, metrics: Arc<Metrics>) -> Result<Self> {
        let api_key = cfg
            .llm_api_key
            .clone()
            .ok_or_else(|| Error::Config("LLM adapter requires LLM_API_KEY".into()))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.llm_base_url.trim_end_matches('/').to_owned(),
            api_key,
            model: cfg.llm_model.clone(),
            metrics,
        })
    }

    async fn chat(&self, body: serde_json::Value) -> Result<ChatCompletion> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(Error::Llm(format!("provider returned {status}")));
        }
        resp.json::<ChatCompletion>()
            .await
            .map_err(|e| Error::Llm(format!("malformed completion: {e}")))
    }

    fn record_usage(&self, ok: bool, usage: Option<&Usage>) {
        let (prompt, completion) = usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        let cost = prompt * PROMPT_MICROS_PER_1K / 1000
            + completion * COMPLETION_MICROS_PER_1K / 1000;
        self.metrics.record_llm_call(ok, prompt, completion, cost);
    }

    fn classify_prompt(message: &str, context: &[TurnMessage]) -> String {
        let labels = Intent::NAMES.join(", ");
        let mut prompt = format!(
            "Classify the final user message into exactly one of these intents: \
             {labels}.\nRespond with JSON of shape \
             {{\"intent\": \"<label>\", \"confidence\": <0..1>, \"reason\": \"<short>\"}}.\n"
        );
        if !context.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for m in context {
                let role = match m.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                };
                prompt.push_str(&format!("{role}: {}\n", m.text));
            }
        }
        prompt.push_str(&format!("Final user message: {message}"));
        prompt
    }
}

#[async_trait]
impl LlmAdapter for OpenAiCompatAdapter {
    async fn classify_intent(
        &self,
        message: &str,
        context: &[TurnMessage],
    ) -> Result<IntentClassification> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": Self::classify_prompt(message, context)}
            ],
            "temperature": 0.0,
            "response_format": {"type": "json_object"},
        });

        let completion = match self.chat(body).await {
            Ok(c) => c,
            Err(e) => {
                self.record_usage(false, None);
                return Err(e);
            }
        };
        self.record_usage(true, completion.usage.as_ref());

        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();
        Ok(parse_classification(content))
    }

    async fn summarize(&self, messages: &[TurnMessage]) -> Result<String> {
        let transcript = crate::adapter::truncation_summary(messages);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": format!(
                    "Summarize this clinician/assistant exchange in at most two \
                     sentences, keeping patient names and open requests:\n{transcript}"
                )}
            ],
            "temperature": 0.0,
        });

        let completion = match self.chat(body).await {
            Ok(c) => c,
            Err(e) => {
                self.record_usage(false, None);
                return Err(e);
            }
        };
        self.record_usage(true, completion.usage.as_ref());

        let text = completion
            .choices
            .first()
            .map(|c| c.message.content.trim().to_owned())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(Error::Llm("empty summary".into()));
        }
        Ok(text)
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

/// Validate a JSON classification against the closed intent set.
/// Invalid or missing labels degrade to Unknown, never to a guess.
fn parse_classification(content: &str) -> IntentClassification {
    let body: ClassifyBody = match serde_json::from_str(content) {
        Ok(b) => b,
        Err(_) => {
            return IntentClassification {
                intent: Intent::Unknown,
                confidence: 0.0,
                reason: "unparseable classifier response".into(),
            }
        }
    };

    let intent = body
        .intent
        .as_deref()
        .and_then(Intent::from_name)
        .unwrap_or(Intent::Unknown);

    IntentClassification {
        intent,
        confidence: body.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        reason: body.reason.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_classification() {
        let c = parse_classification(
            r#"{"intent": "CreatePatient", "confidence": 0.92, "reason": "asks to add"}"#,
        );
        assert_eq!(c.intent, Intent::CreatePatient);
        assert!((c.confidence - 0.92).abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_label_degrades_to_unknown() {
        let c = parse_classification(r#"{"intent": "OrderLunch", "confidence": 0.9}"#);
        assert_eq!(c.intent, Intent::Unknown);
    }

    #[test]
    fn garbage_degrades_to_unknown() {
        let c = parse_classification("not json at all");
        assert_eq!(c.intent, Intent::Unknown);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn confidence_is_clamped() {
        let c = parse_classification(r#"{"intent": "Cancel", "confidence": 7.5}"#);
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn prompt_lists_every_label() {
        let prompt = OpenAiCompatAdapter::classify_prompt("hello", &[]);
        for name in Intent::NAMES {
            assert!(prompt.contains(name), "missing label {name}");
        }
    }
}
