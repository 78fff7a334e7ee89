//! Process configuration.
//!
//! [`Config::from_env`] reads every recognized environment variable
//! exactly once, validates, and returns a typed value consumed by all
//! components. No other module reads the environment.

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enumerated options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Human,
    Json,
}

/// Which external LLM adapter to wire in, if any. `None` disables the
/// classification fallback and LLM summarization gracefully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmAdapterKind {
    None,
    Openai,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct Config {
    // ── Inbound server ────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    /// Bearer token required on inbound endpoints. `None` = dev mode
    /// (no auth enforced, logged once at startup).
    pub api_token: Option<String>,

    // ── Backend REST ──────────────────────────────────────────────────
    pub backend_base_url: String,
    /// Secret; injected as `Authorization: Bearer`, never logged.
    pub backend_bearer_token: Option<String>,

    // ── Sessions ──────────────────────────────────────────────────────
    pub session_ttl: Duration,
    pub session_max: usize,

    // ── Name cache ────────────────────────────────────────────────────
    pub name_cache_ttl: Duration,

    // ── Turn execution ────────────────────────────────────────────────
    pub turn_deadline: Duration,

    // ── LLM adapter ───────────────────────────────────────────────────
    pub llm_adapter: LlmAdapterKind,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,

    // ── Metrics ───────────────────────────────────────────────────────
    pub metrics_max_samples: usize,
    pub metrics_ttl: Duration,

    // ── Logging / masking ─────────────────────────────────────────────
    pub log_format: LogFormat,
    pub mask_pii: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            api_token: None,
            backend_base_url: "http://127.0.0.1:8000".into(),
            backend_bearer_token: None,
            session_ttl: Duration::from_secs(1800),
            session_max: 100,
            name_cache_ttl: Duration::from_secs(300),
            turn_deadline: Duration::from_millis(15_000),
            llm_adapter: LlmAdapterKind::None,
            llm_api_key: None,
            llm_base_url: "https://api.openai.com/v1".into(),
            llm_model: "gpt-4o-mini".into(),
            metrics_max_samples: 1000,
            metrics_ttl: Duration::from_secs(24 * 3600),
            log_format: LogFormat::Human,
            mask_pii: true,
        }
    }
}

impl Config {
    /// Read and validate the full configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();

        if let Some(v) = read("HYDROCHAT_HOST") {
            cfg.host = v;
        }
        if let Some(v) = read("HYDROCHAT_PORT") {
            cfg.port = parse_num(&v, "HYDROCHAT_PORT")?;
        }
        cfg.api_token = read("HYDROCHAT_API_TOKEN");

        if let Some(v) = read("BACKEND_BASE_URL") {
            cfg.backend_base_url = v.trim_end_matches('/').to_owned();
        }
        if cfg.backend_base_url.is_empty() {
            return Err(Error::Config("BACKEND_BASE_URL must not be empty".into()));
        }
        cfg.backend_bearer_token = read("BACKEND_BEARER_TOKEN");

        if let Some(v) = read("SESSION_TTL_SECONDS") {
            cfg.session_ttl = Duration::from_secs(parse_num(&v, "SESSION_TTL_SECONDS")?);
        }
        if let Some(v) = read("SESSION_MAX") {
            cfg.session_max = parse_num(&v, "SESSION_MAX")?;
            if cfg.session_max == 0 {
                return Err(Error::Config("SESSION_MAX must be at least 1".into()));
            }
        }
        if let Some(v) = read("NAME_CACHE_TTL_SECONDS") {
            cfg.name_cache_ttl =
                Duration::from_secs(parse_num(&v, "NAME_CACHE_TTL_SECONDS")?);
        }
        if let Some(v) = read("TURN_DEADLINE_MS") {
            cfg.turn_deadline = Duration::from_millis(parse_num(&v, "TURN_DEADLINE_MS")?);
        }

        if let Some(v) = read("LLM_ADAPTER") {
            cfg.llm_adapter = match v.to_lowercase().as_str() {
                "none" => LlmAdapterKind::None,
                "openai" => LlmAdapterKind::Openai,
                other => {
                    return Err(Error::Config(format!(
                        "LLM_ADAPTER must be `none` or `openai`, got `{other}`"
                    )))
                }
            };
        }
        cfg.llm_api_key = read("LLM_API_KEY");
        if let Some(v) = read("LLM_BASE_URL") {
            cfg.llm_base_url = v.trim_end_matches('/').to_owned();
        }
        if let Some(v) = read("LLM_MODEL") {
            cfg.llm_model = v;
        }
        if cfg.llm_adapter == LlmAdapterKind::Openai && cfg.llm_api_key.is_none() {
            return Err(Error::Config(
                "LLM_ADAPTER=openai requires LLM_API_KEY".into(),
            ));
        }

        if let Some(v) = read("METRICS_MAX_SAMPLES") {
            cfg.metrics_max_samples = parse_num(&v, "METRICS_MAX_SAMPLES")?;
        }
        if let Some(v) = read("METRICS_TTL_HOURS") {
            let hours: u64 = parse_num(&v, "METRICS_TTL_HOURS")?;
            cfg.metrics_ttl = Duration::from_secs(hours * 3600);
        }

        if let Some(v) = read("LOG_FORMAT") {
            cfg.log_format = match v.to_lowercase().as_str() {
                "human" => LogFormat::Human,
                "json" => LogFormat::Json,
                other => {
                    return Err(Error::Config(format!(
                        "LOG_FORMAT must be `human` or `json`, got `{other}`"
                    )))
                }
            };
        }

        if let Some(v) = read("MASK_PII") {
            let enabled = parse_bool(&v, "MASK_PII")?;
            // Disabling the masker is a test-build affordance only.
            if !enabled && !cfg!(debug_assertions) {
                return Err(Error::Config(
                    "MASK_PII=false is only permitted in test builds".into(),
                ));
            }
            cfg.mask_pii = enabled;
        }

        Ok(cfg)
    }

    /// Effective values with secrets redacted, for `check-config` and the
    /// startup banner.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "host": self.host,
            "port": self.port,
            "api_token": self.api_token.as_deref().map(|_| "<set>"),
            "backend_base_url": self.backend_base_url,
            "backend_bearer_token": self.backend_bearer_token.as_deref().map(|_| "<set>"),
            "session_ttl_seconds": self.session_ttl.as_secs(),
            "session_max": self.session_max,
            "name_cache_ttl_seconds": self.name_cache_ttl.as_secs(),
            "turn_deadline_ms": self.turn_deadline.as_millis() as u64,
            "llm_adapter": self.llm_adapter,
            "llm_api_key": self.llm_api_key.as_deref().map(|_| "<set>"),
            "llm_base_url": self.llm_base_url,
            "llm_model": self.llm_model,
            "metrics_max_samples": self.metrics_max_samples,
            "metrics_ttl_hours": self.metrics_ttl.as_secs() / 3600,
            "log_format": self.log_format,
            "mask_pii": self.mask_pii,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Env helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn read(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_owned()),
        _ => None,
    }
}

fn parse_num<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{name}: `{value}` is not a valid number")))
}

fn parse_bool(value: &str, name: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::Config(format!(
            "{name}: `{other}` is not a valid boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.session_ttl, Duration::from_secs(1800));
        assert_eq!(cfg.session_max, 100);
        assert_eq!(cfg.name_cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.turn_deadline, Duration::from_millis(15_000));
        assert_eq!(cfg.metrics_max_samples, 1000);
        assert_eq!(cfg.metrics_ttl, Duration::from_secs(86_400));
        assert!(cfg.mask_pii);
        assert_eq!(cfg.llm_adapter, LlmAdapterKind::None);
    }

    #[test]
    fn redacted_summary_hides_secrets() {
        let cfg = Config {
            backend_bearer_token: Some("super-secret".into()),
            api_token: Some("also-secret".into()),
            ..Config::default()
        };
        let rendered = cfg.redacted_summary().to_string();
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("also-secret"));
        assert!(rendered.contains("<set>"));
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("true", "X").unwrap());
        assert!(parse_bool("1", "X").unwrap());
        assert!(!parse_bool("no", "X").unwrap());
        assert!(parse_bool("maybe", "X").is_err());
    }

    #[test]
    fn num_parsing_rejects_garbage() {
        assert!(parse_num::<u64>("12", "X").is_ok());
        assert!(parse_num::<u64>("twelve", "X").is_err());
    }
}
