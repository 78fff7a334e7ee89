//! Process composition: build every component from the typed config and
//! wire the shared application state. No component reads the
//! environment or reaches for a global; everything is constructed here
//! and passed down.

use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};

use hc_backend::{NameCache, RestPatientBackend};
use hc_domain::config::{Config, LlmAdapterKind, LogFormat};
use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::metrics::Metrics;
use hc_llm::{IntentClassifier, LlmAdapter, OpenAiCompatAdapter};
use hc_sessions::InMemorySessionStore;

use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::ConversationLockMap;
use crate::runtime::TurnDeps;
use crate::state::AppState;

/// Install the global tracing subscriber per `LOG_FORMAT`.
pub fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Human => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Build the full application state from a validated config.
pub fn build(config: Config) -> hc_domain::Result<AppState> {
    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new(
        config.metrics_max_samples,
        config.metrics_ttl,
    ));

    let backend = Arc::new(RestPatientBackend::new(&config, metrics.clone())?);
    let cache = Arc::new(NameCache::new(backend.clone(), config.name_cache_ttl));
    let store = Arc::new(InMemorySessionStore::new(
        config.session_ttl,
        config.session_max,
    ));

    let llm: Option<Arc<dyn LlmAdapter>> = match config.llm_adapter {
        LlmAdapterKind::None => None,
        LlmAdapterKind::Openai => Some(Arc::new(OpenAiCompatAdapter::new(
            &config,
            metrics.clone(),
        )?)),
    };
    let classifier = Arc::new(IntentClassifier::new(llm.clone()));

    let api_token_hash = config
        .api_token
        .as_deref()
        .map(|token| Sha256::digest(token.as_bytes()).to_vec());
    if api_token_hash.is_none() {
        tracing::warn!("HYDROCHAT_API_TOKEN not set — running without inbound auth (dev mode)");
    }

    LogRecord::new(
        LogCategory::Flow,
        format!(
            "hydrochat {} starting on {}:{}",
            env!("CARGO_PKG_VERSION"),
            config.host,
            config.port
        ),
    )
    .extra(serde_json::json!({
        "backend": config.backend_base_url,
        "llm_adapter": config.llm_adapter,
    }))
    .emit();

    let deps = Arc::new(TurnDeps {
        config,
        store,
        backend,
        cache,
        classifier,
        llm,
        metrics,
    });

    Ok(AppState {
        deps,
        locks: Arc::new(ConversationLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        api_token_hash,
        started_at: Instant::now(),
    })
}
