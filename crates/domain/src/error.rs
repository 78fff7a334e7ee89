/// Shared error type used across all HydroChat crates.
///
/// Backend call outcomes (validation failures, not-found, conflicts) are
/// modelled as [`crate::types`] result sums, not errors. This enum is
/// reserved for infrastructure failures that a node cannot turn into a
/// user-facing re-prompt on its own.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("LLM adapter: {0}")]
    Llm(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("routing: node {node} returned token {token} not in its permitted set")]
    Routing { node: &'static str, token: &'static str },

    #[error("turn cancelled")]
    Cancelled,

    #[error("turn deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
