//! Intent classification and the external-LLM seam.
//!
//! The primary path is deterministic: priority-ordered patterns plus an
//! independent slot extractor. The LLM adapter is a fallback used only
//! when the rules classify a message as Unknown, and for history
//! summarization; its absence degrades both gracefully.

pub mod adapter;
pub mod classifier;
pub mod openai;
pub mod rules;

pub use adapter::{IntentClassification, LlmAdapter};
pub use classifier::{ClassifiedMessage, IntentClassifier};
pub use openai::OpenAiCompatAdapter;
