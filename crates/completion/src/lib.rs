//! Completion-service client and failure classification
//!
//! One configuration-driven client covers every model: `ModelProfile` carries
//! the model id and generation parameters as plain data, so adding a model is
//! a config change rather than a new type. The `CompletionClient` trait is
//! the seam the dispatcher works against; tests substitute scripted fakes,
//! production uses `ChatClient` (OpenAI-compatible chat completions over
//! reqwest). Failures come back pre-classified (`ErrorClass`) so the retry
//! state machine never inspects wire details.

pub mod chat;
pub mod classify;
mod error;

pub use chat::ChatClient;
pub use classify::{ErrorClass, classify_429, classify_status};
pub use error::{Error, Result};

use std::future::Future;
use std::pin::Pin;

use common::ApiKey;
use serde::{Deserialize, Serialize};

/// Public OpenAI endpoint; `api_base` in the key config overrides it.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Model used when the config names none.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// One unit of prompt material: what to do, and what to do it to.
///
/// The instruction rides as the system message, the input as the user
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub instruction: String,
    pub input: String,
}

impl Prompt {
    pub fn new(instruction: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            input: input.into(),
        }
    }
}

fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}

/// Model id plus generation parameters, passed as data.
///
/// Unset parameters are omitted from the request so the service applies its
/// own defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL.to_string(),
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }
}

/// Abstraction over one completion call.
///
/// The dispatcher and retry machinery depend only on this capability: turn
/// (credential, prompt) into generated text or a classified failure.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CompletionClient>`).
pub trait CompletionClient: Send + Sync {
    /// Perform one completion call authorized by `key`.
    fn complete<'a>(
        &'a self,
        key: &'a ApiKey,
        prompt: &'a Prompt,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}
