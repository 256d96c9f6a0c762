//! OpenAI-compatible chat-completions client
//!
//! One reqwest client serves every model; the model id and generation
//! parameters come from `ModelProfile`. The prompt's instruction rides as
//! the system message and its input as the user message. Error responses
//! are classified here, at the wire, so callers only ever see `ErrorClass`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::ApiKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::classify_status;
use crate::error::{Error, Result};
use crate::{CompletionClient, DEFAULT_API_BASE, ModelProfile, Prompt};

/// Error-message snippet bound when the body is not the documented shape.
const SNIPPET_CHARS: usize = 200;

/// Wire format of one chat-completions request.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Error body shape used by OpenAI-compatible services.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    profile: ModelProfile,
}

impl ChatClient {
    /// Build a client for the given endpoint (`None` means the public
    /// OpenAI API) and model profile. `timeout` covers the whole request;
    /// hitting it classifies as transient and is retried upstream.
    pub fn new(api_base: Option<&str>, profile: ModelProfile, timeout: Duration) -> Result<Self> {
        let base = api_base.unwrap_or(DEFAULT_API_BASE).trim_end_matches('/');
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{base}/chat/completions"),
            profile,
        })
    }

    async fn request(&self, key: &ApiKey, prompt: &Prompt) -> Result<String> {
        let body = ChatRequest {
            model: &self.profile.name,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.input,
                },
            ],
            temperature: self.profile.temperature,
            top_p: self.profile.top_p,
            max_tokens: self.profile.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", key.expose()))
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await?;
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| snippet(&text));
            let class = classify_status(status, &text);
            debug!(status, class = class.label(), "completion call failed");
            return Err(Error::Api {
                status,
                message,
                class,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Malformed(e.to_string()))?;
        extract_content(parsed)
    }
}

impl CompletionClient for ChatClient {
    fn complete<'a>(
        &'a self,
        key: &'a ApiKey,
        prompt: &'a Prompt,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.request(key, prompt))
    }
}

/// Completion text of the first choice, trimmed of surrounding whitespace.
fn extract_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_owned())
        .ok_or_else(|| Error::Malformed("no choices in response".into()))
}

/// First line of an undocumented error body, bounded for log hygiene.
fn snippet(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return "empty error body".to_string();
    }
    let mut out: String = line.chars().take(SNIPPET_CHARS).collect();
    if line.chars().count() > SNIPPET_CHARS {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ModelProfile {
        ModelProfile {
            name: "gpt-4".into(),
            temperature: Some(0.2),
            top_p: None,
            max_tokens: Some(256),
        }
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let client = ChatClient::new(None, ModelProfile::default(), Duration::from_secs(30))
            .expect("client builds");
        assert_eq!(
            client.endpoint,
            "https://api.openai.com/v1/chat/completions"
        );

        let alt = ChatClient::new(
            Some("https://alt.example/v1/"),
            ModelProfile::default(),
            Duration::from_secs(30),
        )
        .expect("client builds");
        assert_eq!(alt.endpoint, "https://alt.example/v1/chat/completions");
    }

    #[test]
    fn request_serializes_profile_and_omits_unset_params() {
        let prompt = Prompt::new("Translate to English", "今天天气真好");
        let p = profile();
        let body = ChatRequest {
            model: &p.name,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.input,
                },
            ],
            temperature: p.temperature,
            top_p: p.top_p,
            max_tokens: p.max_tokens,
        };

        let json: serde_json::Value = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "Translate to English");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["temperature"], 0.2);
        assert_eq!(json["max_tokens"], 256);
        assert!(
            json.get("top_p").is_none(),
            "unset parameters must not be sent"
        );
    }

    #[test]
    fn response_parse_extracts_first_choice() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "The weather is lovely today."}, "finish_reason": "stop"}
            ]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            extract_content(parsed).unwrap(),
            "The weather is lovely today."
        );

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(extract_content(empty), Err(Error::Malformed(_))));
    }

    #[test]
    fn reply_padding_is_trimmed() {
        let body = r#"{
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "\n\nThe weather is lovely today.\n"}, "finish_reason": "stop"}
            ]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(extract_content(parsed).unwrap(), "The weather is lovely today.");
    }

    #[test]
    fn error_body_parse_extracts_message() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
        let parsed: ApiErrorBody = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.message, "Rate limit reached");
    }

    #[test]
    fn snippet_bounds_undocumented_bodies() {
        assert_eq!(snippet(""), "empty error body");
        assert_eq!(snippet("  plain text error\nsecond line"), "plain text error");

        let long = "x".repeat(500);
        let cut = snippet(&long);
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + 1);
        assert!(cut.ends_with('…'));
    }
}
