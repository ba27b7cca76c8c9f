//! OpenRouter chat-completions client
//!
//! One operation: send a prompt to a named model, get text back. Failure
//! classification lives here (what is transient, what is terminal); retry
//! policy lives in `retry.rs`.

use super::models::{Usage, MAX_COMPLETION_TOKENS};
use crate::error::GenerateError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

/// OpenRouter direct API URL (BYOK mode)
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Response from the model including content and usage stats
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub content: String,
    pub usage: Option<Usage>,
}

/// The generation endpoint seam. The production implementation is
/// [`LlmClient`]; tests substitute scripted fakes.
pub trait GenerationEndpoint: Send + Sync {
    fn generate<'a>(
        &'a self,
        model_id: &'a str,
        system: &'a str,
        user: &'a str,
    ) -> BoxFuture<'a, Result<LlmReply, GenerateError>>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

/// Reqwest-backed OpenRouter client.
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
        }
    }

    async fn call(
        &self,
        model_id: &str,
        system: &str,
        user: &str,
    ) -> Result<LlmReply, GenerateError> {
        let request = ChatRequest {
            model: model_id.to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: MAX_COMPLETION_TOKENS,
            stream: false,
        };

        let response = self
            .http
            .post(OPENROUTER_URL)
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/cameronspears/comet")
            .header("X-Title", "comet")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerateError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerateError::Transient(format!("failed to read response: {}", e)))?;

        if status.is_success() {
            let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                GenerateError::Transient(format!("malformed OpenRouter response: {}", e))
            })?;
            let content = parsed
                .choices
                .first()
                .map(|c| c.message.content.clone())
                .unwrap_or_default();
            return Ok(LlmReply {
                content,
                usage: parsed.usage,
            });
        }

        Err(classify_status(status.as_u16(), &text))
    }
}

impl GenerationEndpoint for LlmClient {
    fn generate<'a>(
        &'a self,
        model_id: &'a str,
        system: &'a str,
        user: &'a str,
    ) -> BoxFuture<'a, Result<LlmReply, GenerateError>> {
        self.call(model_id, system, user).boxed()
    }
}

/// Map an HTTP error status to the retry taxonomy: rate limits and server
/// errors are transient, auth and client errors are terminal.
fn classify_status(status: u16, body: &str) -> GenerateError {
    let preview = truncate_str(body, 200);
    match status {
        401 | 403 => GenerateError::Validation(format!(
            "authentication rejected ({}). Run 'comet --setup' to update your API key.",
            status
        )),
        429 => GenerateError::Transient(format!("rate limited: {}", preview)),
        500..=599 => GenerateError::Transient(format!("server error {}: {}", status, preview)),
        _ => GenerateError::Validation(format!("API error {}: {}", status, preview)),
    }
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_transient() {
        assert!(classify_status(429, "slow down").is_retryable());
        assert!(classify_status(503, "down").is_retryable());
    }

    #[test]
    fn test_auth_failure_is_terminal() {
        assert!(!classify_status(401, "bad key").is_retryable());
        assert!(!classify_status(400, "bad request").is_retryable());
    }

    #[test]
    fn test_truncate_str_unicode_safe() {
        assert_eq!(truncate_str("héllo wörld", 5), "héllo");
        assert_eq!(truncate_str("short", 10), "short");
    }
}
