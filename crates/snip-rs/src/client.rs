//! Minimal OpenAI-compatible chat completion client used by the
//! `ai-analysis` strategy.
//!
//! Only what the strategy needs: one system + one user message in, the first
//! choice's text out. Works against OpenAI, OpenRouter, or any local server
//! exposing `POST {base_url}/chat/completions`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Result, SnipError};
use crate::host::HostFuture;

/// Default endpoint when the configuration names none.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// One-shot text completion.
pub trait Completion: Send + Sync {
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> HostFuture<'a, String>;
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("snip-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SnipError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
        })
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };
        let url = format!("{}/chat/completions", self.base_url);
        debug!("Analysis request: model={}, prompt={} chars", self.model, user.len());

        let start = Instant::now();
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(
            "Analysis response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(SnipError::Http(format!("HTTP {status}: {text}")));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)?;
        if let Some(err) = parsed.error {
            return Err(SnipError::Http(format!("API error: {}", err.message)));
        }
        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        trace!("Analysis reply: {content}");
        Ok(content)
    }
}

impl Completion for ChatClient {
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> HostFuture<'a, String> {
        Box::pin(self.chat(system, user))
    }
}
