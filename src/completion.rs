use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use log::{debug, warn};

use crate::error::{ChatError, ChatResult};
use crate::state::{Role, Turn};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-r1-0528:free";
pub const SYSTEM_PREAMBLE: &str = "You are a helpful AI assistant. Please respond in a clear, professional manner. Be concise but thorough in your explanations.";
pub const NO_RESPONSE: &str = "No response received.";

const REFERER: &str = "http://localhost:3000";
const APP_TITLE: &str = "DeepSeek AI Assistant";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

/// Body of a `chat/completions` call
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// The system preamble first, then every turn in transcript order.
    pub fn from_turns(turns: &[Turn], temperature: f32, max_tokens: u32) -> Self {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(WireMessage {
            role: "system".to_string(),
            content: SYSTEM_PREAMBLE.to_string(),
        });
        messages.extend(turns.iter().map(|turn| WireMessage {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }));

        Self {
            model: DEFAULT_MODEL.to_string(),
            messages,
            max_tokens,
            temperature,
        }
    }

    /// Number of transcript turns carried, preamble excluded.
    pub fn turn_count(&self) -> usize {
        self.messages.len().saturating_sub(1)
    }

    pub fn last_role(&self) -> Option<Role> {
        match self.messages.last().map(|m| m.role.as_str()) {
            Some("user") => Some(Role::User),
            Some("assistant") => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Anything that can answer a completion request. The session controller
/// only talks to this trait so tests can swap in a canned responder.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, api_key: &str, request: &CompletionRequest) -> ChatResult<String>;
}

/// OpenRouter's OpenAI-compatible endpoint
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
}

impl OpenRouterClient {
    pub fn new() -> Self {
        Self::with_endpoint(OPENROUTER_URL)
    }

    pub fn with_endpoint(endpoint: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Default for OpenRouterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionApi for OpenRouterClient {
    async fn complete(&self, api_key: &str, request: &CompletionRequest) -> ChatResult<String> {
        if request.last_role() != Some(Role::User) {
            warn!("request does not end with a user turn");
        }
        debug!(
            "POST {} model={} turns={}",
            self.endpoint,
            request.model,
            request.turn_count()
        );

        let response = self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", REFERER)
            .header("X-Title", APP_TITLE)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = error_message(status, &body);
            warn!("completion request failed: {}", message);
            return Err(ChatError::Remote(message));
        }

        parse_reply(&body)
    }
}

/// Pull `choices[0].message.content` out of a success body.
pub fn parse_reply(body: &str) -> ChatResult<String> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| ChatError::Remote(format!("Malformed response: {}", e)))?;

    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| NO_RESPONSE.to_string()))
}

/// Upstream `error.message` if present, else `HTTP <code>: <reason>`.
pub fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|env| env.error)
        .and_then(|err| err.message)
        .filter(|msg| !msg.is_empty())
        .unwrap_or_else(|| {
            format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            )
        })
}
