//! Minimal text-generation API client.
//!
//! This crate provides a focused client for a Messages-style completion API:
//! - A system prompt plus a few conversational turns go in
//! - One plain-text reply comes out
//!
//! It is the transport the Wonderland NPC injector hands composed
//! archetype context to. It knows nothing about rooms, vows or NPCs.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "WONDERLAND_VOICE_KEY";

/// Errors from the voice client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no API key in WONDERLAND_VOICE_KEY")]
    NoApiKey,

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("rate limited by the service")]
    RateLimited,

    #[error("service rejected the prompt (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the same prompt might succeed a moment later.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::RateLimited => true,
            Error::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Client for the text-generation service.
#[derive(Clone)]
pub struct Voice {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Voice {
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Read the key from `WONDERLAND_VOICE_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        match std::env::var(API_KEY_VAR) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim())),
            _ => Err(Error::NoApiKey),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API base (proxies, local gateways).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one prompt and wait for the whole reply.
    pub async fn speak(&self, prompt: &Prompt) -> Result<Reply, Error> {
        let body = self.wire_request(prompt);
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let wire: WireReply = response
            .json()
            .await
            .map_err(|e| Error::Malformed(e.to_string()))?;
        Ok(wire.into_reply())
    }

    fn headers(&self) -> Result<HeaderMap, Error> {
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| Error::Config("API key is not a valid header value".into()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn wire_request<'a>(&'a self, prompt: &'a Prompt) -> WireRequest<'a> {
        WireRequest {
            model: prompt.model.as_deref().unwrap_or(&self.model),
            max_tokens: prompt.max_tokens,
            system: prompt.system.as_deref(),
            messages: prompt
                .turns
                .iter()
                .map(|turn| WireMessage {
                    role: turn.speaker.role(),
                    content: &turn.text,
                })
                .collect(),
            temperature: prompt.temperature,
            stop_sequences: &prompt.stop,
        }
    }
}

// ============================================================================
// Prompts and Replies
// ============================================================================

/// What to send: a system prompt and the turns so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub model: Option<String>,
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    pub stop: Vec<String>,
}

impl Prompt {
    /// A prompt with one line from the other party.
    pub fn line(text: impl Into<String>) -> Self {
        Self {
            model: None,
            system: None,
            turns: vec![Turn::other(text)],
            max_tokens: 200,
            temperature: None,
            stop: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_turn(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// Who said a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// Whoever the model is answering.
    Other,
    /// The model itself, in an earlier turn.
    Model,
}

impl Speaker {
    fn role(self) -> &'static str {
        match self {
            Speaker::Other => "user",
            Speaker::Model => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    pub fn other(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Other,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Model,
            text: text.into(),
        }
    }
}

/// What came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub id: String,
    pub model: String,
    pub text: String,
    /// True when the reply was cut off by the token limit.
    pub truncated: bool,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop_sequences: &'a [String],
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    id: String,
    model: String,
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

impl WireReply {
    fn into_reply(self) -> Reply {
        let text: String = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireBlock::Text { text } => Some(text),
                WireBlock::Other => None,
            })
            .collect();
        Reply {
            id: self.id,
            model: self.model,
            text,
            truncated: self.stop_reason.as_deref() == Some("max_tokens"),
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
        }
    }
}
