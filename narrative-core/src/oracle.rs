//! The Narrator Oracle: the language model behind every stage.
//!
//! The engine treats the oracle as a black box from (system prompt, user
//! prompt) to text. Replies that should be JSON are parsed leniently: a
//! surrounding code fence is stripped, and if strict parsing still fails the
//! first balanced `{...}` span is tried.

use crate::config::OracleConfig;
use async_trait::async_trait;
use claude::{Claude, Message, Request};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Appended to the system prompt of every JSON call.
const JSON_INSTRUCTION: &str = "\n\nIMPORTANT: reply with a single valid JSON object only. \
     No markdown code fences, no commentary before or after it.";

/// Errors from an oracle call.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Claude API error: {0}")]
    Api(#[from] claude::Error),

    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle returned an empty reply")]
    EmptyReply,

    #[error("oracle reply is not a JSON object: {raw}")]
    MalformedJson { raw: String },

    #[error("oracle reply has the wrong shape: {0}")]
    Shape(String),
}

/// A source of narrative judgment.
#[async_trait]
pub trait NarratorOracle: Send + Sync {
    /// Plain text completion.
    async fn invoke(&self, system: &str, user: &str) -> Result<String, OracleError>;

    /// Completion parsed as a JSON object.
    async fn invoke_json(&self, system: &str, user: &str) -> Result<Map<String, Value>, OracleError> {
        let system = format!("{system}{JSON_INSTRUCTION}");
        let raw = self.invoke(&system, user).await?;
        parse_json_reply(&raw)
    }
}

/// Oracle backed by the Anthropic Messages API.
#[derive(Clone)]
pub struct ClaudeOracle {
    client: Claude,
    model: String,
    max_tokens: usize,
    temperature: Option<f32>,
    timeout: Duration,
}

impl ClaudeOracle {
    /// Build an oracle from explicit configuration.
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let mut client = Claude::new(config.api_key)?
            .with_model(&config.model)
            // Let the outer deadline fire first so timeouts are reported uniformly.
            .with_timeout(config.timeout + Duration::from_secs(5))?;
        if let Some(url) = config.base_url {
            client = client.with_base_url(url);
        }

        Ok(Self {
            client,
            model: config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout,
        })
    }

    /// Build an oracle from environment variables.
    pub fn from_env() -> Result<Self, OracleError> {
        Self::new(OracleConfig::from_env()?)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl NarratorOracle for ClaudeOracle {
    async fn invoke(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let mut request = Request::new(vec![Message::user(user)])
            .with_system(system)
            .with_model(&self.model)
            .with_max_tokens(self.max_tokens);
        if let Some(temp) = self.temperature {
            request = request.with_temperature(temp);
        }

        tracing::debug!(
            model = %self.model,
            system_chars = system.len(),
            user_chars = user.len(),
            "oracle request"
        );

        let started = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.client.complete(request))
            .await
            .map_err(|_| OracleError::Timeout(self.timeout))?
            .map_err(|e| match e {
                claude::Error::Timeout => OracleError::Timeout(self.timeout),
                other => OracleError::Api(other),
            })?;

        let text = response.text();
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            reply_chars = text.len(),
            "oracle reply"
        );

        if text.trim().is_empty() {
            return Err(OracleError::EmptyReply);
        }
        Ok(text)
    }
}

/// Parse an oracle reply as a JSON object.
pub fn parse_json_reply(raw: &str) -> Result<Map<String, Value>, OracleError> {
    let text = strip_code_fence(raw.trim());

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Ok(map);
    }

    tracing::warn!(raw = %preview(text, 500), "strict JSON parse failed, extracting object span");
    if let Some(span) = first_balanced_object(text) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) {
            return Ok(map);
        }
    }

    tracing::error!(raw = %raw, "oracle reply could not be parsed as JSON");
    Err(OracleError::MalformedJson {
        raw: raw.to_string(),
    })
}

/// Remove a leading code fence (optionally labelled `json`) and its closer.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.find("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

/// The first `{...}` span whose braces balance, ignoring braces inside
/// string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
