//! Client for the external text-completion service.
//!
//! Speaks the OpenAI-compatible chat completions dialect that local serving
//! stacks expose. Each worker owns its own client: the blocking transport is
//! not meant to be shared, and per-worker clients keep connection reuse
//! simple. Replies are passed through the reasoning-envelope stripper before
//! they are returned; a reply that strips to nothing is an error so the
//! caller can fall back.

mod strip;

pub use strip::strip_think_blocks;

use std::io::Read;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

/// Hard ceiling on the completion response body.
const RESPONSE_MAX: u64 = 256 * 1024;

/// Overall request deadline; local models can be slow to first token.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the completion service.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Transport-level failure (connect, timeout, abort).
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not valid JSON.
    #[error("completion response was not valid JSON: {0}")]
    BadJson(#[from] serde_json::Error),

    /// Response body read failure.
    #[error("completion response read failed: {0}")]
    Read(#[from] std::io::Error),

    /// Response JSON had no usable content.
    #[error("completion response had no content")]
    NoContent,

    /// The reply was empty once the reasoning envelope was stripped.
    #[error("completion reply empty after stripping")]
    EmptyReply,
}

/// Blocking client for one worker.
pub struct CompletionClient {
    http: reqwest::blocking::Client,
    url: String,
    model: String,
    max_tokens: u32,
}

impl CompletionClient {
    /// Builds a client for `endpoint` (base URL without the API path).
    pub fn new(endpoint: &str, model: &str, max_tokens: u32) -> Result<Self, CompletionError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(CompletionClient {
            http,
            url: format!("{}/v1/chat/completions", endpoint.trim_end_matches('/')),
            model: model.to_string(),
            max_tokens,
        })
    }

    /// Requests a completion for `user_msg` and returns the stripped reply.
    pub fn chat(&self, system_prompt: &str, user_msg: &str) -> Result<String, CompletionError> {
        let body = build_request_body(&self.model, self.max_tokens, system_prompt, user_msg);

        let response = self.http.post(&self.url).json(&body).send()?;

        // Bound the body read; a runaway server must not balloon memory.
        let mut raw = String::new();
        response.take(RESPONSE_MAX).read_to_string(&mut raw)?;

        let json: Value = serde_json::from_str(&raw)?;
        let content = extract_content(&json).ok_or(CompletionError::NoContent)?;

        let reply = strip_think_blocks(content);
        if reply.is_empty() {
            return Err(CompletionError::EmptyReply);
        }
        Ok(reply)
    }
}

/// Builds the chat completions request payload.
fn build_request_body(model: &str, max_tokens: u32, system_prompt: &str, user_msg: &str) -> Value {
    let mut messages = Vec::new();
    if !system_prompt.is_empty() {
        messages.push(json!({ "role": "system", "content": system_prompt }));
    }
    messages.push(json!({ "role": "user", "content": user_msg }));

    let mut body = json!({
        "max_tokens": max_tokens,
        "temperature": 0.7,
        "messages": messages,
    });
    if !model.is_empty() {
        body["model"] = Value::String(model.to_string());
    }
    body
}

/// Pulls `choices[0].message.content` out of a response.
fn extract_content(json: &Value) -> Option<&str> {
    json.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .filter(|content| !content.is_empty())
}
