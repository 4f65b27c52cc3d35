//! Blocking client for the messaging platform's bot API.
//!
//! Each worker owns its own client instance; the blocking transport is never
//! shared across threads. Calls that the platform may rate-limit honor a
//! `Retry-After` of up to 60 seconds and retry once. Every API response is
//! an envelope `{"ok": bool, ...}`; a false envelope surfaces the server's
//! description as a typed error.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;

use crate::types::ChatId;

/// Default deadline for ordinary API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Slack added on top of the long-poll timeout for the HTTP deadline.
const POLL_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// Errors from the platform API.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Transport failure (connect, timeout, abort) or bad response body.
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered `ok: false`.
    #[error("platform API error: {0}")]
    Api(String),

    /// The response envelope was missing an expected field.
    #[error("malformed platform response: missing {0}")]
    Malformed(&'static str),
}

/// The bot's own identity, from `getMe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: i64,
    pub username: Option<String>,
}

/// A blocking API client bound to one bot token.
pub struct TelegramClient {
    http: reqwest::blocking::Client,
    base: String,
}

impl TelegramClient {
    /// Builds a client for `api_base` (e.g. `https://api.telegram.org/bot`)
    /// and the given token.
    pub fn new(api_base: &str, token: &str) -> Result<TelegramClient, TelegramError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(TelegramClient {
            http,
            base: format!("{api_base}{token}/"),
        })
    }

    /// Verifies the token and returns the bot's identity.
    pub fn get_me(&self) -> Result<BotIdentity, TelegramError> {
        let envelope = self.perform(|| self.http.get(self.method_url("getMe")), false)?;
        parse_identity(&envelope)
    }

    /// Long-polls for updates starting at `offset`. The HTTP deadline is the
    /// poll timeout plus slack so the server side expires first.
    pub fn get_updates(
        &self,
        offset: i64,
        limit: u32,
        timeout: u64,
    ) -> Result<Vec<Value>, TelegramError> {
        let envelope = self.perform(
            || {
                self.http
                    .get(self.method_url("getUpdates"))
                    .query(&[
                        ("offset", offset.to_string()),
                        ("limit", limit.to_string()),
                        ("timeout", timeout.to_string()),
                        ("allowed_updates", r#"["message"]"#.to_string()),
                    ])
                    .timeout(Duration::from_secs(timeout) + POLL_TIMEOUT_SLACK)
            },
            false,
        )?;
        parse_updates(envelope)
    }

    /// Sends a text message to `chat`.
    pub fn send_message(&self, chat: ChatId, text: &str) -> Result<(), TelegramError> {
        let body = json!({ "chat_id": chat.0, "text": text });
        self.perform(
            || self.http.post(self.method_url("sendMessage")).json(&body),
            true,
        )?;
        Ok(())
    }

    /// Registers `url` as the push endpoint, with an optional shared secret.
    pub fn set_webhook(&self, url: &str, secret: &str) -> Result<(), TelegramError> {
        let mut body = json!({ "url": url, "allowed_updates": ["message"] });
        if !secret.is_empty() {
            body["secret_token"] = Value::String(secret.to_string());
        }
        self.perform(
            || self.http.post(self.method_url("setWebhook")).json(&body),
            true,
        )?;
        tracing::info!(url, "webhook registered");
        Ok(())
    }

    /// Removes any registered push endpoint.
    pub fn delete_webhook(&self) -> Result<(), TelegramError> {
        self.perform(
            || self.http.post(self.method_url("deleteWebhook")).json(&json!({})),
            true,
        )?;
        tracing::info!("webhook deleted");
        Ok(())
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}{}", self.base, method)
    }

    /// Sends a request, optionally retrying once on 429 after honoring
    /// `Retry-After`, and unwraps the `ok` envelope.
    fn perform(
        &self,
        build: impl Fn() -> reqwest::blocking::RequestBuilder,
        retry_on_429: bool,
    ) -> Result<Value, TelegramError> {
        let mut response = build().send()?;

        if retry_on_429 && response.status() == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after_seconds(
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok()),
            );
            tracing::warn!(wait, "platform rate-limited, retrying once");
            std::thread::sleep(Duration::from_secs(wait));
            response = build().send()?;
        }

        let envelope: Value = response.json()?;
        if envelope.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = envelope
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("(unknown)");
            return Err(TelegramError::Api(description.to_string()));
        }
        Ok(envelope)
    }
}

/// Clamps a `Retry-After` header value to [1, 60] seconds.
fn retry_after_seconds(header: Option<&str>) -> u64 {
    header
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|&seconds| seconds > 0)
        .map(|seconds| seconds.min(60))
        .unwrap_or(1)
}

/// Extracts the bot identity from a `getMe` envelope.
fn parse_identity(envelope: &Value) -> Result<BotIdentity, TelegramError> {
    let result = envelope
        .get("result")
        .ok_or(TelegramError::Malformed("result"))?;
    let id = result
        .get("id")
        .and_then(Value::as_i64)
        .ok_or(TelegramError::Malformed("result.id"))?;
    let username = result
        .get("username")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(BotIdentity { id, username })
}

/// Extracts the update array from a `getUpdates` envelope, taking ownership
/// of the updates without cloning them.
fn parse_updates(envelope: Value) -> Result<Vec<Value>, TelegramError> {
    let Value::Object(mut envelope) = envelope else {
        return Err(TelegramError::Malformed("result"));
    };
    match envelope.remove("result") {
        Some(Value::Array(updates)) => Ok(updates),
        _ => Err(TelegramError::Malformed("result")),
    }
}
