//! Runtime configuration snapshot.
//!
//! Configuration is read once at startup from environment variables and is
//! immutable afterwards; every component receives a shared reference to the
//! snapshot. Out-of-range numeric values are clamped to their documented
//! bounds rather than rejected, so a misconfigured deployment degrades to a
//! sane setting instead of refusing to boot. The only fatal condition is a
//! missing bot token.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::types::SenderId;

/// Default platform API base URL (token is appended).
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org/bot";

/// Default circular log location; the `logs` subcommand reads the same
/// default without loading a full configuration.
pub const DEFAULT_LOG_PATH: &str = "/var/log/chat-relay/chat-relay.log";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No bot token in the environment.
    #[error("bot token not set (set TELEGRAM_BOT_TOKEN or T_TOKEN)")]
    MissingToken,
}

/// Immutable configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    /// Platform bot token. Mandatory.
    pub bot_token: String,

    /// Minimum seconds between a message's ingress and its reply. 0..=300.
    pub reply_delay: u64,

    /// Long-poll timeout in seconds. 1..=120.
    pub poll_timeout: u64,

    /// Maximum updates fetched per long-poll request. 1..=100.
    pub poll_limit: u32,

    /// Path to the persisted access list.
    pub access_path: PathBuf,

    /// When true, run the webhook ingress instead of the poll loop.
    pub webhook_enabled: bool,

    /// Webhook listen port. 1..=65535.
    pub webhook_port: u16,

    /// Tokio worker threads serving the webhook endpoint. 1..=32.
    pub webhook_threads: usize,

    /// Request body buffers kept in the ingress pool. 1..=64.
    pub webhook_pool_size: usize,

    /// Shared secret expected in the webhook secret header. Empty disables
    /// the check.
    pub webhook_secret: String,

    /// Home group chat id. 0 accepts messages from any group.
    pub home_group_id: i64,

    /// Admin sender id. 0 disables admin commands.
    pub admin_id: SenderId,

    /// Worker pool size. 1..=16.
    pub worker_count: usize,

    /// Per-sender ring depth before rounding to a power of two. 4..=256.
    pub user_ring_size: usize,

    /// Circular log file path.
    pub log_path: PathBuf,

    /// Circular log cap in megabytes. 1..=1024.
    pub log_max_size_mb: u64,

    /// Minimum log level name ("debug", "info", "warn", "error").
    pub log_level: String,

    /// Completion service base URL.
    pub completion_endpoint: String,

    /// Completion model name; empty lets the server pick.
    pub completion_model: String,

    /// Completion token limit per reply. 32..=4096.
    pub completion_max_tokens: u32,

    /// System prompt prepended to every completion request.
    pub completion_system_prompt: String,

    /// Platform API base URL override (tests point this at a mock server).
    pub api_base: String,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Arc<Config>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok()).map(Arc::new)
    }

    /// Loads configuration through an arbitrary variable source.
    ///
    /// `from_env` is a thin wrapper over this; tests supply a map instead of
    /// mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        // Token: T_TOKEN wins over TELEGRAM_BOT_TOKEN.
        let bot_token = lookup("T_TOKEN")
            .filter(|v| !v.is_empty())
            .or_else(|| lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()))
            .ok_or(ConfigError::MissingToken)?;

        // Secret: T_SECRET wins over WEBHOOK_SECRET.
        let webhook_secret = lookup("T_SECRET")
            .filter(|v| !v.is_empty())
            .or_else(|| lookup("WEBHOOK_SECRET"))
            .unwrap_or_default();

        Ok(Config {
            bot_token,
            reply_delay: int_var(&lookup, "RELAY_REPLY_DELAY", 3, 0, 300),
            poll_timeout: int_var(&lookup, "RELAY_POLL_TIMEOUT", 30, 1, 120),
            poll_limit: int_var(&lookup, "RELAY_POLL_LIMIT", 100, 1, 100) as u32,
            access_path: PathBuf::from(
                lookup("RELAY_ACCESS_PATH").unwrap_or_else(|| "access_list.txt".to_string()),
            ),
            webhook_enabled: bool_var(&lookup, "RELAY_WEBHOOK_ENABLED"),
            webhook_port: int_var(&lookup, "RELAY_WEBHOOK_PORT", 8443, 1, 65535) as u16,
            webhook_threads: int_var(&lookup, "RELAY_WEBHOOK_THREADS", 4, 1, 32) as usize,
            webhook_pool_size: int_var(&lookup, "RELAY_WEBHOOK_POOL_SIZE", 8, 1, 64) as usize,
            webhook_secret,
            home_group_id: lookup("RELAY_HOME_GROUP_ID")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            admin_id: SenderId(
                lookup("RELAY_ADMIN_ID")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0),
            ),
            worker_count: int_var(&lookup, "RELAY_WORKER_COUNT", 1, 1, 16) as usize,
            user_ring_size: int_var(&lookup, "RELAY_USER_RING_SIZE", 30, 4, 256) as usize,
            log_path: PathBuf::from(
                lookup("RELAY_LOG_PATH").unwrap_or_else(|| DEFAULT_LOG_PATH.to_string()),
            ),
            log_max_size_mb: int_var(&lookup, "RELAY_LOG_MAX_SIZE_MB", 10, 1, 1024),
            log_level: lookup("RELAY_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            completion_endpoint: lookup("RELAY_COMPLETION_ENDPOINT")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            completion_model: lookup("RELAY_COMPLETION_MODEL").unwrap_or_default(),
            completion_max_tokens: int_var(&lookup, "RELAY_COMPLETION_MAX_TOKENS", 512, 32, 4096)
                as u32,
            completion_system_prompt: lookup("RELAY_COMPLETION_SYSTEM_PROMPT").unwrap_or_else(
                || "You are a helpful chat assistant. Keep replies concise.".to_string(),
            ),
            api_base: lookup("RELAY_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        })
    }

    /// Logs the loaded configuration with secrets redacted.
    pub fn dump(&self) {
        tracing::info!(
            reply_delay = self.reply_delay,
            poll_timeout = self.poll_timeout,
            poll_limit = self.poll_limit,
            access_path = %self.access_path.display(),
            "config: bot"
        );
        tracing::info!(
            enabled = self.webhook_enabled,
            port = self.webhook_port,
            threads = self.webhook_threads,
            pool_size = self.webhook_pool_size,
            secret = if self.webhook_secret.is_empty() { "(none)" } else { "********" },
            "config: webhook"
        );
        tracing::info!(
            home_group = if self.home_group_id != 0 { "****" } else { "(none)" },
            admin = if self.admin_id.is_unset() { "(none)" } else { "****" },
            workers = self.worker_count,
            ring_size = self.user_ring_size,
            "config: dispatch"
        );
        tracing::info!(
            path = %self.log_path.display(),
            max_size_mb = self.log_max_size_mb,
            level = %self.log_level,
            "config: log"
        );
        tracing::info!(
            endpoint = %self.completion_endpoint,
            model = if self.completion_model.is_empty() {
                "(server default)"
            } else {
                self.completion_model.as_str()
            },
            max_tokens = self.completion_max_tokens,
            "config: completion"
        );
    }
}

/// Parses an integer variable, clamping to `[lo, hi]`. Unset or unparseable
/// values fall back to `default`.
fn int_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
    lo: u64,
    hi: u64,
) -> u64 {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|v| v.clamp(lo, hi))
        .unwrap_or(default)
}

/// Parses a boolean variable: "true", "1", and "yes" are true.
fn bool_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    lookup(key)
        .map(|v| matches!(v.trim(), "true" | "1" | "yes"))
        .unwrap_or(false)
}
