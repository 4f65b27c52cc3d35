//! Inbound update routing.
//!
//! Both ingress paths, webhook pushes and the long-poll loop, deliver raw
//! update trees here. The handler extracts the message envelope, applies the
//! home-group gate and the access list, routes slash commands to the
//! dispatcher, and enqueues everything else for the worker pool.
//!
//! Malformed updates are dropped silently: the platform sends plenty of
//! update kinds this service does not consume, and an update without an id
//! cannot even be acknowledged.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::access::AccessList;
use crate::commands::{CommandContext, dispatch};
use crate::config::Config;
use crate::queue::MessageQueue;
use crate::types::{ChatId, SenderId};

/// Shared routing state for inbound updates.
pub struct UpdateHandler {
    config: Arc<Config>,
    access: Arc<AccessList>,
    queue: Arc<MessageQueue>,
    bot_username: Option<String>,
    boot: Instant,
}

impl UpdateHandler {
    pub fn new(
        config: Arc<Config>,
        access: Arc<AccessList>,
        queue: Arc<MessageQueue>,
        bot_username: Option<String>,
        boot: Instant,
    ) -> UpdateHandler {
        UpdateHandler {
            config,
            access,
            queue,
            bot_username,
            boot,
        }
    }

    /// Routes one update. Returns its `update_id` so the poll loop can
    /// advance its offset; `None` means the update had no id at all.
    pub fn handle(&self, update: &Value) -> Option<i64> {
        let update_id = update.get("update_id").and_then(Value::as_i64)?;

        let Some(message) = update.get("message") else {
            return Some(update_id);
        };

        // Chat id first: the cheapest rejection path.
        let Some(chat) = message.get("chat") else {
            return Some(update_id);
        };
        let Some(chat_id) = chat.get("id").and_then(Value::as_i64) else {
            return Some(update_id);
        };
        let chat_id = ChatId(chat_id);

        // Home-group gate: with a home group configured, group traffic from
        // anywhere else is ignored. Private chats always pass.
        if self.config.home_group_id != 0 {
            let chat_type = chat
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("private");
            let is_group = matches!(chat_type, "group" | "supergroup");
            if is_group && chat_id.0 != self.config.home_group_id {
                return Some(update_id);
            }
        }

        let Some(sender) = message
            .get("from")
            .and_then(|from| from.get("id"))
            .and_then(Value::as_i64)
        else {
            return Some(update_id);
        };
        let sender = SenderId(sender);

        let text = message.get("text").and_then(Value::as_str).unwrap_or("");

        // Commands run before the access gate: the admin has to be able to
        // /allow without already being on the list.
        if text.starts_with('/') {
            let ctx = CommandContext {
                config: &self.config,
                access: &self.access,
                queue: &self.queue,
                sender,
                chat: chat_id,
                bot_username: self.bot_username.as_deref(),
                boot: self.boot,
            };
            if !dispatch(&ctx, text) {
                // Unknown slash command: never forwarded to the completion
                // service.
                let _ = self.queue.push(sender, chat_id, "Unknown command. Try /help");
            }
            return Some(update_id);
        }

        if !self.access.contains(sender) {
            let name = message
                .get("from")
                .and_then(|from| from.get("first_name"))
                .and_then(Value::as_str)
                .unwrap_or("?");
            tracing::info!(sender = %sender, name, "ignored sender without access");
            return Some(update_id);
        }

        tracing::info!(chat = %chat_id, sender = %sender, text, "message accepted");
        if self.queue.push(sender, chat_id, text).is_err() {
            tracing::warn!(sender = %sender, "queue full, message dropped");
        }

        Some(update_id)
    }
}
