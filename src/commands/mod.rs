//! Slash-command dispatch.
//!
//! The command set is closed: `start` and `help` for everyone, `allow`,
//! `revoke`, and `status` for the configured admin. Lookup is a binary
//! search over a static table kept in alphabetical order, so dispatch does
//! no allocation.
//!
//! Handlers never talk to the platform directly; every reply (including
//! authorization failures) is deferred through the message queue, where the
//! worker pool picks it up with the usual pacing. A denied or malformed
//! admin command still counts as handled because it consumed the slash.

mod parser;

pub use parser::{SlashCommand, parse_slash};

use std::time::Instant;

use crate::access::{AccessList, AddOutcome, RemoveOutcome};
use crate::config::Config;
use crate::queue::MessageQueue;
use crate::types::{ChatId, SenderId};

/// Read-only bundle passed to every command handler.
///
/// Handlers mutate nothing but the access list (through its own lock) and
/// the queue (through pushes).
pub struct CommandContext<'a> {
    pub config: &'a Config,
    pub access: &'a AccessList,
    pub queue: &'a MessageQueue,
    pub sender: SenderId,
    pub chat: ChatId,
    pub bot_username: Option<&'a str>,
    pub boot: Instant,
}

enum Handler {
    NoArg(fn(&CommandContext<'_>)),
    WithArg(fn(&CommandContext<'_>, &str)),
}

/// Dispatch table, sorted alphabetically by name for binary search.
static COMMANDS: &[(&str, Handler)] = &[
    ("allow", Handler::WithArg(cmd_allow)),
    ("help", Handler::NoArg(cmd_help)),
    ("revoke", Handler::WithArg(cmd_revoke)),
    ("start", Handler::NoArg(cmd_start)),
    ("status", Handler::NoArg(cmd_status)),
];

/// Parses and executes a slash command.
///
/// Returns `true` when the text was handled as a command (including failed
/// authorization and bad arguments, which produce error replies). Returns
/// `false` for non-commands, unknown commands, and commands addressed to a
/// different bot.
pub fn dispatch(ctx: &CommandContext<'_>, text: &str) -> bool {
    let Some(parsed) = parse_slash(text, ctx.bot_username) else {
        return false;
    };

    let Ok(index) = COMMANDS.binary_search_by(|(name, _)| name.cmp(&parsed.name)) else {
        return false;
    };

    tracing::debug!(command = parsed.name, sender = %ctx.sender, "dispatching command");
    match &COMMANDS[index].1 {
        Handler::NoArg(handler) => handler(ctx),
        Handler::WithArg(handler) => handler(ctx, parsed.args),
    }
    true
}

/// Enqueues a reply to the command's sender.
fn reply(ctx: &CommandContext<'_>, text: &str) {
    if let Err(err) = ctx.queue.push(ctx.sender, ctx.chat, text) {
        tracing::warn!(sender = %ctx.sender, error = %err, "command reply dropped");
    }
}

/// Admin gate shared by `allow`, `revoke`, and `status`.
fn require_admin(ctx: &CommandContext<'_>) -> bool {
    if ctx.config.admin_id.is_unset() || ctx.sender != ctx.config.admin_id {
        reply(ctx, "permission denied: admin only.");
        return false;
    }
    true
}

/// Parses a command argument as a non-zero sender id. The whole argument
/// must be a decimal 64-bit integer; trailing text is rejected.
fn parse_target(args: &str) -> Option<SenderId> {
    let id: i64 = args.parse().ok()?;
    if id == 0 {
        return None;
    }
    Some(SenderId(id))
}

fn cmd_start(ctx: &CommandContext<'_>) {
    reply(ctx, "Hello! I'm chat-relay. Use /help to see available commands.");
}

fn cmd_help(ctx: &CommandContext<'_>) {
    reply(
        ctx,
        "/start  - show greeting\n\
         /help   - this message\n\
         /status - (admin) operational status\n\
         /allow <user_id>  - (admin) grant a user access\n\
         /revoke <user_id> - (admin) revoke a user's access",
    );
}

fn cmd_allow(ctx: &CommandContext<'_>, args: &str) {
    if !require_admin(ctx) {
        return;
    }
    if args.is_empty() {
        reply(ctx, "Usage: /allow <user_id>");
        return;
    }
    let Some(target) = parse_target(args) else {
        reply(ctx, "Invalid user ID.");
        return;
    };

    match ctx.access.add(target) {
        Ok(AddOutcome::Added) => {
            reply(ctx, &format!("User {target} granted access."));
            // Tell the newly allowed user, through the normal queue path.
            if let Err(err) = ctx.queue.push(
                target,
                ChatId(target.0),
                "You have been granted access to this bot.",
            ) {
                tracing::warn!(target = %target, error = %err, "grant notice dropped");
            }
        }
        Ok(AddOutcome::AlreadyPresent) => reply(ctx, "User already has access."),
        Ok(AddOutcome::Full) => reply(ctx, "Failed to add user (access list full)."),
        Err(err) => {
            tracing::error!(target = %target, error = %err, "access list add failed");
            reply(ctx, "Failed to add user.");
        }
    }
}

fn cmd_revoke(ctx: &CommandContext<'_>, args: &str) {
    if !require_admin(ctx) {
        return;
    }
    if args.is_empty() {
        reply(ctx, "Usage: /revoke <user_id>");
        return;
    }
    let Some(target) = parse_target(args) else {
        reply(ctx, "Invalid user ID.");
        return;
    };

    match ctx.access.remove(target) {
        Ok(RemoveOutcome::Removed) => reply(ctx, &format!("User {target} access revoked.")),
        Ok(RemoveOutcome::NotPresent) => reply(ctx, "User did not have access."),
        Err(err) => {
            tracing::error!(target = %target, error = %err, "access list remove failed");
            reply(ctx, "Failed to revoke user.");
        }
    }
}

fn cmd_status(ctx: &CommandContext<'_>) {
    if !require_admin(ctx) {
        return;
    }
    let uptime = ctx.boot.elapsed().as_secs();
    let (hours, minutes, seconds) = (uptime / 3600, (uptime % 3600) / 60, uptime % 60);
    reply(
        ctx,
        &format!(
            "uptime: {hours}h {minutes}m {seconds}s\n\
             queue: {} pending\n\
             access list: {} user(s)\n\
             workers: {}",
            ctx.queue.depth(),
            ctx.access.count(),
            ctx.config.worker_count,
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueuedMessage;
    use tempfile::tempdir;

    const ADMIN: SenderId = SenderId(1000);

    struct Fixture {
        config: Config,
        access: AccessList,
        queue: MessageQueue,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Fixture {
            let dir = tempdir().unwrap();
            let vars = [
                ("T_TOKEN".to_string(), "tok".to_string()),
                ("RELAY_ADMIN_ID".to_string(), ADMIN.0.to_string()),
            ];
            let config = Config::from_lookup(|key| {
                vars.iter()
                    .find(|(k, _)| k.as_str() == key)
                    .map(|(_, v)| v.clone())
            })
            .unwrap();
            Fixture {
                config,
                access: AccessList::load(dir.path().join("access_list.txt")).unwrap(),
                queue: MessageQueue::new(16),
                _dir: dir,
            }
        }

        fn ctx(&self, sender: i64) -> CommandContext<'_> {
            CommandContext {
                config: &self.config,
                access: &self.access,
                queue: &self.queue,
                sender: SenderId(sender),
                chat: ChatId(sender),
                bot_username: Some("relay_bot"),
                boot: Instant::now(),
            }
        }

        fn drain(&self) -> Vec<QueuedMessage> {
            let mut out = Vec::new();
            while self.queue.depth() > 0 {
                out.push(self.queue.pop().unwrap());
            }
            out
        }
    }

    #[test]
    fn command_table_is_sorted_for_binary_search() {
        for pair in COMMANDS.windows(2) {
            assert!(pair[0].0 < pair[1].0, "{} !< {}", pair[0].0, pair[1].0);
        }
    }

    #[test]
    fn start_and_help_reply_to_anyone() {
        let fx = Fixture::new();
        assert!(dispatch(&fx.ctx(5), "/start"));
        assert!(dispatch(&fx.ctx(5), "/help"));
        let replies = fx.drain();
        assert_eq!(replies.len(), 2);
        assert!(replies[0].text.contains("chat-relay"));
        assert!(replies[1].text.contains("/revoke"));
        assert_eq!(replies[0].sender, SenderId(5));
    }

    #[test]
    fn unknown_command_is_unhandled() {
        let fx = Fixture::new();
        assert!(!dispatch(&fx.ctx(5), "/frobnicate"));
        assert!(!dispatch(&fx.ctx(5), "not a command"));
        assert_eq!(fx.queue.depth(), 0);
    }

    #[test]
    fn foreign_bot_suffix_is_unhandled_own_is_handled() {
        let fx = Fixture::new();
        assert!(!dispatch(&fx.ctx(5), "/help@otherbot"));
        assert_eq!(fx.queue.depth(), 0);
        assert!(dispatch(&fx.ctx(5), "/help@relay_bot"));
        assert_eq!(fx.queue.depth(), 1);
    }

    #[test]
    fn admin_commands_deny_non_admin_but_count_as_handled() {
        let fx = Fixture::new();
        for text in ["/allow 888", "/revoke 888", "/status"] {
            assert!(dispatch(&fx.ctx(5), text), "{text} should be handled");
        }
        let replies = fx.drain();
        assert_eq!(replies.len(), 3);
        for r in replies {
            assert!(r.text.contains("permission denied"));
        }
        assert!(!fx.access.contains(SenderId(888)));
    }

    #[test]
    fn allow_enqueues_confirmation_and_grant_notice() {
        let fx = Fixture::new();
        assert!(dispatch(&fx.ctx(ADMIN.0), "/allow 888"));
        assert!(fx.access.contains(SenderId(888)));

        let replies = fx.drain();
        assert_eq!(replies.len(), 2);
        // One to the admin, one addressed to the target.
        let to_admin = replies.iter().find(|m| m.sender == ADMIN).unwrap();
        assert!(to_admin.text.contains("888"));
        let to_target = replies.iter().find(|m| m.sender == SenderId(888)).unwrap();
        assert_eq!(to_target.chat, ChatId(888));
        assert!(to_target.text.contains("granted access"));
    }

    #[test]
    fn allow_duplicate_reports_already_present() {
        let fx = Fixture::new();
        fx.access.add(SenderId(888)).unwrap();
        assert!(dispatch(&fx.ctx(ADMIN.0), "/allow 888"));
        let replies = fx.drain();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].text.contains("already"));
    }

    #[test]
    fn revoke_removes_and_reports() {
        let fx = Fixture::new();
        fx.access.add(SenderId(888)).unwrap();
        assert!(dispatch(&fx.ctx(ADMIN.0), "/revoke 888"));
        assert!(!fx.access.contains(SenderId(888)));
        let replies = fx.drain();
        assert!(replies[0].text.contains("revoked"));

        assert!(dispatch(&fx.ctx(ADMIN.0), "/revoke 888"));
        assert!(fx.drain()[0].text.contains("did not have access"));
    }

    #[test]
    fn bad_arguments_are_reported_in_band() {
        let fx = Fixture::new();
        for (text, expected) in [
            ("/allow", "Usage:"),
            ("/allow abc", "Invalid"),
            ("/allow 0", "Invalid"),
            ("/allow 12x", "Invalid"),
            ("/allow 888 trailing", "Invalid"),
            ("/revoke", "Usage:"),
            ("/revoke 99999999999999999999", "Invalid"),
        ] {
            assert!(dispatch(&fx.ctx(ADMIN.0), text), "{text}");
            let replies = fx.drain();
            assert_eq!(replies.len(), 1, "{text}");
            assert!(replies[0].text.contains(expected), "{text}: {}", replies[0].text);
        }
    }

    #[test]
    fn negative_target_ids_are_accepted() {
        // Group-style ids are negative; the platform allows them.
        let fx = Fixture::new();
        assert!(dispatch(&fx.ctx(ADMIN.0), "/allow -42"));
        assert!(fx.access.contains(SenderId(-42)));
    }

    #[test]
    fn status_reports_depth_access_and_workers() {
        let fx = Fixture::new();
        fx.access.add(SenderId(7)).unwrap();
        fx.queue.push(SenderId(9), ChatId(9), "pending").unwrap();

        assert!(dispatch(&fx.ctx(ADMIN.0), "/status"));
        let replies = fx.drain();
        let status = &replies
            .iter()
            .find(|m| m.text.contains("uptime"))
            .expect("status reply enqueued")
            .text;
        assert!(status.contains("uptime: 0h 0m"), "{status}");
        assert!(status.contains("queue: 1 pending"), "{status}");
        assert!(status.contains("access list: 1 user(s)"), "{status}");
        assert!(status.contains("workers: 1"), "{status}");
    }
}
