//! Parser for slash commands in message text.
//!
//! A pure parser that splits `/name[@botname] [args]` into the bare command
//! name and its argument tail. Routing and authorization live in the
//! dispatcher; this module only decides what was typed and whether it was
//! addressed to us.

/// A parsed slash command: bare name (no `/`) and the argument tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashCommand<'a> {
    pub name: &'a str,
    pub args: &'a str,
}

/// Parses a slash command out of `text`.
///
/// # Parsing Rules
///
/// - The text must start with `/` followed by a non-empty command name
/// - The name ends at the first space or `@`
/// - An `@botname` suffix addressed to `bot_username` (case-insensitive) is
///   consumed; a suffix addressed to a different bot makes the whole text
///   not-a-command (`None`) so it is left for that bot
/// - When no username is known yet, any suffix is skipped
/// - Whitespace between the command and its arguments is skipped
///
/// # Examples
///
/// ```
/// use chat_relay::commands::parse_slash;
///
/// let cmd = parse_slash("/allow 888", Some("relay_bot")).unwrap();
/// assert_eq!((cmd.name, cmd.args), ("allow", "888"));
///
/// let cmd = parse_slash("/help@Relay_Bot", Some("relay_bot")).unwrap();
/// assert_eq!((cmd.name, cmd.args), ("help", ""));
///
/// // Addressed to someone else entirely:
/// assert!(parse_slash("/help@other_bot", Some("relay_bot")).is_none());
/// ```
pub fn parse_slash<'a>(text: &'a str, bot_username: Option<&str>) -> Option<SlashCommand<'a>> {
    let rest = text.strip_prefix('/')?;

    let name_end = rest
        .find(|c: char| c == ' ' || c == '@')
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    if name.is_empty() {
        return None;
    }

    let mut after = &rest[name_end..];
    if let Some(suffix) = after.strip_prefix('@') {
        let mention_end = suffix.find(' ').unwrap_or(suffix.len());
        let mention = &suffix[..mention_end];
        match bot_username {
            Some(username) if mention.eq_ignore_ascii_case(username) => {
                after = &suffix[mention_end..];
            }
            // Addressed to a different bot: not ours to handle.
            Some(_) => return None,
            // Username not known yet; skip whatever suffix is there.
            None => after = &suffix[mention_end..],
        }
    }

    Some(SlashCommand {
        name,
        args: after.trim_start_matches(' '),
    })
}
