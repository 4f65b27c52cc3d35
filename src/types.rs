//! Newtype wrappers for platform identifiers.
//!
//! Sender and chat identifiers are opaque signed 64-bit integers assigned by
//! the messaging platform. Zero is reserved as "unset" and is never a valid
//! identifier; the command layer rejects it on input.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The identifier of a message sender (a platform user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(pub i64);

impl SenderId {
    /// Returns true for the reserved "unset" identifier.
    pub fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SenderId {
    fn from(n: i64) -> Self {
        SenderId(n)
    }
}

/// The identifier of a chat (private, group, or supergroup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(n: i64) -> Self {
        ChatId(n)
    }
}
