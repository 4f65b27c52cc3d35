//! chat-relay - a multi-tenant chat-relay service.
//!
//! Ingests user messages from a messaging platform (webhook push or long
//! poll), gates them through a persisted access list, enqueues them per
//! sender with fairness and rate-limit guarantees, and dispatches replies
//! through a worker pool that consults an external text-completion service.

pub mod access;
pub mod commands;
pub mod completion;
pub mod config;
pub mod logging;
pub mod queue;
pub mod server;
pub mod shutdown;
pub mod telegram;
pub mod types;
pub mod update;
pub mod worker;
