//! Circular log backing store and its `tracing` bridge.
//!
//! All components emit diagnostics through the `tracing` macros. At startup
//! the binary installs [`CircularLogLayer`], which renders each event to a
//! single line and hands it to [`CircularLog`]: a bounded single-file store
//! that wraps around when full and recovers its write position after a
//! restart. Every line is mirrored to stderr for journal capture.
//!
//! The `logs` subcommand reads the store back through [`tail`] and
//! [`follow`] without going through the writer.

mod circular;
mod layer;
mod reader;

pub use circular::{CircularLog, LogError, MARKER};
pub use layer::CircularLogLayer;
pub use reader::{follow, tail};

/// Severity of a log line, ordered by importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    /// Five-character tag used in the line format.
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
        }
    }

    /// Parses a configuration value; unknown names fall back to `Info`.
    pub fn parse(name: &str) -> LogLevel {
        match name.to_ascii_lowercase().as_str() {
            "debug" | "trace" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    fn from_tracing(level: &tracing::Level) -> LogLevel {
        match *level {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }

    fn from_u8(raw: u8) -> LogLevel {
        match raw {
            0 => LogLevel::Debug,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}
