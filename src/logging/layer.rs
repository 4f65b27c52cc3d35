//! Bridge from `tracing` events into the circular store.
//!
//! The layer renders each event to a single line: the message first, then
//! any structured fields as `key=value` pairs, matching how the rest of the
//! codebase phrases its logging calls.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;

use super::{CircularLog, LogLevel};

/// A `tracing_subscriber` layer that writes every event to a [`CircularLog`].
pub struct CircularLogLayer {
    log: Arc<CircularLog>,
}

impl CircularLogLayer {
    pub fn new(log: Arc<CircularLog>) -> Self {
        CircularLogLayer { log }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CircularLogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = LogLevel::from_tracing(event.metadata().level());
        if level < self.log.min_level() {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        self.log.write(level, &visitor.render());
    }
}

/// Collects an event's message and fields into one line.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn render(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }

    fn push_field(&mut self, name: &str, value: impl std::fmt::Display) {
        let _ = write!(self.fields, " {name}={value}");
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;
    use tempfile::tempdir;

    fn with_layer(log: Arc<CircularLog>, f: impl FnOnce()) {
        let subscriber =
            tracing_subscriber::registry().with(CircularLogLayer::new(Arc::clone(&log)));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn events_land_in_the_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.log");
        let log = Arc::new(CircularLog::init(&path, 65536).unwrap());

        with_layer(Arc::clone(&log), || {
            tracing::info!("plain message");
            tracing::warn!(sender = 42, "with a field");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[INFO ] plain message"));
        assert!(contents.contains("[WARN ] with a field sender=42"));
    }

    #[test]
    fn debug_events_respect_the_level_gate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.log");
        let log = Arc::new(CircularLog::init(&path, 65536).unwrap());
        // Default minimum is Info.
        with_layer(Arc::clone(&log), || {
            tracing::debug!("quiet");
            tracing::info!("loud");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("quiet"));
        assert!(contents.contains("loud"));
    }

    #[test]
    fn lowering_the_gate_admits_debug() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.log");
        let log = Arc::new(CircularLog::init(&path, 65536).unwrap());
        log.set_min_level(LogLevel::Debug);
        with_layer(Arc::clone(&log), || {
            tracing::debug!("now visible");
        });
        assert!(std::fs::read_to_string(&path).unwrap().contains("now visible"));
    }
}
