//! HTTP ingress for pushed updates.
//!
//! The server exposes exactly one endpoint, `POST /webhook`; everything else
//! is a 404. Validated updates are handed to the configured callback, which
//! takes ownership of the parsed JSON tree; the callback is where ingress
//! meets the dispatch core (access gate, command routing, queue push).

use std::sync::Arc;

use serde_json::Value;

mod buffer_pool;
pub mod webhook;

pub use buffer_pool::{BODY_MAX, BodyBuffer, BodyTooLarge, BufferPool};
pub use webhook::{SECRET_HEADER, constant_time_eq, webhook_handler};

/// Callback invoked with each successfully parsed update.
pub type UpdateCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Shared application state, passed to handlers via Axum's `State`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Expected value of the secret header. Empty disables the check.
    secret: String,

    /// Pool of request-body accumulation buffers.
    buffer_pool: BufferPool,

    /// Receives ownership of each parsed update.
    update_callback: UpdateCallback,
}

impl AppState {
    /// Creates ingress state with the given shared secret, buffer-pool size
    /// (clamped to [1, 64]), and update callback.
    pub fn new(secret: impl Into<String>, pool_size: usize, callback: UpdateCallback) -> AppState {
        AppState {
            inner: Arc::new(AppStateInner {
                secret: secret.into(),
                buffer_pool: BufferPool::new(pool_size),
                update_callback: callback,
            }),
        }
    }

    pub fn secret(&self) -> &str {
        &self.inner.secret
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.inner.buffer_pool
    }

    /// Hands a parsed update to the callback.
    pub fn deliver(&self, update: Value) {
        (self.inner.update_callback)(update);
    }
}

/// Builds the axum router: the webhook endpoint plus a 404 fallback.
///
/// The endpoint is registered for every method; the handler itself rejects
/// non-POST with 404 so the surface is exactly one method on one path.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::routing::any;

    axum::Router::new()
        .route("/webhook", any(webhook_handler))
        .fallback(webhook::not_found)
        .with_state(state)
}
