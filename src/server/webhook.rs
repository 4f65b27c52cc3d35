//! Webhook endpoint handler.
//!
//! Accepts pushed updates from the messaging platform, validates the shared
//! secret and content type, accumulates the body through the buffer pool,
//! and hands the parsed update to the configured callback.
//!
//! The platform treats any 200 as a delivery acknowledgment, so protocol
//! violations get their specific status code while a merely unparseable
//! body is acknowledged and dropped; re-delivery would not make it parse.
//!
//! # Responses
//!
//! - 200 OK: update accepted (or dropped after a JSON parse failure)
//! - 403 Forbidden: secret header mismatch
//! - 404 Not Found: any path or method other than `POST /webhook`
//! - 413 Payload Too Large: body over the 512 KiB ceiling
//! - 415 Unsupported Media Type: content type is not `application/json`

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use tracing::{debug, warn};

use super::AppState;
use super::buffer_pool::BodyBuffer;

/// Header carrying the shared secret, by platform convention.
pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// Webhook handler. Registered for every method on `/webhook`; anything but
/// POST is a 404 to keep the surface to exactly one endpoint.
pub async fn webhook_handler(State(state): State<AppState>, request: Request) -> Response {
    if request.method() != Method::POST {
        return not_found().await;
    }
    let (parts, body) = request.into_parts();

    // Secret check first: an unauthenticated peer gets no further work.
    // Skipped entirely when no secret is configured.
    if !state.secret().is_empty() {
        let presented = parts
            .headers
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(presented.as_bytes(), state.secret().as_bytes()) {
            warn!("webhook: secret mismatch");
            return (StatusCode::FORBIDDEN, "forbidden").into_response();
        }
    }

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !content_type_is_json(content_type) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type").into_response();
    }

    let mut buffer = state.buffer_pool().acquire();
    let oversized = accumulate_body(body, &mut buffer).await;
    if oversized {
        return (StatusCode::PAYLOAD_TOO_LARGE, "payload too large").into_response();
    }

    if !buffer.is_empty() {
        match serde_json::from_slice(buffer.as_slice()) {
            Ok(update) => state.deliver(update),
            Err(err) => {
                // Acknowledged anyway: the peer would only resend the same
                // unparseable bytes.
                debug!(error = %err, "webhook: dropping unparseable update");
            }
        }
    }

    (StatusCode::OK, "ok").into_response()
}

/// Fallback for every route other than the webhook endpoint.
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

/// Streams the request body into `buffer`. On overflow the remainder is
/// still consumed so the connection shuts down cleanly; returns whether the
/// ceiling was exceeded.
async fn accumulate_body(body: Body, buffer: &mut BodyBuffer) -> bool {
    let mut body = body;
    let mut oversized = false;
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Some(chunk) = frame.data_ref() {
                    if !oversized && buffer.extend(chunk).is_err() {
                        oversized = true;
                    }
                }
            }
            // The peer went away mid-body; whatever accumulated will fail
            // the JSON parse or be empty.
            Err(_) => break,
        }
    }
    oversized
}

/// Constant-time byte comparison for the shared secret.
///
/// Inspects `max(len_a, len_b) + 1` positions and folds every difference
/// into one accumulator, so the work done does not depend on where the
/// first mismatch sits or on which prefix matches.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let longest = a.len().max(b.len());
    let mut diff = (a.len() != b.len()) as u8;
    for i in 0..=longest {
        let byte_a = if i < a.len() { a[i] } else { 0 };
        let byte_b = if i < b.len() { b[i] } else { 0 };
        diff |= byte_a ^ byte_b;
    }
    diff == 0
}

/// Case-insensitive 16-byte prefix match for `application/json`, tolerating
/// parameters such as `; charset=utf-8`.
fn content_type_is_json(content_type: &str) -> bool {
    const JSON: &[u8; 16] = b"application/json";
    content_type.len() >= JSON.len()
        && content_type.as_bytes()[..JSON.len()].eq_ignore_ascii_case(JSON)
}
