//! Webhook gateway.
//!
//! Per-request state machine: `Received → SignatureVerified → Acknowledged
//! → Published`, with early exits for malformed requests and signature
//! mismatches. The 200 response is sent as soon as the signature checks
//! out; queue publication happens afterwards on a spawned task so broker
//! trouble can never slow down or fail the acknowledgment the provider is
//! waiting for.

use crate::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use queue_broker::{BrokerClient, QueueName};
use scm_relay_core::{detect_platform, Platform, RawWebhookMessage};
use sha2::Sha256;
use tracing::{info, instrument, warn};

/// GitHub's signature header. Checked first.
const SIGNATURE_HEADER_SHA256: &str = "x-hub-signature-256";

/// Bitbucket's signature header, same `sha256=<hex>` convention.
const SIGNATURE_HEADER: &str = "x-hub-signature";

// ============================================================================
// Signature Verification
// ============================================================================

/// Verify an HMAC-SHA256 webhook signature over the raw body bytes.
///
/// Accepts `sha256=<hex>` or a bare hex digest. The digest comparison is
/// constant time.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    type HmacSha256 = Hmac<Sha256>;

    let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(sig_bytes) = hex::decode(hex_part) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Extract the signature header value, preferring the SHA-256 variant.
fn signature_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SIGNATURE_HEADER_SHA256)
        .or_else(|| headers.get(SIGNATURE_HEADER))
        .and_then(|value| value.to_str().ok())
}

/// Extract the raw provider event-type string for the platform.
fn raw_event_type(headers: &HeaderMap, platform: Platform) -> Option<String> {
    let header = match platform {
        Platform::GitHub => "x-github-event",
        Platform::Bitbucket => "x-event-key",
        Platform::Unknown => return None,
    };
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Whether the raw event type names a pull-request-class event.
fn is_pull_request_event(platform: Platform, raw_event_type: &str) -> bool {
    match platform {
        Platform::GitHub => raw_event_type == "pull_request",
        Platform::Bitbucket => raw_event_type.starts_with("pullrequest:"),
        Platform::Unknown => false,
    }
}

// ============================================================================
// Handler
// ============================================================================

/// Handle an inbound provider webhook.
///
/// Responses: `200` with a fixed body once the signature verifies, `400`
/// for unidentifiable senders or a missing signature, `401` on signature
/// mismatch, `500` when no signing secret is configured for the platform.
#[instrument(skip(state, headers, body), fields(body_len = body.len()))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let platform = detect_platform(&headers);
    if platform == Platform::Unknown {
        warn!("Webhook carries no known provider header, rejecting");
        return (StatusCode::BAD_REQUEST, "unknown provider").into_response();
    }

    let Some(secret) = state.config.webhooks.secret_for(platform) else {
        warn!(platform = %platform, "No webhook secret configured for platform");
        return (StatusCode::INTERNAL_SERVER_ERROR, "webhook secret not configured")
            .into_response();
    };

    let Some(signature) = signature_from(&headers) else {
        warn!(platform = %platform, "Webhook signature header missing");
        return (StatusCode::BAD_REQUEST, "signature missing").into_response();
    };

    if !verify_signature(&body, signature, secret) {
        warn!(platform = %platform, "Webhook signature verification failed");
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let event_type = raw_event_type(&headers, platform).unwrap_or_default();
    info!(platform = %platform, event_type = %event_type, "Webhook signature verified");

    // The 200 below is already decided; everything from here on is off the
    // response's critical path.
    tokio::spawn(publish_raw_event(
        state.broker.clone(),
        state.raw_queue.clone(),
        RawWebhookMessage {
            platform,
            event_type,
            payload: body,
        },
    ));

    (StatusCode::OK, "received").into_response()
}

/// Filter and publish one verified webhook to the raw-events queue.
///
/// Failures are logged and swallowed: the HTTP response has already been
/// sent, so a broker problem can only cost this one event.
async fn publish_raw_event(
    broker: Option<std::sync::Arc<BrokerClient>>,
    queue: QueueName,
    message: RawWebhookMessage,
) {
    if !is_pull_request_event(message.platform, &message.event_type) {
        info!(
            platform = %message.platform,
            event_type = %message.event_type,
            "Ignoring non-pull-request event"
        );
        return;
    }

    let Some(broker) = broker else {
        warn!(
            platform = %message.platform,
            event_type = %message.event_type,
            "Queue broker unavailable, dropping event"
        );
        return;
    };

    match broker.publish(&queue, &message).await {
        Ok(message_id) => {
            info!(
                platform = %message.platform,
                event_type = %message.event_type,
                message_id = %message_id,
                "Published raw event"
            );
        }
        Err(error) => {
            warn!(
                platform = %message.platform,
                event_type = %message.event_type,
                error = %error,
                "Failed to publish raw event, dropping"
            );
        }
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
