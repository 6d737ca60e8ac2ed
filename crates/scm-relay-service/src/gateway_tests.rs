//! Tests for the webhook gateway.

use super::*;
use crate::config::ServiceConfig;
use crate::create_router;
use axum::body::Body;
use axum::http::Request;
use chrono::Duration as ChronoDuration;
use queue_broker::{BrokerConfig, InMemoryConfig, InMemoryProvider, QueueProvider};
use scm_relay_core::{PlatformRouter, ProvidersConfig};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "test-webhook-secret";

fn sign(payload: &[u8], secret: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.webhooks.github_secret = Some(SECRET.to_string());
    config.webhooks.bitbucket_secret = Some(SECRET.to_string());
    config
}

fn state_with_broker(config: ServiceConfig) -> (AppState, InMemoryProvider) {
    let provider = InMemoryProvider::new(InMemoryConfig::default());
    let client = BrokerClient::with_provider(
        Box::new(provider.clone()),
        BrokerConfig::default(),
    );
    let state = AppState::new(
        Arc::new(config),
        Some(Arc::new(client)),
        Arc::new(PlatformRouter::new(&ProvidersConfig::default()).unwrap()),
    )
    .unwrap();
    (state, provider)
}

async fn declare_raw_queue(state: &AppState) {
    state
        .broker
        .as_ref()
        .unwrap()
        .declare_queues(&[state.raw_queue.clone()])
        .await
        .unwrap();
}

fn webhook_request(event_header: (&str, &str), signature: Option<&str>, body: &[u8]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(event_header.0, event_header.1)
        .header("Content-Type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("X-Hub-Signature-256", signature);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

async fn wait_for_depth(provider: &InMemoryProvider, queue: &QueueName, depth: usize) {
    for _ in 0..100 {
        if provider.queue_depth(queue) == depth {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("queue did not reach depth {} within 1s", depth);
}

#[test]
fn test_verify_signature_accepts_valid_digest() {
    let payload = br#"{"action":"opened"}"#;
    let signature = sign(payload, SECRET);

    assert!(verify_signature(payload, &signature, SECRET));
}

#[test]
fn test_verify_signature_accepts_bare_hex_digest() {
    let payload = br#"{"action":"opened"}"#;
    let signature = sign(payload, SECRET);
    let bare = signature.strip_prefix("sha256=").unwrap();

    assert!(verify_signature(payload, bare, SECRET));
}

#[test]
fn test_verify_signature_rejects_wrong_secret() {
    let payload = br#"{"action":"opened"}"#;
    let signature = sign(payload, "other-secret");

    assert!(!verify_signature(payload, &signature, SECRET));
}

#[test]
fn test_verify_signature_rejects_non_hex() {
    assert!(!verify_signature(b"payload", "sha256=zzzz", SECRET));
}

#[test]
fn test_pull_request_event_filter() {
    assert!(is_pull_request_event(Platform::GitHub, "pull_request"));
    assert!(!is_pull_request_event(Platform::GitHub, "push"));
    assert!(is_pull_request_event(
        Platform::Bitbucket,
        "pullrequest:created"
    ));
    assert!(!is_pull_request_event(Platform::Bitbucket, "repo:push"));
    assert!(!is_pull_request_event(Platform::Unknown, "pull_request"));
}

#[tokio::test]
async fn test_valid_webhook_is_acknowledged_and_published() {
    // Arrange
    let (state, provider) = state_with_broker(test_config());
    declare_raw_queue(&state).await;
    let app = create_router(state.clone());

    let body = br#"{"action":"opened","number":42}"#;
    let request = webhook_request(
        ("X-GitHub-Event", "pull_request"),
        Some(&sign(body, SECRET)),
        body,
    );

    // Act
    let response = app.oneshot(request).await.unwrap();

    // Assert - immediate 200, message appears on the raw queue afterwards
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_depth(&provider, &state.raw_queue, 1).await;

    let received = provider
        .receive_message(&state.raw_queue, ChronoDuration::milliseconds(100))
        .await
        .unwrap()
        .unwrap();
    let message: RawWebhookMessage = serde_json::from_slice(&received.body).unwrap();
    assert_eq!(message.platform, Platform::GitHub);
    assert_eq!(message.event_type, "pull_request");
    assert_eq!(message.payload.as_ref(), body);
}

#[tokio::test]
async fn test_non_pull_request_event_is_acknowledged_but_dropped() {
    let (state, provider) = state_with_broker(test_config());
    declare_raw_queue(&state).await;
    let app = create_router(state.clone());

    let body = br#"{"ref":"refs/heads/main"}"#;
    let request = webhook_request(
        ("X-GitHub-Event", "push"),
        Some(&sign(body, SECRET)),
        body,
    );

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Give the spawned task time to (not) publish.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(provider.queue_depth(&state.raw_queue), 0);
}

#[tokio::test]
async fn test_bitbucket_event_key_routes_to_bitbucket() {
    let (state, provider) = state_with_broker(test_config());
    declare_raw_queue(&state).await;
    let app = create_router(state.clone());

    let body = br#"{"pullrequest":{"id":7}}"#;
    let request = webhook_request(
        ("X-Event-Key", "pullrequest:created"),
        Some(&sign(body, SECRET)),
        body,
    );

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    wait_for_depth(&provider, &state.raw_queue, 1).await;
}

#[tokio::test]
async fn test_missing_signature_is_bad_request() {
    let (state, _provider) = state_with_broker(test_config());
    let app = create_router(state);

    let request = webhook_request(("X-GitHub-Event", "pull_request"), None, b"{}");
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_signature_is_unauthorized() {
    let (state, _provider) = state_with_broker(test_config());
    let app = create_router(state);

    let body = br#"{"action":"opened"}"#;
    let request = webhook_request(
        ("X-GitHub-Event", "pull_request"),
        Some(&sign(body, "wrong-secret")),
        body,
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_provider_is_bad_request() {
    let (state, _provider) = state_with_broker(test_config());
    let app = create_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_secret_is_internal_error() {
    let (state, _provider) = state_with_broker(ServiceConfig::default());
    let app = create_router(state);

    let body = br#"{"action":"opened"}"#;
    let request = webhook_request(
        ("X-GitHub-Event", "pull_request"),
        Some(&sign(body, SECRET)),
        body,
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_broker_outage_still_returns_ok() {
    // Broker is None: the event can only be dropped, but the provider
    // must still get its acknowledgment.
    let state = AppState::new(
        Arc::new(test_config()),
        None,
        Arc::new(PlatformRouter::new(&ProvidersConfig::default()).unwrap()),
    )
    .unwrap();
    let app = create_router(state);

    let body = br#"{"action":"opened"}"#;
    let request = webhook_request(
        ("X-GitHub-Event", "pull_request"),
        Some(&sign(body, SECRET)),
        body,
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
