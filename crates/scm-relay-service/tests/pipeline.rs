//! End-to-end pipeline test: webhook in, sink delivery out.
//!
//! Runs the real gateway, both consumer loops, and an in-memory broker
//! against a mock GitHub API and a mock downstream sink.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Duration as ChronoDuration;
use hmac::{Hmac, Mac};
use queue_broker::{
    run_consumer, BrokerClient, BrokerConfig, InMemoryConfig, InMemoryProvider, QueueName,
};
use scm_relay_core::{GithubConfig, NormalizedEvent, PlatformRouter, ProvidersConfig};
use scm_relay_service::config::ServiceConfig;
use scm_relay_service::delivery::DeliveryHandler;
use scm_relay_service::normalizer::NormalizationHandler;
use scm_relay_service::{create_router, AppState, NORMALIZED_EVENTS_QUEUE, RAW_EVENTS_QUEUE};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "pipeline-secret";

const TEST_APP_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../scm-relay-core/tests/fixtures/test_app_key.pem"
));

fn sign(payload: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn github_webhook(action: &str) -> Vec<u8> {
    json!({
        "action": action,
        "number": 42,
        "pull_request": {
            "number": 42,
            "title": "Add retry logic",
            "body": "Retries transient failures",
            "user": { "login": "octocat" },
            "head": { "ref": "feature/retries" },
            "base": { "ref": "main" },
            "state": "open",
            "html_url": "https://github.com/octocat/hello-world/pull/42",
        },
        "repository": {
            "name": "hello-world",
            "full_name": "octocat/hello-world",
            "owner": { "login": "octocat" },
            "clone_url": "https://github.com/octocat/hello-world.git",
            "html_url": "https://github.com/octocat/hello-world",
        },
    })
    .to_string()
    .into_bytes()
}

/// Mock the GitHub App auth flow and the changed-files endpoint.
async fn mount_github_api(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/octocat/hello-world/installation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 777 })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/app/installations/777/access_tokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "ghs_pipeline",
            "expires_at": "2099-01-01T00:00:00Z",
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/hello-world/pulls/42/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "filename": "src/retry.rs",
                "status": "added",
                "additions": 10,
                "deletions": 2,
                "changes": 12,
            },
            {
                "filename": "docs/old.md",
                "status": "removed",
                "additions": 0,
                "deletions": 5,
                "changes": 5,
            },
            {
                "filename": "src/backoff.rs",
                "status": "renamed",
                "additions": 1,
                "deletions": 1,
                "changes": 2,
                "previous_filename": "src/delay.rs",
            },
        ])))
        .mount(server)
        .await;
}

struct Pipeline {
    app: axum::Router,
    consumers: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for consumer in &self.consumers {
            consumer.abort();
        }
    }
}

/// Wire gateway, both consumers, and an in-memory broker together.
async fn start_pipeline(github_api: &MockServer, sink_url: String) -> Pipeline {
    let provider = InMemoryProvider::new(InMemoryConfig::default());
    let broker = Arc::new(BrokerClient::with_provider(
        Box::new(provider.clone()),
        BrokerConfig {
            receive_timeout: ChronoDuration::milliseconds(50),
            ..BrokerConfig::default()
        },
    ));

    let raw_queue = QueueName::new(RAW_EVENTS_QUEUE.to_string()).unwrap();
    let normalized_queue = QueueName::new(NORMALIZED_EVENTS_QUEUE.to_string()).unwrap();
    broker
        .declare_queues(&[raw_queue.clone(), normalized_queue.clone()])
        .await
        .unwrap();

    let providers = ProvidersConfig {
        github: Some(GithubConfig {
            app_id: 12345,
            private_key_pem: TEST_APP_KEY.to_string(),
            api_base_url: github_api.uri(),
        }),
        bitbucket: None,
    };
    let router = Arc::new(PlatformRouter::new(&providers).unwrap());

    let normalization =
        NormalizationHandler::new(broker.clone(), router.clone(), normalized_queue.clone());
    let normalizer_loop = tokio::spawn({
        let broker = broker.clone();
        let raw_queue = raw_queue.clone();
        async move {
            let _ = run_consumer(broker, raw_queue, normalization).await;
        }
    });

    let delivery = DeliveryHandler::new(Some(sink_url), Duration::from_secs(10)).unwrap();
    let delivery_loop = tokio::spawn({
        let broker = broker.clone();
        let normalized_queue = normalized_queue.clone();
        async move {
            let _ = run_consumer(broker, normalized_queue, delivery).await;
        }
    });

    let mut config = ServiceConfig::default();
    config.webhooks.github_secret = Some(SECRET.to_string());
    let state = AppState::new(Arc::new(config), Some(broker), router).unwrap();

    Pipeline {
        app: create_router(state),
        consumers: vec![normalizer_loop, delivery_loop],
    }
}

async fn post_webhook(app: axum::Router, body: Vec<u8>) -> StatusCode {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("X-GitHub-Event", "pull_request")
        .header("X-Hub-Signature-256", sign(&body))
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap().status()
}

async fn wait_for_sink(sink: &MockServer, expected: usize) -> Vec<NormalizedEvent> {
    for _ in 0..100 {
        let requests = sink.received_requests().await.unwrap_or_default();
        if requests.len() >= expected {
            return requests
                .iter()
                .map(|r| serde_json::from_slice(&r.body).unwrap())
                .collect();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("sink did not receive {} events within 2s", expected);
}

#[tokio::test]
async fn test_opened_pr_flows_to_sink_with_files() {
    // Arrange
    let github_api = MockServer::start().await;
    mount_github_api(&github_api).await;
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&sink)
        .await;
    let pipeline = start_pipeline(&github_api, format!("{}/events", sink.uri())).await;

    // Act
    let status = post_webhook(pipeline.app.clone(), github_webhook("opened")).await;

    // Assert - gateway acknowledged immediately, event arrived enriched
    assert_eq!(status, StatusCode::OK);
    let events = wait_for_sink(&sink, 1).await;
    let event = &events[0];
    assert_eq!(event.action, "opened");
    assert_eq!(event.event_type, "pull_request.opened");
    assert_eq!(event.pr.number, 42);
    assert_eq!(event.repository.full_name, "octocat/hello-world");
    assert_eq!(event.files.len(), 3);
    let renamed = event
        .files
        .iter()
        .find(|f| f.filename == "src/backoff.rs")
        .unwrap();
    assert_eq!(renamed.previous_filename, Some("src/delay.rs".to_string()));
}

#[tokio::test]
async fn test_closed_pr_flows_to_sink_without_files() {
    let github_api = MockServer::start().await;
    mount_github_api(&github_api).await;
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&sink)
        .await;
    let pipeline = start_pipeline(&github_api, format!("{}/events", sink.uri())).await;

    let status = post_webhook(pipeline.app.clone(), github_webhook("closed")).await;

    assert_eq!(status, StatusCode::OK);
    let events = wait_for_sink(&sink, 1).await;
    assert_eq!(events[0].action, "closed");
    assert!(events[0].files.is_empty());
}
