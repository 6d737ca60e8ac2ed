//! Tests for the Bitbucket adapter, backed by a mock API server.

use super::*;
use crate::adapter::ScmAdapter;
use serde_json::json;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter_against(server: &MockServer) -> BitbucketAdapter {
    let config = BitbucketConfig {
        username: "relay-bot".to_string(),
        app_password: "secret".to_string(),
        api_base_url: server.uri(),
    };
    BitbucketAdapter::new(&config, reqwest::Client::new())
}

fn diffstat_entry(
    status: &str,
    new_path: Option<&str>,
    old_path: Option<&str>,
    added: u64,
    removed: u64,
) -> serde_json::Value {
    json!({
        "status": status,
        "lines_added": added,
        "lines_removed": removed,
        "new": new_path.map(|p| json!({ "path": p })),
        "old": old_path.map(|p| json!({ "path": p })),
    })
}

fn webhook_payload(number: u64) -> Vec<u8> {
    json!({
        "pullrequest": {
            "id": number,
            "title": "Add retry logic",
            "description": "Retries transient failures",
            "state": "OPEN",
            "author": { "nickname": "relaydev", "display_name": "Relay Dev" },
            "source": { "branch": { "name": "feature/retries" } },
            "destination": { "branch": { "name": "main" } },
            "links": { "html": { "href": format!("https://bitbucket.org/team/repo/pull-requests/{}", number) } },
        },
        "repository": {
            "name": "repo",
            "full_name": "team/repo",
            "links": {
                "html": { "href": "https://bitbucket.org/team/repo" },
                "clone": [
                    { "href": "git@bitbucket.org:team/repo.git", "name": "ssh" },
                    { "href": "https://bitbucket.org/team/repo.git", "name": "https" },
                ],
            },
        },
    })
    .to_string()
    .into_bytes()
}

#[test]
fn test_event_key_mapping() {
    assert_eq!(
        map_event_key("pullrequest:created"),
        ("pull_request.opened", "opened")
    );
    assert_eq!(
        map_event_key("pullrequest:updated"),
        ("pull_request.updated", "synchronize")
    );
    assert_eq!(
        map_event_key("pullrequest:fulfilled"),
        ("pull_request.closed", "closed")
    );
    assert_eq!(
        map_event_key("pullrequest:rejected"),
        ("pull_request.closed", "closed")
    );
    assert_eq!(
        map_event_key("repo:push"),
        ("pull_request.unknown", "unknown")
    );
}

#[tokio::test]
async fn test_pr_details_maps_and_lowercases_state() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories/team/repo/pullrequests/7"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "title": "Add retry logic",
            "description": "Retries transient failures",
            "state": "OPEN",
            "author": { "nickname": "relaydev", "display_name": "Relay Dev" },
            "source": { "branch": { "name": "feature/retries" } },
            "destination": { "branch": { "name": "main" } },
            "links": { "html": { "href": "https://bitbucket.org/team/repo/pull-requests/7" } },
        })))
        .mount(&server)
        .await;
    let adapter = adapter_against(&server);

    // Act
    let pr = adapter.pr_details("team", "repo", 7).await.unwrap();

    // Assert
    assert_eq!(pr.number, 7);
    assert_eq!(pr.author, "relaydev");
    assert_eq!(pr.state, "open");
    assert_eq!(pr.target_branch, "main");
}

#[tokio::test]
async fn test_pr_files_follows_next_links() {
    // Arrange - two diffstat pages chained by a next link
    let server = MockServer::start().await;
    let next_url = format!(
        "{}/repositories/team/repo/pullrequests/7/diffstat-page2",
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/repositories/team/repo/pullrequests/7/diffstat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [diffstat_entry("added", Some("src/new.rs"), None, 10, 0)],
            "next": next_url,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repositories/team/repo/pullrequests/7/diffstat-page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [diffstat_entry("removed", None, Some("src/gone.rs"), 0, 5)],
        })))
        .mount(&server)
        .await;
    let adapter = adapter_against(&server);

    // Act
    let files = adapter.pr_files("team", "repo", 7).await.unwrap();

    // Assert - removed files take their name from the old path
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].filename, "src/new.rs");
    assert_eq!(files[1].filename, "src/gone.rs");
    assert_eq!(files[1].status, FileStatus::Removed);
}

#[tokio::test]
async fn test_pr_files_rename_carries_previous_filename() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories/team/repo/pullrequests/7/diffstat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                diffstat_entry("renamed", Some("src/new_name.rs"), Some("src/old_name.rs"), 1, 1),
                diffstat_entry("modified", Some("src/lib.rs"), Some("src/lib.rs"), 4, 2),
            ],
        })))
        .mount(&server)
        .await;
    let adapter = adapter_against(&server);

    let files = adapter.pr_files("team", "repo", 7).await.unwrap();

    assert_eq!(files[0].previous_filename, Some("src/old_name.rs".to_string()));
    assert_eq!(files[0].changes, 2);
    // Non-renames never carry a previous filename, even though the
    // diffstat reports an old path for them.
    assert_eq!(files[1].previous_filename, None);
    assert_eq!(files[1].changes, 6);
}

#[tokio::test]
async fn test_normalize_created_event_enriches_files() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories/team/repo/pullrequests/7/diffstat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [diffstat_entry("added", Some("README.md"), None, 5, 0)],
        })))
        .mount(&server)
        .await;
    let adapter = adapter_against(&server);

    // Act
    let event = adapter
        .normalize_event("pullrequest:created", &webhook_payload(7))
        .await
        .unwrap();

    // Assert
    assert_eq!(event.platform, Platform::Bitbucket);
    assert_eq!(event.event_type, "pull_request.opened");
    assert_eq!(event.action, "opened");
    assert_eq!(event.repository.owner, "team");
    assert_eq!(event.repository.name, "repo");
    assert_eq!(
        event.repository.clone_url,
        "https://bitbucket.org/team/repo.git"
    );
    assert_eq!(event.files.len(), 1);
}

#[tokio::test]
async fn test_normalize_fulfilled_event_skips_enrichment() {
    // No diffstat mock mounted: any fetch attempt would fail the event.
    let server = MockServer::start().await;
    let adapter = adapter_against(&server);

    let event = adapter
        .normalize_event("pullrequest:fulfilled", &webhook_payload(7))
        .await
        .unwrap();

    assert_eq!(event.action, "closed");
    assert!(event.files.is_empty());
}

#[tokio::test]
async fn test_normalize_unknown_event_key() {
    let server = MockServer::start().await;
    let adapter = adapter_against(&server);

    let event = adapter
        .normalize_event("repo:push", &webhook_payload(7))
        .await
        .unwrap();

    assert_eq!(event.event_type, "pull_request.unknown");
    assert_eq!(event.action, "unknown");
    assert!(event.files.is_empty());
}

#[tokio::test]
async fn test_normalize_survives_enrichment_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories/team/repo/pullrequests/7/diffstat"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let adapter = adapter_against(&server);

    let event = adapter
        .normalize_event("pullrequest:updated", &webhook_payload(7))
        .await
        .unwrap();

    assert_eq!(event.action, "synchronize");
    assert!(event.files.is_empty());
}

#[tokio::test]
async fn test_normalize_is_repeatable_for_one_payload() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories/team/repo/pullrequests/7/diffstat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [diffstat_entry("added", Some("README.md"), None, 5, 0)],
        })))
        .mount(&server)
        .await;
    let adapter = adapter_against(&server);
    let payload = webhook_payload(7);

    // Act
    let first = adapter
        .normalize_event("pullrequest:created", &payload)
        .await
        .unwrap();
    let mut second = adapter
        .normalize_event("pullrequest:created", &payload)
        .await
        .unwrap();

    // Assert - runs agree on every field except the receipt timestamp
    assert!(second.received_at >= first.received_at);
    second.received_at = first.received_at;
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_normalize_rejects_malformed_payload() {
    let server = MockServer::start().await;
    let adapter = adapter_against(&server);

    let result = adapter
        .normalize_event("pullrequest:created", b"{{{")
        .await;

    assert!(matches!(result, Err(AdapterError::PayloadParse { .. })));
}

#[tokio::test]
async fn test_author_falls_back_to_display_name() {
    let server = MockServer::start().await;
    let adapter = adapter_against(&server);
    let payload = json!({
        "pullrequest": {
            "id": 7,
            "title": "t",
            "description": "",
            "state": "OPEN",
            "author": { "display_name": "Relay Dev" },
            "source": { "branch": { "name": "a" } },
            "destination": { "branch": { "name": "b" } },
            "links": { "html": { "href": "" } },
        },
        "repository": { "name": "repo", "full_name": "team/repo" },
    })
    .to_string()
    .into_bytes();

    let event = adapter
        .normalize_event("pullrequest:rejected", &payload)
        .await
        .unwrap();

    assert_eq!(event.pr.author, "Relay Dev");
}
