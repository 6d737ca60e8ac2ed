//! Tests for the normalized event schema.

use super::*;
use chrono::Utc;

fn sample_pr() -> NormalizedPr {
    NormalizedPr {
        number: 42,
        title: "Add retry logic".to_string(),
        description: "Retries transient failures".to_string(),
        author: "octocat".to_string(),
        source_branch: "feature/retries".to_string(),
        target_branch: "main".to_string(),
        state: "open".to_string(),
        url: "https://github.com/octocat/hello-world/pull/42".to_string(),
    }
}

fn sample_repository() -> NormalizedRepository {
    NormalizedRepository {
        name: "hello-world".to_string(),
        full_name: "octocat/hello-world".to_string(),
        owner: "octocat".to_string(),
        clone_url: "https://github.com/octocat/hello-world.git".to_string(),
        html_url: "https://github.com/octocat/hello-world".to_string(),
    }
}

#[test]
fn test_file_status_parse_known_values() {
    assert_eq!(FileStatus::parse("added"), FileStatus::Added);
    assert_eq!(FileStatus::parse("modified"), FileStatus::Modified);
    assert_eq!(FileStatus::parse("removed"), FileStatus::Removed);
    assert_eq!(FileStatus::parse("renamed"), FileStatus::Renamed);
}

#[test]
fn test_file_status_parse_is_case_insensitive() {
    assert_eq!(FileStatus::parse("Added"), FileStatus::Added);
    assert_eq!(FileStatus::parse("REMOVED"), FileStatus::Removed);
}

#[test]
fn test_file_status_parse_defaults_unknown_to_modified() {
    assert_eq!(FileStatus::parse("copied"), FileStatus::Modified);
    assert_eq!(FileStatus::parse("changed"), FileStatus::Modified);
    assert_eq!(FileStatus::parse(""), FileStatus::Modified);
}

#[test]
fn test_platform_round_trips_through_serde() {
    let json = serde_json::to_string(&Platform::GitHub).unwrap();
    assert_eq!(json, "\"github\"");

    let platform: Platform = serde_json::from_str("\"bitbucket\"").unwrap();
    assert_eq!(platform, Platform::Bitbucket);
}

#[test]
fn test_normalized_file_changes_falls_back_to_sum() {
    let file = NormalizedFile::new(
        "src/main.rs".to_string(),
        FileStatus::Modified,
        10,
        3,
        None,
        None,
    );

    assert_eq!(file.changes, 13);
}

#[test]
fn test_normalized_file_keeps_reported_changes() {
    let file = NormalizedFile::new(
        "src/main.rs".to_string(),
        FileStatus::Modified,
        10,
        3,
        Some(15),
        None,
    );

    assert_eq!(file.changes, 15);
}

#[test]
fn test_previous_filename_kept_only_for_renames() {
    let renamed = NormalizedFile::new(
        "src/new.rs".to_string(),
        FileStatus::Renamed,
        1,
        1,
        None,
        Some("src/old.rs".to_string()),
    );
    assert_eq!(renamed.previous_filename, Some("src/old.rs".to_string()));

    let modified = NormalizedFile::new(
        "src/main.rs".to_string(),
        FileStatus::Modified,
        1,
        1,
        None,
        Some("src/old.rs".to_string()),
    );
    assert_eq!(modified.previous_filename, None);
}

#[test]
fn test_normalized_event_serialization_round_trip() {
    // Arrange - a payload with bytes that are not valid UTF-8
    let event = NormalizedEvent {
        platform: Platform::GitHub,
        event_type: "pull_request.opened".to_string(),
        action: "opened".to_string(),
        pr: sample_pr(),
        repository: sample_repository(),
        files: vec![NormalizedFile::new(
            "README.md".to_string(),
            FileStatus::Added,
            5,
            0,
            None,
            None,
        )],
        raw_payload: Bytes::from(vec![0x7b, 0x22, 0xff, 0x7d]),
        received_at: Utc::now(),
    };

    // Act
    let json = serde_json::to_string(&event).unwrap();
    let decoded: NormalizedEvent = serde_json::from_str(&json).unwrap();

    // Assert
    assert_eq!(decoded, event);
}

#[test]
fn test_raw_webhook_message_preserves_payload_bytes() {
    let payload = Bytes::from(r#"{"action":"opened"}"#);
    let message = RawWebhookMessage {
        platform: Platform::Bitbucket,
        event_type: "pullrequest:created".to_string(),
        payload: payload.clone(),
    };

    let json = serde_json::to_string(&message).unwrap();
    let decoded: RawWebhookMessage = serde_json::from_str(&json).unwrap();

    assert_eq!(decoded.payload, payload);
    assert_eq!(decoded.event_type, "pullrequest:created");
}
