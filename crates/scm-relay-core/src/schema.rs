//! Normalized, provider-agnostic data shapes.
//!
//! Every adapter maps its provider's webhook and API vocabulary onto these
//! types; everything downstream of normalization depends on them and on
//! nothing provider-specific. All of them are values: created once by the
//! component that owns them and never mutated after being handed to the
//! queue.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Platform
// ============================================================================

/// Identifier of a source-code-management provider.
///
/// A closed enumeration: downstream consumers never see a provider's raw
/// header string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    GitHub,
    Bitbucket,
    Unknown,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GitHub => write!(f, "github"),
            Self::Bitbucket => write!(f, "bitbucket"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for Platform {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::GitHub),
            "bitbucket" => Ok(Self::Bitbucket),
            _ => Ok(Self::Unknown),
        }
    }
}

// ============================================================================
// File Status
// ============================================================================

/// Normalized change status of one file in a pull request.
///
/// Adapters own the mapping from provider-specific vocabulary; anything they
/// do not recognize becomes [`FileStatus::Modified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

impl FileStatus {
    /// Map a provider status string onto the normalized vocabulary,
    /// defaulting unknown values to `Modified`.
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "added" => Self::Added,
            "removed" => Self::Removed,
            "renamed" => Self::Renamed,
            "modified" => Self::Modified,
            _ => Self::Modified,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Removed => write!(f, "removed"),
            Self::Renamed => write!(f, "renamed"),
        }
    }
}

// ============================================================================
// Normalized Entities
// ============================================================================

/// Platform-agnostic pull request representation.
///
/// `number` together with the owning repository's `(owner, name)` uniquely
/// identifies a pull request across the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPr {
    pub number: u64,
    pub title: String,
    pub description: String,
    pub author: String,
    pub source_branch: String,
    pub target_branch: String,
    pub state: String,
    pub url: String,
}

/// Platform-agnostic repository representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRepository {
    pub name: String,
    pub full_name: String,
    pub owner: String,
    pub clone_url: String,
    pub html_url: String,
}

/// Platform-agnostic changed-file representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedFile {
    pub filename: String,
    pub status: FileStatus,
    pub additions: u64,
    pub deletions: u64,
    pub changes: u64,
    /// Set if and only if `status` is [`FileStatus::Renamed`].
    pub previous_filename: Option<String>,
}

impl NormalizedFile {
    /// Build a normalized file, enforcing the two cross-field rules:
    /// `changes` falls back to `additions + deletions` when the provider
    /// does not report it, and `previous_filename` is kept only for renames.
    pub fn new(
        filename: String,
        status: FileStatus,
        additions: u64,
        deletions: u64,
        changes: Option<u64>,
        previous_filename: Option<String>,
    ) -> Self {
        Self {
            filename,
            status,
            additions,
            deletions,
            changes: changes.unwrap_or(additions + deletions),
            previous_filename: if status == FileStatus::Renamed {
                previous_filename
            } else {
                None
            },
        }
    }
}

/// The unified event an adapter emits after normalizing a raw webhook.
///
/// This is the unit of work on the normalized-events queue and the only
/// contract the downstream sink depends on. `files` is populated only for
/// actions in the provider's file-enrichable set; enrichment is best-effort
/// and an empty list is an accepted degradation, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub platform: Platform,
    /// Unified event name, `"pull_request.<action>"`.
    pub event_type: String,
    /// Unified action, e.g. `"opened"`, `"synchronize"`, `"closed"`.
    pub action: String,
    pub pr: NormalizedPr,
    pub repository: NormalizedRepository,
    pub files: Vec<NormalizedFile>,
    #[serde(with = "payload_serde")]
    pub raw_payload: Bytes,
    pub received_at: DateTime<Utc>,
}

// ============================================================================
// Raw Webhook Message
// ============================================================================

/// The unit of work on the raw-events queue.
///
/// `payload` is the untouched provider payload bytes and `event_type` the raw
/// provider event-name string (e.g. `"pull_request"` or
/// `"pullrequest:created"`), not yet mapped to the normalized vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawWebhookMessage {
    pub platform: Platform,
    pub event_type: String,
    #[serde(with = "payload_serde")]
    pub payload: Bytes,
}

/// Base64 transport encoding for raw payload bytes.
mod payload_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
