//! SCM adapters and the platform router.
//!
//! One adapter per provider maps that provider's webhook payloads and REST
//! API responses onto the normalized schema. The router owns adapter
//! construction and the header-based platform detection used at ingress.
//!
//! # Module Organization
//!
//! - [`ScmAdapter`]: the per-provider capability
//! - [`PlatformRouter`]: adapter construction from static configuration
//! - [`detect_platform`]: webhook header sniffing
//! - [`github`], [`bitbucket`]: the provider implementations

use crate::config::ProvidersConfig;
use crate::error::AdapterError;
use crate::schema::{NormalizedEvent, NormalizedFile, NormalizedPr, Platform};
use std::sync::Arc;
use std::time::Duration;

pub mod bitbucket;
pub mod github;

pub use bitbucket::BitbucketAdapter;
pub use github::{GithubAdapter, RepositoryTree};

/// Webhook header identifying GitHub deliveries.
const GITHUB_EVENT_HEADER: &str = "x-github-event";

/// Webhook header identifying Bitbucket deliveries.
const BITBUCKET_EVENT_HEADER: &str = "x-event-key";

/// Default timeout for provider API calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Adapter Capability
// ============================================================================

/// Per-provider mapping onto the normalized schema.
#[async_trait::async_trait]
pub trait ScmAdapter: Send + Sync {
    /// The platform this adapter serves.
    fn platform(&self) -> Platform;

    /// Fetch pull request metadata from the provider API.
    async fn pr_details(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<NormalizedPr, AdapterError>;

    /// Fetch the changed-file list from the provider API.
    ///
    /// Pagination is handled internally; callers always see the complete
    /// list.
    async fn pr_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<NormalizedFile>, AdapterError>;

    /// Turn a raw webhook payload into a [`NormalizedEvent`].
    ///
    /// The event's `pr` and `repository` come straight from the payload. The
    /// file list is fetched from the provider API only when the action is in
    /// the provider's enrichable set and the PR number is non-zero; a failed
    /// fetch is logged and leaves `files` empty rather than failing the
    /// event.
    async fn normalize_event(
        &self,
        raw_event_type: &str,
        payload: &[u8],
    ) -> Result<NormalizedEvent, AdapterError>;
}

// ============================================================================
// Platform Detection
// ============================================================================

/// Identify the sending platform from webhook headers.
///
/// Never fails; requests carrying no known provider header map to
/// [`Platform::Unknown`] and are rejected by the caller.
pub fn detect_platform(headers: &http::HeaderMap) -> Platform {
    if headers.contains_key(GITHUB_EVENT_HEADER) {
        Platform::GitHub
    } else if headers.contains_key(BITBUCKET_EVENT_HEADER) {
        Platform::Bitbucket
    } else {
        Platform::Unknown
    }
}

// ============================================================================
// Platform Router
// ============================================================================

/// Constructs and hands out adapters for configured platforms.
///
/// All adapters are built once from static configuration; construction never
/// performs network calls. A platform without configuration has no adapter
/// and requests for it fail with a configuration error.
pub struct PlatformRouter {
    github: Option<Arc<GithubAdapter>>,
    bitbucket: Option<Arc<BitbucketAdapter>>,
}

impl PlatformRouter {
    /// Build adapters for every configured provider.
    pub fn new(config: &ProvidersConfig) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::Configuration {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        let github = match &config.github {
            Some(github_config) => Some(Arc::new(GithubAdapter::new(
                github_config,
                http.clone(),
            )?)),
            None => None,
        };
        let bitbucket = config
            .bitbucket
            .as_ref()
            .map(|bitbucket_config| Arc::new(BitbucketAdapter::new(bitbucket_config, http)));

        Ok(Self { github, bitbucket })
    }

    /// The GitHub adapter, for GitHub-only surfaces like repository tree
    /// listing.
    pub fn github(&self) -> Option<Arc<GithubAdapter>> {
        self.github.clone()
    }

    /// Resolve the adapter for a platform.
    pub fn adapter_for(&self, platform: Platform) -> Result<Arc<dyn ScmAdapter>, AdapterError> {
        match platform {
            Platform::GitHub => self
                .github
                .clone()
                .map(|adapter| adapter as Arc<dyn ScmAdapter>)
                .ok_or_else(|| AdapterError::Configuration {
                    message: "GitHub is not configured".to_string(),
                }),
            Platform::Bitbucket => self
                .bitbucket
                .clone()
                .map(|adapter| adapter as Arc<dyn ScmAdapter>)
                .ok_or_else(|| AdapterError::Configuration {
                    message: "Bitbucket is not configured".to_string(),
                }),
            Platform::Unknown => Err(AdapterError::Configuration {
                message: "Cannot construct an adapter for an unknown platform".to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
