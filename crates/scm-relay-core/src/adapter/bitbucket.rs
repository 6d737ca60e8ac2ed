//! Bitbucket Cloud adapter.
//!
//! Maps Bitbucket pull request webhooks and the v2 REST API onto the
//! normalized schema. API calls authenticate with an app password over
//! HTTP basic auth.

use crate::auth::{BitbucketAppPassword, CredentialProvider};
use crate::config::BitbucketConfig;
use crate::error::AdapterError;
use crate::schema::{
    FileStatus, NormalizedEvent, NormalizedFile, NormalizedPr, NormalizedRepository, Platform,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;

// ============================================================================
// Wire Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    pullrequest: PullRequest,
    repository: Repository,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PullRequest {
    id: u64,
    title: String,
    description: String,
    state: String,
    author: Account,
    source: BranchSide,
    destination: BranchSide,
    links: PrLinks,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Account {
    nickname: String,
    display_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BranchSide {
    branch: Branch,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Branch {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrLinks {
    html: Link,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Link {
    href: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Repository {
    name: String,
    full_name: String,
    links: RepositoryLinks,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RepositoryLinks {
    html: Link,
    clone: Vec<CloneLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CloneLink {
    href: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DiffstatPage {
    values: Vec<DiffstatEntry>,
    next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DiffstatEntry {
    status: String,
    lines_added: u64,
    lines_removed: u64,
    new: Option<PathHolder>,
    old: Option<PathHolder>,
}

#[derive(Debug, Deserialize)]
struct PathHolder {
    path: String,
}

// ============================================================================
// Event Key Mapping
// ============================================================================

/// Map a Bitbucket `X-Event-Key` value onto the unified `(event_type,
/// action)` vocabulary. Both merge and decline collapse to `closed`.
fn map_event_key(key: &str) -> (&'static str, &'static str) {
    match key {
        "pullrequest:created" => ("pull_request.opened", "opened"),
        "pullrequest:updated" => ("pull_request.updated", "synchronize"),
        "pullrequest:fulfilled" => ("pull_request.closed", "closed"),
        "pullrequest:rejected" => ("pull_request.closed", "closed"),
        _ => ("pull_request.unknown", "unknown"),
    }
}

/// Bitbucket reports author identity in two fields; `nickname` is the
/// stable one but older payloads only carry `display_name`.
fn author_name(account: &Account) -> String {
    if account.nickname.is_empty() {
        account.display_name.clone()
    } else {
        account.nickname.clone()
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Bitbucket Cloud implementation of [`super::ScmAdapter`].
pub struct BitbucketAdapter {
    auth: BitbucketAppPassword,
    api_base_url: String,
    http: reqwest::Client,
}

impl BitbucketAdapter {
    pub fn new(config: &BitbucketConfig, http: reqwest::Client) -> Self {
        Self {
            auth: BitbucketAppPassword::new(config),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
    ) -> Result<T, AdapterError> {
        let credential = self.auth.credential(owner, repo).await?;
        let response = credential
            .apply(self.http.get(url))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AdapterError::UpstreamApi {
                platform: Platform::Bitbucket,
                status: None,
                message: format!("Request to {} failed: {}", url, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::UpstreamApi {
                platform: Platform::Bitbucket,
                status: Some(status.as_u16()),
                message: format!("GET {} returned an error", url),
            });
        }

        response.json().await.map_err(|e| AdapterError::UpstreamApi {
            platform: Platform::Bitbucket,
            status: None,
            message: format!("Malformed response from {}: {}", url, e),
        })
    }

    fn map_pr(pr: &PullRequest) -> NormalizedPr {
        NormalizedPr {
            number: pr.id,
            title: pr.title.clone(),
            description: pr.description.clone(),
            author: author_name(&pr.author),
            source_branch: pr.source.branch.name.clone(),
            target_branch: pr.destination.branch.name.clone(),
            // Bitbucket reports states in upper case ("OPEN", "MERGED").
            state: pr.state.to_lowercase(),
            url: pr.links.html.href.clone(),
        }
    }

    fn map_file(entry: DiffstatEntry) -> NormalizedFile {
        let status = FileStatus::parse(&entry.status);
        let filename = entry.new.map(|p| p.path).unwrap_or_else(|| {
            entry
                .old
                .as_ref()
                .map(|p| p.path.clone())
                .unwrap_or_default()
        });
        let previous_filename = entry.old.map(|p| p.path);

        NormalizedFile::new(
            filename,
            status,
            entry.lines_added,
            entry.lines_removed,
            None,
            previous_filename,
        )
    }

    /// Split Bitbucket's `"workspace/repo-slug"` into its parts.
    fn split_full_name(full_name: &str, fallback_name: &str) -> (String, String) {
        match full_name.split_once('/') {
            Some((owner, name)) => (owner.to_string(), name.to_string()),
            None => (String::new(), fallback_name.to_string()),
        }
    }

    fn clone_url(links: &RepositoryLinks) -> String {
        links
            .clone
            .iter()
            .find(|link| link.name == "https")
            .map(|link| link.href.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl super::ScmAdapter for BitbucketAdapter {
    fn platform(&self) -> Platform {
        Platform::Bitbucket
    }

    async fn pr_details(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<NormalizedPr, AdapterError> {
        let url = format!(
            "{}/repositories/{}/{}/pullrequests/{}",
            self.api_base_url, owner, repo, number
        );
        let pr: PullRequest = self.get_json(owner, repo, &url).await?;
        Ok(Self::map_pr(&pr))
    }

    async fn pr_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<NormalizedFile>, AdapterError> {
        let mut files = Vec::new();
        let mut url = format!(
            "{}/repositories/{}/{}/pullrequests/{}/diffstat",
            self.api_base_url, owner, repo, number
        );

        // The diffstat endpoint paginates with a `next` link.
        loop {
            let page: DiffstatPage = self.get_json(owner, repo, &url).await?;
            files.extend(page.values.into_iter().map(Self::map_file));

            match page.next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(files)
    }

    async fn normalize_event(
        &self,
        raw_event_type: &str,
        payload: &[u8],
    ) -> Result<NormalizedEvent, AdapterError> {
        let parsed: WebhookPayload =
            serde_json::from_slice(payload).map_err(|e| AdapterError::PayloadParse {
                platform: Platform::Bitbucket,
                message: format!("Invalid {} payload: {}", raw_event_type, e),
            })?;

        let (event_type, action) = map_event_key(raw_event_type);
        let pr = Self::map_pr(&parsed.pullrequest);
        let (owner, repo_name) =
            Self::split_full_name(&parsed.repository.full_name, &parsed.repository.name);
        let repository = NormalizedRepository {
            name: repo_name.clone(),
            full_name: parsed.repository.full_name.clone(),
            owner: owner.clone(),
            clone_url: Self::clone_url(&parsed.repository.links),
            html_url: parsed.repository.links.html.href.clone(),
        };

        let files = if matches!(action, "opened" | "synchronize") && pr.number != 0 {
            match self.pr_files(&owner, &repo_name, pr.number).await {
                Ok(files) => files,
                Err(error) => {
                    tracing::warn!(
                        owner = %owner,
                        repo = %repo_name,
                        pr_number = pr.number,
                        error = %error,
                        "File enrichment failed, delivering event without files"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(NormalizedEvent {
            platform: Platform::Bitbucket,
            event_type: event_type.to_string(),
            action: action.to_string(),
            pr,
            repository,
            files,
            raw_payload: Bytes::copy_from_slice(payload),
            received_at: Utc::now(),
        })
    }
}

#[cfg(test)]
#[path = "bitbucket_tests.rs"]
mod tests;
