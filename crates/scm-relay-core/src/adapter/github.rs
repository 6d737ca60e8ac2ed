//! GitHub adapter.
//!
//! Maps GitHub pull request webhooks and the REST v3 API onto the
//! normalized schema. API calls authenticate as a GitHub App through
//! [`GitHubAppAuth`], scoped to the installation covering the repository.

use crate::auth::{CredentialProvider, GitHubAppAuth};
use crate::config::GithubConfig;
use crate::error::AdapterError;
use crate::schema::{
    FileStatus, NormalizedEvent, NormalizedFile, NormalizedPr, NormalizedRepository, Platform,
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// GitHub caps `per_page` at 100 for the files endpoint.
const FILES_PAGE_SIZE: usize = 100;

/// Actions for which the changed-file list is worth fetching. Close and
/// merge actions are excluded: the file list no longer drives any decision
/// once the PR is done.
const ENRICHABLE_ACTIONS: &[&str] = &["opened", "synchronize", "reopened"];

// ============================================================================
// Wire Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    action: String,
    pull_request: PullRequest,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    user: User,
    head: BranchRef,
    base: BranchRef,
    state: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    #[serde(rename = "ref")]
    branch: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    full_name: String,
    owner: User,
    clone_url: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    filename: String,
    status: String,
    additions: u64,
    deletions: u64,
    changes: Option<u64>,
    previous_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Recursive listing of a repository's tree via the contents API.
///
/// Paths are repository-relative and sorted. Symlinks and submodules are
/// neither files nor directories and do not appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryTree {
    pub files: Vec<String>,
    pub directories: Vec<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// GitHub implementation of [`super::ScmAdapter`].
pub struct GithubAdapter {
    auth: GitHubAppAuth,
    api_base_url: String,
    http: reqwest::Client,
}

impl GithubAdapter {
    pub fn new(config: &GithubConfig, http: reqwest::Client) -> Result<Self, AdapterError> {
        let auth = GitHubAppAuth::new(config, http.clone())?;
        Ok(Self {
            auth,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Issue an authenticated GET against the API and decode the JSON body.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
    ) -> Result<T, AdapterError> {
        let credential = self.auth.credential(owner, repo).await?;
        let response = credential
            .apply(self.http.get(url))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "scm-relay")
            .send()
            .await
            .map_err(|e| AdapterError::UpstreamApi {
                platform: Platform::GitHub,
                status: None,
                message: format!("Request to {} failed: {}", url, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::UpstreamApi {
                platform: Platform::GitHub,
                status: Some(status.as_u16()),
                message: format!("GET {} returned an error", url),
            });
        }

        response.json().await.map_err(|e| AdapterError::UpstreamApi {
            platform: Platform::GitHub,
            status: None,
            message: format!("Malformed response from {}: {}", url, e),
        })
    }

    /// Walk the contents API and list every file and directory in the
    /// repository.
    ///
    /// A subdirectory that fails to list is logged and skipped so one
    /// unreadable corner does not hide the rest of the tree; a failure at
    /// the repository root fails the walk.
    pub async fn repo_files(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<RepositoryTree, AdapterError> {
        let mut files = Vec::new();
        let mut directories = Vec::new();
        let mut pending = vec![String::new()];

        while let Some(dir) = pending.pop() {
            let url = format!(
                "{}/repos/{}/{}/contents/{}",
                self.api_base_url, owner, repo, dir
            );
            let entries: Vec<ContentEntry> = match self.get_json(owner, repo, &url).await {
                Ok(entries) => entries,
                Err(error) if !dir.is_empty() => {
                    tracing::warn!(
                        owner = %owner,
                        repo = %repo,
                        path = %dir,
                        error = %error,
                        "Skipping unlistable directory"
                    );
                    continue;
                }
                Err(error) => return Err(error),
            };

            for entry in entries {
                match entry.kind.as_str() {
                    "dir" => {
                        directories.push(entry.path.clone());
                        pending.push(entry.path);
                    }
                    "file" => files.push(entry.path),
                    _ => {}
                }
            }
        }

        files.sort();
        directories.sort();
        Ok(RepositoryTree { files, directories })
    }

    fn map_pr(pr: PullRequest) -> NormalizedPr {
        NormalizedPr {
            number: pr.number,
            title: pr.title,
            description: pr.body.unwrap_or_default(),
            author: pr.user.login,
            source_branch: pr.head.branch,
            target_branch: pr.base.branch,
            state: pr.state,
            url: pr.html_url,
        }
    }

    fn map_file(entry: FileEntry) -> NormalizedFile {
        NormalizedFile::new(
            entry.filename,
            FileStatus::parse(&entry.status),
            entry.additions,
            entry.deletions,
            entry.changes,
            entry.previous_filename,
        )
    }
}

#[async_trait::async_trait]
impl super::ScmAdapter for GithubAdapter {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    async fn pr_details(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<NormalizedPr, AdapterError> {
        let url = format!("{}/repos/{}/{}/pulls/{}", self.api_base_url, owner, repo, number);
        let pr: PullRequest = self.get_json(owner, repo, &url).await?;
        Ok(Self::map_pr(pr))
    }

    async fn pr_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<NormalizedFile>, AdapterError> {
        let mut files = Vec::new();
        let mut page = 1u32;

        // A page shorter than the page size is the last one.
        loop {
            let url = format!(
                "{}/repos/{}/{}/pulls/{}/files?per_page={}&page={}",
                self.api_base_url, owner, repo, number, FILES_PAGE_SIZE, page
            );
            let entries: Vec<FileEntry> = self.get_json(owner, repo, &url).await?;
            let last_page = entries.len() < FILES_PAGE_SIZE;

            files.extend(entries.into_iter().map(Self::map_file));

            if last_page {
                break;
            }
            page += 1;
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
                platform: Platform::GitHub,
                message: format!("Invalid {} payload: {}", raw_event_type, e),
            })?;

        let action = parsed.action;
        let owner = parsed.repository.owner.login.clone();
        let repo = parsed.repository.name.clone();
        let pr = Self::map_pr(parsed.pull_request);
        let repository = NormalizedRepository {
            name: parsed.repository.name,
            full_name: parsed.repository.full_name,
            owner: parsed.repository.owner.login,
            clone_url: parsed.repository.clone_url,
            html_url: parsed.repository.html_url,
        };

        let files = if ENRICHABLE_ACTIONS.contains(&action.as_str()) && pr.number != 0 {
            match self.pr_files(&owner, &repo, pr.number).await {
                Ok(files) => files,
                Err(error) => {
                    tracing::warn!(
                        owner = %owner,
                        repo = %repo,
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
            platform: Platform::GitHub,
            event_type: format!("pull_request.{}", action),
            action,
            pr,
            repository,
            files,
            raw_payload: Bytes::copy_from_slice(payload),
            received_at: Utc::now(),
        })
    }
}

#[cfg(test)]
#[path = "github_tests.rs"]
mod tests;
