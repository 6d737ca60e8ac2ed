//! Synchronous query endpoints.
//!
//! Thin request/response wrappers over the adapters, outside the async
//! pipeline: a changed-file listing for one PR, a repository file-tree
//! listing, and a liveness probe.

use crate::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scm_relay_core::{AdapterError, NormalizedFile, Platform};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{instrument, warn};

fn default_platform() -> String {
    "github".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PrFilesQuery {
    #[serde(default = "default_platform")]
    pub platform: String,
    pub owner: String,
    pub repo: String,
    pub pr: u64,
}

#[derive(Debug, Serialize)]
pub struct PrFilesResponse {
    pub platform: Platform,
    pub owner: String,
    pub repo: String,
    pub pr: u64,
    pub file_count: usize,
    pub total_additions: u64,
    pub total_deletions: u64,
    pub total_changes: u64,
    pub files: Vec<NormalizedFile>,
}

/// `GET /api/pr-files?platform=&owner=&repo=&pr=`
#[instrument(skip(state))]
pub async fn handle_pr_files(
    State(state): State<AppState>,
    Query(query): Query<PrFilesQuery>,
) -> Response {
    let platform = Platform::from_str(&query.platform).unwrap_or(Platform::Unknown);
    if platform == Platform::Unknown {
        return (
            StatusCode::BAD_REQUEST,
            format!("unknown platform: {}", query.platform),
        )
            .into_response();
    }

    let adapter = match state.router.adapter_for(platform) {
        Ok(adapter) => adapter,
        Err(error) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response();
        }
    };

    match adapter.pr_files(&query.owner, &query.repo, query.pr).await {
        Ok(files) => {
            let response = PrFilesResponse {
                platform,
                owner: query.owner,
                repo: query.repo,
                pr: query.pr,
                file_count: files.len(),
                total_additions: files.iter().map(|f| f.additions).sum(),
                total_deletions: files.iter().map(|f| f.deletions).sum(),
                total_changes: files.iter().map(|f| f.changes).sum(),
                files,
            };
            Json(response).into_response()
        }
        Err(error) => {
            warn!(
                owner = %query.owner,
                repo = %query.repo,
                pr = query.pr,
                error = %error,
                "PR file listing failed"
            );
            let status = match &error {
                AdapterError::UpstreamApi { .. } | AdapterError::Auth(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, error.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RepoFilesQuery {
    pub owner: String,
    pub repo: String,
}

#[derive(Debug, Serialize)]
pub struct RepoFilesResponse {
    pub owner: String,
    pub repo: String,
    pub total_files: usize,
    pub total_directories: usize,
    pub total_items: usize,
    pub files: Vec<String>,
    pub directories: Vec<String>,
}

/// `GET /api/repo-files?owner=&repo=`
///
/// GitHub only: the recursive tree walk rides on the contents API, which
/// has no Bitbucket counterpart here.
#[instrument(skip(state))]
pub async fn handle_repo_files(
    State(state): State<AppState>,
    Query(query): Query<RepoFilesQuery>,
) -> Response {
    let Some(adapter) = state.router.github() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "GitHub is not configured".to_string(),
        )
            .into_response();
    };

    match adapter.repo_files(&query.owner, &query.repo).await {
        Ok(tree) => {
            let response = RepoFilesResponse {
                owner: query.owner,
                repo: query.repo,
                total_files: tree.files.len(),
                total_directories: tree.directories.len(),
                total_items: tree.files.len() + tree.directories.len(),
                files: tree.files,
                directories: tree.directories,
            };
            Json(response).into_response()
        }
        Err(error) => {
            warn!(
                owner = %query.owner,
                repo = %query.repo,
                error = %error,
                "Repository tree listing failed"
            );
            let status = match &error {
                AdapterError::UpstreamApi { .. } | AdapterError::Auth(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, error.to_string()).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker_connected: bool,
}

/// `GET /health`
pub async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        broker_connected: state.broker.is_some(),
    })
}

#[cfg(test)]
#[path = "queries_tests.rs"]
mod tests;
