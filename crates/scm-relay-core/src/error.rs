//! Error types for adapters and credential acquisition.

use crate::schema::Platform;
use thiserror::Error;

/// Errors produced by SCM adapters.
///
/// Failures are scoped to one event or one API call; none of them should
/// stop a consumption loop or crash the process.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// A webhook payload did not match the provider's schema.
    #[error("Malformed {platform} webhook payload: {message}")]
    PayloadParse { platform: Platform, message: String },

    /// The provider API returned a non-2xx response or an unreachable error.
    #[error("Upstream {platform} API error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    UpstreamApi {
        platform: Platform,
        status: Option<u16>,
        message: String,
    },

    /// The adapter cannot be constructed: unsupported platform or missing
    /// per-provider credentials. Will not fix itself mid-stream; callers
    /// log and drop rather than retry.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

/// Errors acquiring credentials for a provider API.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid signing key: {message}")]
    InvalidKey { message: String },

    #[error("Token request failed{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    TokenExchange {
        status: Option<u16>,
        message: String,
    },

    #[error("No installation found for {owner}/{repo}")]
    NoInstallation { owner: String, repo: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
