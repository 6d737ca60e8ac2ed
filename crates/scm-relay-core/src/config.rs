//! Per-provider configuration.
//!
//! Each provider section is optional: an absent section means the platform
//! is not served and its adapter cannot be constructed. The service crate
//! owns loading and layering; this module only defines the shapes.

use serde::{Deserialize, Serialize};

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_bitbucket_api_url() -> String {
    "https://api.bitbucket.org/2.0".to_string()
}

/// Credentials and endpoints for every supported provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub github: Option<GithubConfig>,
    #[serde(default)]
    pub bitbucket: Option<BitbucketConfig>,
}

/// GitHub App credentials.
///
/// The app authenticates with a short-lived RS256 JWT signed by
/// `private_key_pem` and exchanges it for per-installation access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// GitHub App identifier, the JWT issuer claim.
    pub app_id: u64,

    /// PEM-encoded RSA private key for the app.
    pub private_key_pem: String,

    /// API base URL, overridable for GitHub Enterprise and tests.
    #[serde(default = "default_github_api_url")]
    pub api_base_url: String,
}

/// Bitbucket Cloud app-password credentials, used as HTTP basic auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitbucketConfig {
    pub username: String,

    pub app_password: String,

    /// API base URL, overridable for tests.
    #[serde(default = "default_bitbucket_api_url")]
    pub api_base_url: String,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
