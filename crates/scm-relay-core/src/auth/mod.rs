//! Credential acquisition for provider APIs.
//!
//! Each provider authenticates differently: GitHub as an App (short-lived
//! RS256 JWT exchanged for per-installation access tokens), Bitbucket Cloud
//! with a static app password. Adapters only see the [`CredentialProvider`]
//! capability and the [`Credential`] it yields.
//!
//! # Module Organization
//!
//! - [`GitHubAppAuth`]: JWT signing, installation lookup, token exchange and
//!   caching
//! - [`BitbucketAppPassword`]: static basic-auth credentials

use crate::config::{BitbucketConfig, GithubConfig};
use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

// ============================================================================
// Credential
// ============================================================================

/// A credential ready to attach to an outgoing API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// HTTP basic authentication.
    Basic { username: String, password: String },
}

impl Credential {
    /// Apply this credential to a request builder.
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Bearer(token) => request.bearer_auth(token),
            Self::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }
}

/// Capability to produce a credential for API calls against one repository.
///
/// The `(owner, repo)` pair matters for GitHub, where tokens are scoped to
/// the installation covering that repository; Bitbucket ignores it.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, owner: &str, repo: &str) -> Result<Credential, AuthError>;
}

// ============================================================================
// GitHub App Authentication
// ============================================================================

/// JWT lifetime. GitHub allows at most 10 minutes; 9 leaves margin for
/// clock skew between this host and GitHub.
fn jwt_lifetime() -> Duration {
    Duration::minutes(9)
}

/// Tokens within this window of expiry are refreshed instead of reused.
fn token_expiry_margin() -> Duration {
    Duration::seconds(60)
}

#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct InstallationResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_usable(&self) -> bool {
        Utc::now() + token_expiry_margin() < self.expires_at
    }
}

/// GitHub App credential provider.
///
/// Resolves the installation that covers the requested repository and
/// exchanges an app JWT for an installation access token. Tokens are cached
/// per repository until shortly before their expiry, so a burst of events on
/// one repository costs one token exchange, not one per event.
pub struct GitHubAppAuth {
    app_id: u64,
    encoding_key: EncodingKey,
    api_base_url: String,
    http: reqwest::Client,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl GitHubAppAuth {
    /// Create a provider from app configuration.
    ///
    /// The private key is parsed eagerly so a malformed key fails at startup
    /// rather than on the first webhook.
    pub fn new(config: &GithubConfig, http: reqwest::Client) -> Result<Self, AuthError> {
        let encoding_key = EncodingKey::from_rsa_pem(config.private_key_pem.as_bytes()).map_err(
            |e| AuthError::InvalidKey {
                message: format!("Failed to parse RSA private key: {}", e),
            },
        )?;

        Ok(Self {
            app_id: config.app_id,
            encoding_key,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            http,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Sign a short-lived app JWT with `iss`, `iat`, and `exp` claims.
    fn sign_jwt(&self) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = JwtClaims {
            iss: self.app_id.to_string(),
            iat: now.timestamp(),
            exp: (now + jwt_lifetime()).timestamp(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key).map_err(|e| {
            AuthError::InvalidKey {
                message: format!("Failed to sign app JWT: {}", e),
            }
        })
    }

    /// Look up the installation covering `owner/repo`.
    async fn installation_id(&self, jwt: &str, owner: &str, repo: &str) -> Result<u64, AuthError> {
        let url = format!("{}/repos/{}/{}/installation", self.api_base_url, owner, repo);
        let response = self
            .http
            .get(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange {
                status: None,
                message: format!("Installation lookup failed: {}", e),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AuthError::NoInstallation {
                owner: owner.to_string(),
                repo: repo.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(AuthError::TokenExchange {
                status: Some(response.status().as_u16()),
                message: "Installation lookup returned an error".to_string(),
            });
        }

        let installation: InstallationResponse =
            response.json().await.map_err(|e| AuthError::TokenExchange {
                status: None,
                message: format!("Malformed installation response: {}", e),
            })?;
        Ok(installation.id)
    }

    /// Exchange the app JWT for an installation access token.
    async fn exchange_token(
        &self,
        jwt: &str,
        installation_id: u64,
    ) -> Result<CachedToken, AuthError> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base_url, installation_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange {
                status: None,
                message: format!("Token exchange failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AuthError::TokenExchange {
                status: Some(response.status().as_u16()),
                message: "Token exchange returned an error".to_string(),
            });
        }

        let body: AccessTokenResponse =
            response.json().await.map_err(|e| AuthError::TokenExchange {
                status: None,
                message: format!("Malformed access token response: {}", e),
            })?;
        Ok(CachedToken {
            token: body.token,
            expires_at: body.expires_at,
        })
    }
}

#[async_trait::async_trait]
impl CredentialProvider for GitHubAppAuth {
    async fn credential(&self, owner: &str, repo: &str) -> Result<Credential, AuthError> {
        let cache_key = format!("{}/{}", owner, repo);

        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(&cache_key) {
            if cached.is_usable() {
                return Ok(Credential::Bearer(cached.token.clone()));
            }
        }

        let jwt = self.sign_jwt()?;
        let installation_id = self.installation_id(&jwt, owner, repo).await?;
        let token = self.exchange_token(&jwt, installation_id).await?;

        tracing::debug!(
            owner = %owner,
            repo = %repo,
            installation_id = installation_id,
            expires_at = %token.expires_at,
            "Obtained installation access token"
        );

        tokens.insert(cache_key, token.clone());
        Ok(Credential::Bearer(token.token))
    }
}

// ============================================================================
// Bitbucket App Password Authentication
// ============================================================================

/// Bitbucket Cloud credential provider backed by a static app password.
pub struct BitbucketAppPassword {
    username: String,
    app_password: String,
}

impl BitbucketAppPassword {
    pub fn new(config: &BitbucketConfig) -> Self {
        Self {
            username: config.username.clone(),
            app_password: config.app_password.clone(),
        }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for BitbucketAppPassword {
    async fn credential(&self, _owner: &str, _repo: &str) -> Result<Credential, AuthError> {
        Ok(Credential::Basic {
            username: self.username.clone(),
            password: self.app_password.clone(),
        })
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
