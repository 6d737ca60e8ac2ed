//! # SCM Relay Core
//!
//! Provider-agnostic pull-request event schema and the SCM adapter
//! abstraction that maps each provider's webhooks and REST APIs onto it.
//!
//! This library provides:
//! - The normalized data shapes every adapter must produce
//!   ([`schema::NormalizedEvent`] and friends)
//! - The [`adapter::ScmAdapter`] capability, implemented once per provider
//! - The [`adapter::PlatformRouter`] that selects an adapter from inbound
//!   webhook headers
//! - Credential acquisition for provider APIs ([`auth`])
//!
//! Adding a provider means adding one adapter implementation and one router
//! branch; nothing else changes.

pub mod adapter;
pub mod auth;
pub mod config;
pub mod error;
pub mod schema;

pub use adapter::{detect_platform, PlatformRouter, RepositoryTree, ScmAdapter};
pub use auth::{Credential, CredentialProvider};
pub use config::{BitbucketConfig, GithubConfig, ProvidersConfig};
pub use error::{AdapterError, AuthError};
pub use schema::{
    FileStatus, NormalizedEvent, NormalizedFile, NormalizedPr, NormalizedRepository, Platform,
    RawWebhookMessage,
};
