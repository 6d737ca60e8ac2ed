//! Service configuration.
//!
//! Every field carries a serde default so an unconfigured environment still
//! produces a valid config; the service then runs with an in-memory broker
//! and no providers, which is the local development mode. Loading and
//! layering (files, environment) happens in `main`.

use queue_broker::{BrokerConfig, InMemoryConfig, NatsConfig, ProviderConfig};
use scm_relay_core::{Platform, ProvidersConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration rejected by [`ServiceConfig::validate`].
#[derive(Debug, Error)]
#[error("Invalid configuration: {message}")]
pub struct ConfigValidationError {
    pub message: String,
}

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook ingress settings
    pub webhooks: WebhookConfig,

    /// Queue broker settings
    pub broker: BrokerSection,

    /// Per-provider API credentials
    pub providers: ProvidersConfig,

    /// Downstream sink settings
    pub delivery: DeliveryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Reject configurations that would fail at runtime in confusing ways.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.server.port == 0 {
            return Err(ConfigValidationError {
                message: "server.port must be non-zero".to_string(),
            });
        }
        if self.delivery.timeout_seconds == 0 {
            return Err(ConfigValidationError {
                message: "delivery.timeout_seconds must be non-zero".to_string(),
            });
        }
        if let Some(url) = &self.delivery.sink_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigValidationError {
                    message: format!("delivery.sink_url is not an HTTP URL: {}", url),
                });
            }
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Webhook ingress configuration.
///
/// A platform without a secret cannot accept webhooks: the gateway answers
/// 500 for it, because an unverifiable webhook must never enter the
/// pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared HMAC secret for GitHub webhooks
    pub github_secret: Option<String>,

    /// Shared HMAC secret for Bitbucket webhooks
    pub bitbucket_secret: Option<String>,
}

impl WebhookConfig {
    pub fn secret_for(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::GitHub => self.github_secret.as_deref(),
            Platform::Bitbucket => self.bitbucket_secret.as_deref(),
            Platform::Unknown => None,
        }
    }
}

/// Queue broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    /// NATS server URL. When absent the broker runs in-memory, which does
    /// not survive a restart and is only suitable for development.
    pub nats_url: Option<String>,

    /// Publish timeout in seconds
    pub publish_timeout_seconds: u64,

    /// Consumer receive poll timeout in seconds
    pub receive_timeout_seconds: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            nats_url: None,
            publish_timeout_seconds: 5,
            receive_timeout_seconds: 5,
        }
    }
}

impl BrokerSection {
    /// Translate this section into the broker client's configuration.
    pub fn to_broker_config(&self) -> BrokerConfig {
        let provider = match &self.nats_url {
            Some(url) => ProviderConfig::Nats(NatsConfig::new(url.clone())),
            None => ProviderConfig::InMemory(InMemoryConfig::default()),
        };

        BrokerConfig {
            provider,
            publish_timeout: chrono::Duration::seconds(self.publish_timeout_seconds as i64),
            receive_timeout: chrono::Duration::seconds(self.receive_timeout_seconds as i64),
        }
    }
}

/// Downstream sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Sink URL for normalized events. Absent means local/offline mode:
    /// events are logged instead of delivered.
    pub sink_url: Option<String>,

    /// Sink POST timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            sink_url: None,
            timeout_seconds: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
