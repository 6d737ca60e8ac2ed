//! Provider types and configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    Nats,
    InMemory,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nats => write!(f, "nats"),
            Self::InMemory => write!(f, "in-memory"),
        }
    }
}

/// Configuration for broker client initialization
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub provider: ProviderConfig,
    /// Upper bound on a single publish call. Exceeding it fails that publish
    /// only, never the caller's already-sent HTTP response.
    pub publish_timeout: Duration,
    /// How long a receive call waits for a delivery before returning empty.
    pub receive_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::InMemory(InMemoryConfig::default()),
            publish_timeout: Duration::seconds(5),
            receive_timeout: Duration::seconds(5),
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Nats(NatsConfig),
    InMemory(InMemoryConfig),
}

/// NATS JetStream configuration
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL, e.g. `nats://localhost:4222`
    pub url: String,
    /// How long an unacknowledged delivery stays in flight before the broker
    /// redelivers it.
    pub ack_wait: Duration,
}

impl NatsConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            ack_wait: Duration::seconds(30),
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    pub max_queue_size: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
        }
    }
}
