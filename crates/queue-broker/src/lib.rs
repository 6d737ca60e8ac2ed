//! # Queue Broker
//!
//! Provider-agnostic durable queue client for the SCM Relay event pipeline.
//!
//! This library provides:
//! - Durable queue declaration (idempotent, survives broker restart)
//! - Persistent message publishing, safe under concurrent callers
//! - Manual-acknowledgment consumption loops with poison-message discard
//! - An in-memory provider for tests and local development
//! - A NATS JetStream provider for production deployments
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Message structures and receipt handles
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Broker client and the consumption-loop driver
//!
//! ## Delivery semantics
//!
//! Consumption acknowledges a message only after its handler returns, which
//! yields at-least-once delivery: a crash between successful handling and
//! acknowledgment causes redelivery on reconnect. Handlers must tolerate
//! re-invocation with the same message.

// Module declarations
pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{run_consumer, BrokerClient, MessageHandler, QueueProvider};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp};
pub use provider::{BrokerConfig, InMemoryConfig, NatsConfig, ProviderConfig, ProviderType};
pub use providers::{InMemoryProvider, NatsProvider};
