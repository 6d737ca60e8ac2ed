//! Broker client and the manual-acknowledgment consumption loop.
//!
//! The [`BrokerClient`] wraps a [`QueueProvider`] and owns the single publish
//! channel shared by all concurrent publishers. Each consumption loop started
//! with [`run_consumer`] holds its own receive path on the provider and never
//! shares it with the publish channel or another loop.

use crate::error::{QueueError, SerializationError};
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage};
use crate::provider::{BrokerConfig, ProviderConfig, ProviderType};
use crate::providers::{InMemoryProvider, NatsProvider};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

// ============================================================================
// Provider Interface
// ============================================================================

/// Interface implemented by specific queue providers (NATS, in-memory)
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Declare a durable queue. Declaration is idempotent; redeclaring an
    /// existing queue succeeds without altering it.
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    /// Send a single persistent message
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError>;

    /// Receive a single message, waiting up to `timeout` for a delivery.
    /// Returns `Ok(None)` when the queue stays empty for the whole window.
    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Mark message as successfully processed
    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Return message to the queue for redelivery
    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Drop message without redelivery (poison-message discard)
    async fn discard_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

// ============================================================================
// Broker Client
// ============================================================================

/// Client for one broker connection, shared by publishers and consumers.
///
/// Lifecycle: connect → declare queues → run loops → drop. The client is
/// constructed once at startup and injected wherever publishing or consuming
/// happens; it is never ambient global state.
pub struct BrokerClient {
    provider: Box<dyn QueueProvider>,
    /// The underlying transport channel used for publishing is not safe for
    /// concurrent use by multiple callers; every publish serializes on this
    /// lock.
    publish_lock: Mutex<()>,
    config: BrokerConfig,
}

impl BrokerClient {
    /// Connect to the broker described by `config`.
    pub async fn connect(config: BrokerConfig) -> Result<Self, QueueError> {
        let provider: Box<dyn QueueProvider> = match &config.provider {
            ProviderConfig::InMemory(in_memory_config) => {
                Box::new(InMemoryProvider::new(in_memory_config.clone()))
            }
            ProviderConfig::Nats(nats_config) => {
                Box::new(NatsProvider::connect(nats_config.clone()).await?)
            }
        };

        info!(provider = %provider.provider_type(), "Connected to queue broker");

        Ok(Self {
            provider,
            publish_lock: Mutex::new(()),
            config,
        })
    }

    /// Wrap an existing provider. Used by tests to share an in-memory
    /// provider between the client under test and the assertions.
    pub fn with_provider(provider: Box<dyn QueueProvider>, config: BrokerConfig) -> Self {
        Self {
            provider,
            publish_lock: Mutex::new(()),
            config,
        }
    }

    /// Declare every queue the pipeline uses. Idempotent.
    pub async fn declare_queues(&self, queues: &[QueueName]) -> Result<(), QueueError> {
        for queue in queues {
            self.provider.declare_queue(queue).await?;
            info!(queue = %queue, "Queue declared");
        }
        Ok(())
    }

    /// Serialize `value` as JSON and publish it as a persistent message.
    ///
    /// Safe to call from many concurrent tasks; calls serialize on the
    /// client's publish lock. Bounded by the configured publish timeout;
    /// timeout or transport failure is returned to the caller, never
    /// silently dropped.
    pub async fn publish<T: Serialize + Sync>(
        &self,
        queue: &QueueName,
        value: &T,
    ) -> Result<MessageId, QueueError> {
        let body = serde_json::to_vec(value).map_err(SerializationError::JsonError)?;
        let message = Message::new(Bytes::from(body));

        let timeout = self.config.publish_timeout;
        let _guard = self.publish_lock.lock().await;

        let std_timeout = timeout
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(5));
        match tokio::time::timeout(std_timeout, self.provider.send_message(queue, &message)).await
        {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout { duration: timeout }),
        }
    }

    /// Receive a single message, waiting up to the configured receive timeout.
    pub async fn receive(&self, queue: &QueueName) -> Result<Option<ReceivedMessage>, QueueError> {
        self.provider
            .receive_message(queue, self.config.receive_timeout)
            .await
    }

    /// Acknowledge successful processing
    pub async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.provider.complete_message(receipt).await
    }

    /// Return a message for redelivery
    pub async fn abandon(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.provider.abandon_message(receipt).await
    }

    /// Discard a message without redelivery
    pub async fn discard(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.provider.discard_message(receipt).await
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }
}

// ============================================================================
// Consumption Loop
// ============================================================================

/// Handler invoked for every successfully decoded message.
///
/// Delivery is at-least-once: after a crash between handling and
/// acknowledgment the same message is redelivered, so implementations must be
/// idempotent with respect to observable side effects (or those side effects
/// must tolerate duplication). Failures local to one message are the
/// handler's to log; returning keeps the loop draining.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, message: T);
}

/// Drive a consumption loop over `queue`, decoding each delivery as `T`.
///
/// For every delivered message:
/// - deserialization failure: the message is negatively acknowledged without
///   requeue (poison messages are discarded, not retried forever);
/// - success: `handler.handle` runs to completion, then the message is
///   acknowledged.
///
/// The loop occupies its task indefinitely and returns only on a
/// non-transient receive error (connection loss, a missing queue), which
/// callers should treat as a restart signal.
pub async fn run_consumer<T, H>(
    client: Arc<BrokerClient>,
    queue: QueueName,
    handler: H,
) -> Result<(), QueueError>
where
    T: DeserializeOwned + Send,
    H: MessageHandler<T>,
{
    info!(queue = %queue, "Consumer started");

    loop {
        let received = match client.receive(&queue).await {
            Ok(Some(received)) => received,
            Ok(None) => continue,
            Err(err) if err.is_transient() => {
                warn!(queue = %queue, error = %err, "Receive failed, continuing");
                continue;
            }
            Err(err) => {
                warn!(queue = %queue, error = %err, "Broker unusable, consumer stopping");
                return Err(err);
            }
        };

        let receipt = received.receipt_handle.clone();

        match serde_json::from_slice::<T>(&received.body) {
            Ok(decoded) => {
                handler.handle(decoded).await;
                if let Err(err) = client.complete(&receipt).await {
                    warn!(queue = %queue, error = %err, "Failed to acknowledge message");
                }
            }
            Err(err) => {
                warn!(
                    queue = %queue,
                    message_id = %received.message_id,
                    error = %err,
                    "Could not decode delivery, discarding"
                );
                if let Err(err) = client.discard(&receipt).await {
                    warn!(queue = %queue, error = %err, "Failed to discard poison message");
                }
            }
        }

        debug!(queue = %queue, "Delivery processed");
    }
}
