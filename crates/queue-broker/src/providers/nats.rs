//! NATS JetStream queue provider implementation.
//!
//! Each queue maps to a file-backed work-queue stream whose single subject is
//! the queue name, so messages are persisted until exactly one consumer
//! acknowledges them. A durable pull consumer per queue gives the manual
//! acknowledgment semantics the pipeline needs:
//!
//! - complete → `Ack`
//! - abandon  → `Nak` (redeliver)
//! - discard  → `Term` (drop without redelivery)

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp};
use crate::provider::{NatsConfig, ProviderType};
use async_nats::jetstream::{self, consumer, stream, AckKind};
use async_trait::async_trait;
use chrono::Duration;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// NATS JetStream queue provider
pub struct NatsProvider {
    context: jetstream::Context,
    config: NatsConfig,
    /// One durable pull consumer per queue. A consumer belongs to exactly one
    /// consumption loop and is never shared with the publish path.
    consumers: Mutex<HashMap<QueueName, consumer::Consumer<consumer::pull::Config>>>,
    /// Deliveries awaiting acknowledgment, keyed by receipt handle.
    in_flight: Mutex<HashMap<String, jetstream::Message>>,
}

impl NatsProvider {
    /// Connect to the NATS server described by `config`.
    pub async fn connect(config: NatsConfig) -> Result<Self, QueueError> {
        let client = async_nats::connect(&config.url).await.map_err(|err| {
            QueueError::ConnectionFailed {
                message: format!("could not connect to NATS at {}: {}", config.url, err),
            }
        })?;

        Ok(Self {
            context: jetstream::new(client),
            config,
            consumers: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    async fn consumer_for(
        &self,
        queue: &QueueName,
    ) -> Result<consumer::Consumer<consumer::pull::Config>, QueueError> {
        let mut consumers = self.consumers.lock().await;
        if let Some(existing) = consumers.get(queue) {
            return Ok(existing.clone());
        }

        let stream = self
            .context
            .get_stream(queue.as_str())
            .await
            .map_err(|err| QueueError::QueueNotFound {
                queue_name: format!("{} ({})", queue, err),
            })?;

        let ack_wait = self
            .config
            .ack_wait
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(30));

        let created = stream
            .get_or_create_consumer(
                queue.as_str(),
                consumer::pull::Config {
                    durable_name: Some(queue.as_str().to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| QueueError::ProviderError {
                provider: "nats".to_string(),
                message: format!("could not create consumer on {}: {}", queue, err),
            })?;

        consumers.insert(queue.clone(), created.clone());
        Ok(created)
    }

    async fn take_in_flight(
        &self,
        receipt: &ReceiptHandle,
    ) -> Result<jetstream::Message, QueueError> {
        let mut in_flight = self.in_flight.lock().await;
        in_flight
            .remove(receipt.handle())
            .ok_or_else(|| QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            })
    }
}

#[async_trait]
impl QueueProvider for NatsProvider {
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        // get_or_create_stream is idempotent on the broker side.
        self.context
            .get_or_create_stream(stream::Config {
                name: queue.as_str().to_string(),
                subjects: vec![queue.as_str().to_string()],
                retention: stream::RetentionPolicy::WorkQueue,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|err| QueueError::ProviderError {
                provider: "nats".to_string(),
                message: format!("could not declare queue {}: {}", queue, err),
            })?;
        Ok(())
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let ack = self
            .context
            .publish(queue.as_str().to_string(), message.body.clone())
            .await
            .map_err(|err| QueueError::ProviderError {
                provider: "nats".to_string(),
                message: format!("publish to {} failed: {}", queue, err),
            })?;

        // Wait for the broker to confirm the message was persisted.
        ack.await.map_err(|err| QueueError::ProviderError {
            provider: "nats".to_string(),
            message: format!("publish to {} was not acknowledged: {}", queue, err),
        })?;

        Ok(MessageId::new())
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let consumer = self.consumer_for(queue).await?;

        let expires = timeout
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(5));

        let mut batch = consumer
            .fetch()
            .max_messages(1)
            .expires(expires)
            .messages()
            .await
            .map_err(|err| QueueError::ProviderError {
                provider: "nats".to_string(),
                message: format!("fetch from {} failed: {}", queue, err),
            })?;

        let delivery = match batch.next().await {
            Some(Ok(delivery)) => delivery,
            Some(Err(err)) => {
                return Err(QueueError::ProviderError {
                    provider: "nats".to_string(),
                    message: format!("delivery from {} failed: {}", queue, err),
                });
            }
            None => return Ok(None),
        };

        let delivery_count = delivery
            .info()
            .map(|info| info.delivered.max(1) as u32)
            .unwrap_or(1);

        let handle = uuid::Uuid::new_v4().to_string();
        let receipt = ReceiptHandle::new(
            handle.clone(),
            Timestamp::from_datetime(Timestamp::now().as_datetime() + self.config.ack_wait),
            ProviderType::Nats,
        );

        let received = ReceivedMessage {
            message_id: MessageId::new(),
            body: delivery.payload.clone(),
            receipt_handle: receipt,
            delivery_count,
            delivered_at: Timestamp::now(),
        };

        self.in_flight.lock().await.insert(handle, delivery);

        Ok(Some(received))
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let delivery = self.take_in_flight(receipt).await?;
        delivery.ack().await.map_err(|err| QueueError::ProviderError {
            provider: "nats".to_string(),
            message: format!("ack failed: {}", err),
        })
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let delivery = self.take_in_flight(receipt).await?;
        delivery
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|err| QueueError::ProviderError {
                provider: "nats".to_string(),
                message: format!("nak failed: {}", err),
            })
    }

    async fn discard_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let delivery = self.take_in_flight(receipt).await?;
        delivery
            .ack_with(AckKind::Term)
            .await
            .map_err(|err| QueueError::ProviderError {
                provider: "nats".to_string(),
                message: format!("term failed: {}", err),
            })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Nats
    }
}
