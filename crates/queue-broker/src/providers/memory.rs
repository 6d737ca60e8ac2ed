//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue implementation
//! that:
//! - Preserves FIFO delivery order within each queue
//! - Tracks in-flight messages until they are completed, abandoned, or
//!   discarded
//! - Counts deliveries so redelivered messages are observable
//! - Provides thread-safe concurrent access
//!
//! This provider is intended for:
//! - Unit and pipeline testing of queue-broker consumers
//! - Local development without a running broker

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    /// In-flight messages across all queues, keyed by receipt handle
    in_flight: HashMap<String, InFlightMessage>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            in_flight: HashMap::new(),
            config,
        }
    }

    fn queue_mut(&mut self, queue_name: &QueueName) -> Result<&mut InMemoryQueue, QueueError> {
        self.queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue_name.as_str().to_string(),
            })
    }
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    /// Main message queue (FIFO order)
    messages: VecDeque<StoredMessage>,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
        }
    }
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    delivery_count: u32,
}

impl StoredMessage {
    fn from_message(message: &Message, message_id: MessageId) -> Self {
        Self {
            message_id,
            body: message.body.clone(),
            delivery_count: 0,
        }
    }
}

/// A message currently being processed
struct InFlightMessage {
    queue_name: QueueName,
    message: StoredMessage,
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation.
///
/// Cloning yields a handle to the same storage, letting tests share one
/// provider between the client under test and their assertions.
#[derive(Clone)]
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(config))),
        }
    }

    /// Number of messages waiting in a queue (not counting in-flight ones).
    /// Test helper; not part of the provider contract.
    pub fn queue_depth(&self, queue: &QueueName) -> usize {
        let storage = self.storage.read().expect("storage lock poisoned");
        storage
            .queues
            .get(queue)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    fn take_in_flight(&self, receipt: &ReceiptHandle) -> Result<InFlightMessage, QueueError> {
        let mut storage = self.storage.write().expect("storage lock poisoned");
        storage
            .in_flight
            .remove(receipt.handle())
            .ok_or_else(|| QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            })
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        let mut storage = self.storage.write().expect("storage lock poisoned");
        storage
            .queues
            .entry(queue.clone())
            .or_insert_with(InMemoryQueue::new);
        Ok(())
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let mut storage = self.storage.write().expect("storage lock poisoned");
        let max_queue_size = storage.config.max_queue_size;
        let stored_queue = storage.queue_mut(queue)?;

        if stored_queue.messages.len() >= max_queue_size {
            return Err(QueueError::ProviderError {
                provider: "in-memory".to_string(),
                message: format!("queue {} is full ({} messages)", queue, max_queue_size),
            });
        }

        let message_id = MessageId::new();
        stored_queue
            .messages
            .push_back(StoredMessage::from_message(message, message_id.clone()));
        Ok(message_id)
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let deadline = Timestamp::now().as_datetime() + timeout;

        loop {
            {
                let mut storage = self.storage.write().expect("storage lock poisoned");
                let stored_queue = storage.queue_mut(queue)?;

                if let Some(mut stored) = stored_queue.messages.pop_front() {
                    stored.delivery_count += 1;

                    let handle = uuid::Uuid::new_v4().to_string();
                    let receipt = ReceiptHandle::new(
                        handle.clone(),
                        Timestamp::from_datetime(
                            Timestamp::now().as_datetime() + Duration::minutes(5),
                        ),
                        ProviderType::InMemory,
                    );

                    let received = ReceivedMessage {
                        message_id: stored.message_id.clone(),
                        body: stored.body.clone(),
                        receipt_handle: receipt,
                        delivery_count: stored.delivery_count,
                        delivered_at: Timestamp::now(),
                    };

                    storage.in_flight.insert(
                        handle,
                        InFlightMessage {
                            queue_name: queue.clone(),
                            message: stored,
                        },
                    );

                    return Ok(Some(received));
                }
            }

            if Timestamp::now().as_datetime() >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.take_in_flight(receipt).map(|_| ())
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let in_flight = self.take_in_flight(receipt)?;
        let mut storage = self.storage.write().expect("storage lock poisoned");
        let stored_queue = storage.queue_mut(&in_flight.queue_name)?;
        // Redeliver before anything that arrived later.
        stored_queue.messages.push_front(in_flight.message);
        Ok(())
    }

    async fn discard_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.take_in_flight(receipt).map(|_| ())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
