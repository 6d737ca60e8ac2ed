//! Normalization consumer.
//!
//! Drains the raw-events queue, runs the matching SCM adapter for each
//! message, and republishes the resulting [`NormalizedEvent`] to the
//! normalized-events queue. The handler is stateless across messages and
//! every failure is isolated to the message that caused it.

use async_trait::async_trait;
use queue_broker::{BrokerClient, MessageHandler, QueueName};
use scm_relay_core::{PlatformRouter, RawWebhookMessage};
use std::sync::Arc;
use tracing::{info, warn};

/// Handler for raw webhook messages.
pub struct NormalizationHandler {
    broker: Arc<BrokerClient>,
    router: Arc<PlatformRouter>,
    normalized_queue: QueueName,
}

impl NormalizationHandler {
    pub fn new(
        broker: Arc<BrokerClient>,
        router: Arc<PlatformRouter>,
        normalized_queue: QueueName,
    ) -> Self {
        Self {
            broker,
            router,
            normalized_queue,
        }
    }
}

#[async_trait]
impl MessageHandler<RawWebhookMessage> for NormalizationHandler {
    async fn handle(&self, message: RawWebhookMessage) {
        info!(
            platform = %message.platform,
            event_type = %message.event_type,
            "Normalizing raw event"
        );

        // A missing credential will not fix itself mid-stream; log and drop
        // rather than retry.
        let adapter = match self.router.adapter_for(message.platform) {
            Ok(adapter) => adapter,
            Err(error) => {
                warn!(
                    platform = %message.platform,
                    event_type = %message.event_type,
                    error = %error,
                    "No adapter available, dropping event"
                );
                return;
            }
        };

        let event = match adapter
            .normalize_event(&message.event_type, &message.payload)
            .await
        {
            Ok(event) => event,
            Err(error) => {
                warn!(
                    platform = %message.platform,
                    event_type = %message.event_type,
                    error = %error,
                    "Normalization failed, dropping event"
                );
                return;
            }
        };

        info!(
            platform = %event.platform,
            event_type = %event.event_type,
            pr_number = event.pr.number,
            repository = %event.repository.full_name,
            file_count = event.files.len(),
            "Normalized event"
        );

        if let Err(error) = self.broker.publish(&self.normalized_queue, &event).await {
            warn!(
                platform = %event.platform,
                pr_number = event.pr.number,
                error = %error,
                "Failed to publish normalized event, dropping"
            );
        }
    }
}

#[cfg(test)]
#[path = "normalizer_tests.rs"]
mod tests;
