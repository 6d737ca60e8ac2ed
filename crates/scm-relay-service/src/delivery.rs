//! Delivery consumer.
//!
//! Drains the normalized-events queue and POSTs each event to the
//! configured downstream sink. Without a sink URL the service runs in
//! local/offline mode: events are logged in full and counted as handled.
//! Delivery failures are logged and the message is still acknowledged;
//! there is no retry or dead-letter queue, trading potential event loss
//! for pipeline liveness.

use async_trait::async_trait;
use queue_broker::MessageHandler;
use scm_relay_core::NormalizedEvent;
use std::time::Duration;
use tracing::{info, warn};

/// Handler delivering normalized events to the downstream sink.
pub struct DeliveryHandler {
    sink_url: Option<String>,
    http: reqwest::Client,
}

impl DeliveryHandler {
    /// Build a handler with a bounded per-delivery timeout.
    pub fn new(sink_url: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        if let Some(url) = &sink_url {
            info!(sink_url = %url, "Delivering normalized events to sink");
        } else {
            info!("No sink configured, normalized events will be logged only");
        }
        Ok(Self { sink_url, http })
    }

    async fn deliver(&self, url: &str, event: &NormalizedEvent) -> Result<u16, String> {
        let response = self
            .http
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|e| format!("sink unreachable: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("sink returned {}", status));
        }
        Ok(status.as_u16())
    }
}

#[async_trait]
impl MessageHandler<NormalizedEvent> for DeliveryHandler {
    async fn handle(&self, event: NormalizedEvent) {
        let Some(url) = &self.sink_url else {
            // Offline mode: the log line is the delivery.
            info!(
                platform = %event.platform,
                event_type = %event.event_type,
                pr_number = event.pr.number,
                repository = %event.repository.full_name,
                file_count = event.files.len(),
                "Normalized event (no sink configured)"
            );
            return;
        };

        match self.deliver(url, &event).await {
            Ok(status) => {
                info!(
                    platform = %event.platform,
                    pr_number = event.pr.number,
                    status = status,
                    "Delivered normalized event to sink"
                );
            }
            Err(error) => {
                warn!(
                    platform = %event.platform,
                    pr_number = event.pr.number,
                    error = %error,
                    "Failed to deliver normalized event"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
