//! # SCM Relay Service
//!
//! HTTP gateway and pipeline process for relaying SCM webhook events.
//!
//! The pipeline has three independent stages, connected by two durable
//! queues:
//!
//! ```text
//! webhook → gateway (verify + detect) → raw_events
//!         → normalization consumer (adapter) → normalized_events
//!         → delivery consumer → downstream sink
//! ```
//!
//! # Module Organization
//!
//! - [`config`]: layered service configuration
//! - [`gateway`]: signature-verified webhook ingress
//! - [`normalizer`]: raw-event consumer applying SCM adapters
//! - [`delivery`]: normalized-event consumer posting to the sink
//! - [`queries`]: synchronous query endpoints and health

use axum::routing::{get, post};
use axum::Router;
use queue_broker::{BrokerClient, QueueName, ValidationError};
use scm_relay_core::PlatformRouter;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod delivery;
pub mod gateway;
pub mod normalizer;
pub mod queries;

pub use config::ServiceConfig;

/// Name of the queue between the gateway and the normalization consumer.
pub const RAW_EVENTS_QUEUE: &str = "raw_events";

/// Name of the queue between normalization and delivery.
pub const NORMALIZED_EVENTS_QUEUE: &str = "normalized_events";

// ============================================================================
// Application State
// ============================================================================

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    /// Absent when the broker was unreachable at startup; the gateway then
    /// verifies and drops events instead of refusing requests.
    pub broker: Option<Arc<BrokerClient>>,
    pub router: Arc<PlatformRouter>,
    pub raw_queue: QueueName,
}

impl AppState {
    pub fn new(
        config: Arc<ServiceConfig>,
        broker: Option<Arc<BrokerClient>>,
        router: Arc<PlatformRouter>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            config,
            broker,
            router,
            raw_queue: QueueName::new(RAW_EVENTS_QUEUE.to_string())?,
        })
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let webhook_routes = Router::new().route("/webhook", post(gateway::handle_webhook));

    let query_routes = Router::new()
        .route("/health", get(queries::handle_health))
        .route("/api/pr-files", get(queries::handle_pr_files))
        .route("/api/repo-files", get(queries::handle_repo_files));

    Router::new()
        .merge(webhook_routes)
        .merge(query_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
