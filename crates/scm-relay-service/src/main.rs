//! # SCM Relay Service
//!
//! Binary entry point for the SCM Relay pipeline process.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes logging
//! - Connects the queue broker and declares the pipeline queues
//! - Spawns the normalization and delivery consumer loops
//! - Serves the webhook gateway and query endpoints over HTTP

use queue_broker::{run_consumer, BrokerClient, QueueName};
use scm_relay_core::PlatformRouter;
use scm_relay_service::{
    create_router, delivery::DeliveryHandler, normalizer::NormalizationHandler, AppState,
    ServiceConfig, NORMALIZED_EVENTS_QUEUE, RAW_EVENTS_QUEUE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Sources (applied in order, later sources override earlier ones):
    //  1. /etc/scm-relay/service.yaml        system-wide defaults
    //  2. ./config/service.yaml              deployment-local override
    //  3. Path given by SCM_RELAY_CONFIG_FILE env
    //  4. Environment variables prefixed SCM_RELAY__ (double-underscore
    //     separator), e.g. SCM_RELAY__SERVER__PORT=9090
    //
    // Every field carries a serde default, so an entirely unconfigured
    // environment still yields a valid config. A malformed file or an
    // environment value of the wrong type is a hard error: it indicates
    // deliberate-but-broken operator configuration.
    // -------------------------------------------------------------------------
    let mut config_builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/scm-relay/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Ok(explicit_path) = std::env::var("SCM_RELAY_CONFIG_FILE") {
        if !explicit_path.is_empty() {
            config_builder = config_builder.add_source(
                config::File::with_name(&explicit_path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }
    }

    let raw_config = config_builder
        .add_source(config::Environment::with_prefix("SCM_RELAY").separator("__"))
        .build()?;
    let service_config: ServiceConfig = raw_config.try_deserialize()?;

    init_logging(&service_config);

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    info!("Starting SCM Relay service");
    let config = Arc::new(service_config);

    // -------------------------------------------------------------------------
    // Adapters and broker
    //
    // A broker connection failure does not abort startup: the gateway keeps
    // answering webhooks (verify, acknowledge, drop) so the provider does
    // not disable the webhook, and an operator can restart once the broker
    // is back.
    // -------------------------------------------------------------------------
    let router = Arc::new(PlatformRouter::new(&config.providers)?);

    let raw_queue = QueueName::new(RAW_EVENTS_QUEUE.to_string())?;
    let normalized_queue = QueueName::new(NORMALIZED_EVENTS_QUEUE.to_string())?;

    let broker = match BrokerClient::connect(config.broker.to_broker_config()).await {
        Ok(client) => {
            let client = Arc::new(client);
            client
                .declare_queues(&[raw_queue.clone(), normalized_queue.clone()])
                .await?;
            info!("Queue broker connected, pipeline queues declared");
            Some(client)
        }
        Err(error) => {
            warn!(
                error = %error,
                "Queue broker unreachable, webhook events will be dropped"
            );
            None
        }
    };

    // -------------------------------------------------------------------------
    // Consumer loops
    //
    // Each loop owns its receive channel and runs until a fatal broker
    // error; treat a terminated loop as a restart signal.
    // -------------------------------------------------------------------------
    if let Some(broker) = &broker {
        let normalization = NormalizationHandler::new(
            broker.clone(),
            router.clone(),
            normalized_queue.clone(),
        );
        let broker_for_normalizer = broker.clone();
        let raw = raw_queue.clone();
        tokio::spawn(async move {
            if let Err(error) = run_consumer(broker_for_normalizer, raw, normalization).await {
                error!(error = %error, "Normalization consumer stopped");
            }
        });

        let delivery = DeliveryHandler::new(
            config.delivery.sink_url.clone(),
            Duration::from_secs(config.delivery.timeout_seconds),
        )?;
        let broker_for_delivery = broker.clone();
        let normalized = normalized_queue.clone();
        tokio::spawn(async move {
            if let Err(error) = run_consumer(broker_for_delivery, normalized, delivery).await {
                error!(error = %error, "Delivery consumer stopped");
            }
        });
    }

    // -------------------------------------------------------------------------
    // HTTP server
    // -------------------------------------------------------------------------
    let state = AppState::new(config.clone(), broker, router)?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(address = %addr, error = %error, "Failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    info!(address = %addr, "Listening for webhooks");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_seconds))
        .await
        .map_err(|error| {
            error!(error = %error, "HTTP server failed");
            anyhow::anyhow!("HTTP server failed: {}", error)
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

fn init_logging(config: &ServiceConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "scm_relay_service={level},scm_relay_core={level},queue_broker={level},tower_http=info",
            level = config.logging.level
        )
        .into()
    });

    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolve when SIGINT or SIGTERM arrives. In-flight requests get until the
/// shutdown timeout to complete.
async fn shutdown_signal(shutdown_timeout_seconds: u64) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(error = %error, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(error = %error, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!(
                timeout_seconds = shutdown_timeout_seconds,
                "Received SIGINT, initiating graceful shutdown"
            );
        },
        _ = terminate => {
            info!(
                timeout_seconds = shutdown_timeout_seconds,
                "Received SIGTERM, initiating graceful shutdown"
            );
        },
    }
}
