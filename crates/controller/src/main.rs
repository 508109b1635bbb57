//! Traffic steering controller
//!
//! Runs the decision core against an external switch-control adapter:
//! notifications are read from stdin and commands written to stdout as JSON
//! lines. Logs go to stderr.

use anyhow::Result;
use controller_lib::{
    health::{components, HealthRegistry},
    inference::load_models,
    observability::StructuredLogger,
    ChannelSouthbound, StatsPollerBuilder, TrafficControllerBuilder,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod bridge;
mod config;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the command stream
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting te-controller");

    let settings = config::Settings::load()?;
    let controller_config = settings.controller.clone();
    info!(
        gateway = controller_config.gateway_datapath_id,
        uplinks = ?controller_config.uplink_port_list,
        polling_interval_secs = controller_config.polling_interval_seconds,
        "Controller configured"
    );

    let logger = StructuredLogger::new(&settings.instance);
    let health_registry = HealthRegistry::new();
    health_registry.register(components::POLLER).await;
    health_registry.register(components::SOUTHBOUND).await;

    let models = load_models(
        controller_config.model_dir.as_deref(),
        controller_config.sequence_length,
    );
    let has_classifier = models.classifier.is_some();
    let has_forecaster = models.forecaster.is_some();

    if has_classifier {
        health_registry.register(components::CLASSIFIER).await;
    } else {
        logger.log_model_unavailable("classifier", "classification and rerouting disabled");
        health_registry
            .set_degraded(components::CLASSIFIER, "Classifier not loaded")
            .await;
    }
    if has_forecaster {
        health_registry.register(components::FORECASTER).await;
    } else {
        logger.log_model_unavailable("forecaster", "rewards assume idle uplinks");
        health_registry
            .set_degraded(components::FORECASTER, "Forecaster not loaded")
            .await;
    }

    let (southbound, command_rx) = ChannelSouthbound::new(controller_config.command_buffer_size);
    let controller = Arc::new(
        TrafficControllerBuilder::new(controller_config.clone())
            .models(models)
            .southbound(Arc::new(southbound))
            .health(health_registry.clone())
            .instance(settings.instance.clone())
            .build()?,
    );

    let poller = StatsPollerBuilder::new()
        .controller(controller.clone())
        .health(health_registry.clone())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (notification_tx, notification_rx) = mpsc::channel(settings.notification_buffer_size);

    let reader_handle = tokio::spawn(bridge::read_notifications(
        BufReader::new(tokio::io::stdin()),
        notification_tx,
    ));
    let writer_handle = tokio::spawn(bridge::write_commands(command_rx, tokio::io::stdout()));
    let loop_handle = tokio::spawn(
        controller
            .clone()
            .run(notification_rx, shutdown_tx.subscribe()),
    );
    let poller_handle = tokio::spawn(poller.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), controller.clone()));
    let api_handle = tokio::spawn(api::serve(settings.api_port, app_state));

    health_registry.set_ready(true).await;
    logger.log_startup(
        CONTROLLER_VERSION,
        has_classifier,
        has_forecaster,
        &controller_config.uplink_port_list,
    );

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    let stopped = [
        ("notification loop", loop_handle.await),
        ("stats poller", poller_handle.await),
    ];
    for (name, result) in stopped {
        if let Err(e) = result {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }

    reader_handle.abort();
    api_handle.abort();
    writer_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
