//! Barrier gateway - drives a vehicle barrier from tracker output
//!
//! Module structure:
//! - `domain/` - Core types (barrier states, transitions, frames)
//! - `io/` - External interfaces (MQTT ingest, replay, egress)
//! - `services/` - Business logic (BarrierController, MotionEstimator, FrameProcessor)
//! - `infra/` - Infrastructure (Config, Metrics)

use barrier_gateway::infra::{Config, Metrics};
use barrier_gateway::io::{create_egress_channel, MqttPublisher};
use barrier_gateway::services::FrameProcessor;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Barrier gateway - vehicle barrier control from tracked objects
#[derive(Parser, Debug)]
#[command(name = "barrier-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Replay frames from a JSONL file instead of subscribing to MQTT
    #[arg(short, long)]
    replay: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-track motion
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "barrier-gateway starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    let thresholds = config.barrier_thresholds();
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        open_thresh = %thresholds.open_thresh,
        close_delay = %thresholds.close_delay,
        inactivity_timeout = %thresholds.inactivity_timeout,
        open_close_duration = %thresholds.open_close_duration,
        min_angle = %thresholds.min_angle,
        forced_open = %config.forced_open_enabled(),
        egress_file = %config.egress_file(),
        replay = ?args.replay,
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let metrics = Arc::new(Metrics::new());

    // Bounded for backpressure
    let (frame_tx, frame_rx) = mpsc::channel(config.frame_channel_size());

    match args.replay {
        Some(path) => {
            let replay_metrics = metrics.clone();
            let replay_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = barrier_gateway::io::frames::replay_file(
                    &path,
                    frame_tx,
                    replay_metrics,
                    replay_shutdown,
                )
                .await
                {
                    tracing::error!(error = %format!("{:#}", e), "replay_error");
                }
            });
        }
        None => {
            let mqtt_config = config.clone();
            let mqtt_metrics = metrics.clone();
            let mqtt_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = barrier_gateway::io::mqtt::start_mqtt_client(
                    &mqtt_config,
                    frame_tx,
                    mqtt_metrics,
                    mqtt_shutdown,
                )
                .await
                {
                    tracing::error!(error = %format!("{:#}", e), "mqtt_client_error");
                }
            });
        }
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Create MQTT egress channel and publisher (if enabled)
    let (egress_sender, publisher_handle) = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        let publisher_handle = tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Metrics egress runs on its own interval, separate from logging
        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs().max(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                metrics_egress.send_metrics(metrics_for_egress.report());
            }
        });

        (Some(egress_sender), Some(publisher_handle))
    } else {
        (None, None)
    };

    let mut processor = FrameProcessor::new(&config, metrics, egress_sender);

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Consumes frames until the ingest side finishes or shutdown
    processor.run(frame_rx, shutdown_rx).await;

    // Replay ends without Ctrl+C; stop the publisher so it flushes queued transitions
    let _ = shutdown_tx.send(true);
    info!(state = %processor.state(), "frame_processor_stopped");
    drop(processor);
    if let Some(handle) = publisher_handle {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            warn!("mqtt_egress_flush_timeout");
        }
    }

    info!("barrier-gateway shutdown complete");
    Ok(())
}
