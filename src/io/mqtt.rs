//! MQTT client for receiving tracker frames

use crate::domain::types::FrameObservation;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::frames::parse_frames;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Outcome of forwarding one frame into the processing channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forward {
    Sent,
    Dropped,
    Closed,
}

/// Rate-limits drop warnings to one per interval
struct DropWarner {
    last_warn: Option<Instant>,
    interval: Duration,
}

impl DropWarner {
    fn new(interval: Duration) -> Self {
        Self { last_warn: None, interval }
    }

    fn should_warn(&mut self) -> bool {
        let due = self.last_warn.map_or(true, |t| t.elapsed() >= self.interval);
        if due {
            self.last_warn = Some(Instant::now());
        }
        due
    }
}

/// Push a frame without blocking the MQTT event loop
fn forward_frame(
    frame_tx: &mpsc::Sender<FrameObservation>,
    frame: FrameObservation,
    metrics: &Metrics,
    warner: &mut DropWarner,
) -> Forward {
    metrics.record_frame_received();
    match frame_tx.try_send(frame) {
        Ok(()) => Forward::Sent,
        Err(TrySendError::Full(_)) => {
            metrics.record_frame_dropped();
            if warner.should_warn() {
                warn!(dropped_total = %metrics.frames_dropped(), "mqtt_frame_dropped: channel full");
            }
            Forward::Dropped
        }
        Err(TrySendError::Closed(_)) => Forward::Closed,
    }
}

/// Subscribe to the tracker topic and forward parsed frames until shutdown
pub async fn start_mqtt_client(
    config: &Config,
    frame_tx: mpsc::Sender<FrameObservation>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let client_id = format!("barrier-ingest-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    let topic = config.mqtt_topic().to_string();

    info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_ingest_starting");

    let mut warner = DropWarner::new(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let json_str = match std::str::from_utf8(&publish.payload) {
                            Ok(s) => s,
                            Err(e) => {
                                metrics.record_frame_invalid();
                                warn!(error = %e, "mqtt_payload_not_utf8");
                                continue;
                            }
                        };

                        let frames = match parse_frames(json_str) {
                            Ok(frames) => frames,
                            Err(e) => {
                                metrics.record_frame_invalid();
                                debug!(topic = %publish.topic, error = %e, "mqtt_payload_invalid");
                                continue;
                            }
                        };

                        for frame in frames {
                            if forward_frame(&frame_tx, frame, &metrics, &mut warner) == Forward::Closed {
                                warn!("frame_channel_closed");
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean sessions lose subscriptions across reconnects
                        info!("mqtt_connected");
                        if let Err(e) = client.subscribe(topic.as_str(), QoS::AtMostOnce).await {
                            error!(error = %e, topic = %topic, "mqtt_subscribe_failed");
                        } else {
                            info!(topic = %topic, "mqtt_subscribed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
