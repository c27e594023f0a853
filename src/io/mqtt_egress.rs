//! MQTT publisher for egress events
//!
//! Publishes barrier events to MQTT topics for downstream consumers:
//! - barrier/gate - Barrier state changes (QoS 0)
//! - barrier/metrics - Periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    gate_topic: String,
    metrics_topic: String,
    /// Event loop task, finishes once the disconnect has been written
    eventloop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("barrier-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        let eventloop = tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("mqtt_egress_disconnected");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            gate_topic: config.mqtt_egress_gate_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
            eventloop,
        }
    }

    /// Run the publisher loop until shutdown or until every sender is gone
    ///
    /// On exit, queued messages are published and the client disconnects so
    /// the event loop writes them out before the task returns.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(gate = %self.gate_topic, metrics = %self.metrics_topic, "mqtt_egress_started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        break;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.publish_message(msg).await,
                        None => {
                            info!("mqtt_egress_channel_closed");
                            break;
                        }
                    }
                }
            }
        }

        self.flush().await;
    }

    async fn flush(mut self) {
        let mut drained = 0usize;
        while let Ok(msg) = self.rx.try_recv() {
            self.publish_message(msg).await;
            drained += 1;
        }
        // Requests are written in order, so the disconnect goes out last
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "mqtt_egress_disconnect_failed");
            self.eventloop.abort();
            return;
        }
        if let Err(e) = self.eventloop.await {
            warn!(error = %e, "mqtt_egress_eventloop_failed");
        }
        info!(drained = %drained, "mqtt_egress_flushed");
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::GateState(payload) => {
                self.publish_json(&self.gate_topic, &payload, "mqtt_egress_gate_failed").await;
            }
            EgressMessage::Metrics(payload) => {
                self.publish_json(&self.metrics_topic, &payload, "mqtt_egress_metrics_failed")
                    .await;
            }
        }
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, payload: &T, failure: &'static str) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, topic = %topic, "mqtt_egress_serialize_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, false, json.into_bytes()).await
        {
            debug!(error = %e, topic = %topic, kind = %failure, "mqtt_egress_publish_failed");
        }
    }
}
