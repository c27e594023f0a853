//! Configuration loading from TOML files
//!
//! The binary picks the file from `--config`, then `CONFIG_FILE`, then
//! `config/dev.toml`. A missing or invalid file falls back to defaults.

use crate::domain::barrier::BarrierThresholds;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Topic carrying per-frame tracker output
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BarrierConfig {
    #[serde(default = "default_open_thresh_secs")]
    pub open_thresh_secs: f64,
    #[serde(default = "default_close_delay_secs")]
    pub close_delay_secs: f64,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: f64,
    #[serde(default = "default_open_close_duration_secs")]
    pub open_close_duration_secs: f64,
    #[serde(default = "default_min_angle_deg")]
    pub min_angle_deg: f64,
}

fn default_open_thresh_secs() -> f64 {
    1.0
}

fn default_close_delay_secs() -> f64 {
    5.0
}

fn default_inactivity_timeout_secs() -> f64 {
    120.0
}

fn default_open_close_duration_secs() -> f64 {
    1.0
}

fn default_min_angle_deg() -> f64 {
    30.0
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            open_thresh_secs: default_open_thresh_secs(),
            close_delay_secs: default_close_delay_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            open_close_duration_secs: default_open_close_duration_secs(),
            min_angle_deg: default_min_angle_deg(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForcedOpenConfig {
    #[serde(default = "default_forced_open_enabled")]
    pub enabled: bool,
    /// Fraction of frame height; a box centre below this line forces an open
    #[serde(default = "default_forced_open_line_ratio")]
    pub line_ratio: f64,
}

fn default_forced_open_enabled() -> bool {
    true
}

fn default_forced_open_line_ratio() -> f64 {
    1.0 / 3.0
}

impl Default for ForcedOpenConfig {
    fn default() -> Self {
        Self { enabled: default_forced_open_enabled(), line_ratio: default_forced_open_line_ratio() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_track_ttl_secs")]
    pub track_ttl_secs: f64,
}

fn default_history_len() -> usize {
    30
}

fn default_track_ttl_secs() -> f64 {
    2.0
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self { history_len: default_history_len(), track_ttl_secs: default_track_ttl_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Bounded frame channel capacity
    #[serde(default = "default_frame_channel_size")]
    pub channel_size: usize,
}

fn default_frame_channel_size() -> usize {
    256
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { channel_size: default_frame_channel_size() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for transition egress (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file() }
    }
}

fn default_egress_file() -> String {
    "transitions.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for barrier state changes (QoS 0)
    #[serde(default = "default_gate_topic")]
    pub gate_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_gate_topic() -> String {
    "barrier/gate".to_string()
}

fn default_metrics_topic() -> String {
    "barrier/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            gate_topic: default_gate_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "north-gate")
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "barrier".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub barrier: BarrierConfig,
    #[serde(default)]
    pub forced_open: ForcedOpenConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    barrier_thresholds: BarrierThresholds,
    forced_open_enabled: bool,
    forced_open_line_ratio: f64,
    motion_history_len: usize,
    motion_track_ttl_secs: f64,
    frame_channel_size: usize,
    metrics_interval_secs: u64,
    config_file: String,
    egress_file: String,
    // MQTT Egress config
    mqtt_egress_enabled: bool,
    mqtt_egress_gate_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "tracker/frames".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            barrier_thresholds: BarrierThresholds::default(),
            forced_open_enabled: default_forced_open_enabled(),
            forced_open_line_ratio: default_forced_open_line_ratio(),
            motion_history_len: default_history_len(),
            motion_track_ttl_secs: default_track_ttl_secs(),
            frame_channel_size: default_frame_channel_size(),
            metrics_interval_secs: 10,
            config_file: "default".to_string(),
            egress_file: default_egress_file(),
            mqtt_egress_enabled: default_mqtt_egress_enabled(),
            mqtt_egress_gate_topic: default_gate_topic(),
            mqtt_egress_metrics_topic: default_metrics_topic(),
            mqtt_egress_metrics_interval_secs: default_metrics_publish_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let barrier = toml_config.barrier;
        let barrier_thresholds = BarrierThresholds {
            open_thresh: barrier.open_thresh_secs,
            close_delay: barrier.close_delay_secs,
            inactivity_timeout: barrier.inactivity_timeout_secs,
            open_close_duration: barrier.open_close_duration_secs,
            min_angle: barrier.min_angle_deg,
        };

        let line_ratio = toml_config.forced_open.line_ratio;
        if !(0.0..=1.0).contains(&line_ratio) {
            anyhow::bail!(
                "forced_open.line_ratio must be within [0, 1], got {} in {}",
                line_ratio,
                path.display()
            );
        }

        Ok(Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            barrier_thresholds,
            forced_open_enabled: toml_config.forced_open.enabled,
            forced_open_line_ratio: line_ratio,
            motion_history_len: toml_config.motion.history_len,
            motion_track_ttl_secs: toml_config.motion.track_ttl_secs,
            frame_channel_size: toml_config.ingest.channel_size.max(1),
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
            egress_file: toml_config.egress.file,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_gate_topic: toml_config.mqtt_egress.gate_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
        })
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn barrier_thresholds(&self) -> BarrierThresholds {
        self.barrier_thresholds
    }

    pub fn forced_open_enabled(&self) -> bool {
        self.forced_open_enabled
    }

    pub fn forced_open_line_ratio(&self) -> f64 {
        self.forced_open_line_ratio
    }

    pub fn motion_history_len(&self) -> usize {
        self.motion_history_len
    }

    pub fn motion_track_ttl_secs(&self) -> f64 {
        self.motion_track_ttl_secs
    }

    pub fn frame_channel_size(&self) -> usize {
        self.frame_channel_size
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    // MQTT Egress getters
    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_gate_topic(&self) -> &str {
        &self.mqtt_egress_gate_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    /// Builder method for tests and replay runs to override the egress file
    pub fn with_egress_file(mut self, file: &str) -> Self {
        self.egress_file = file.to_string();
        self
    }

    /// Builder method for tests to toggle the forced-open line
    pub fn with_forced_open(mut self, enabled: bool) -> Self {
        self.forced_open_enabled = enabled;
        self
    }

    /// Builder method for tests to point MQTT at a local broker
    pub fn with_mqtt_broker(mut self, host: &str, port: u16) -> Self {
        self.mqtt_host = host.to_string();
        self.mqtt_port = port;
        self
    }

    /// Builder method for tests to override controller thresholds
    pub fn with_barrier_thresholds(mut self, thresholds: BarrierThresholds) -> Self {
        self.barrier_thresholds = thresholds;
        self
    }
}
