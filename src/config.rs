use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{DetectorBuilder, MIN_FACE_SIZE_FLOOR};
use crate::dispatch::DEFAULT_BROADCAST_TOPIC;
use crate::transport::{
    parse_mqtt_endpoint, publish_packet_size, validate_loopback_addr, MqttLinkConfig, TlsMaterials, DEFAULT_CLIENT_ID,
    DEFAULT_QUEUE_TOPIC,
};
use crate::worker::{WorkerConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const MAX_WORKERS: usize = 64;
/// Outgoing MQTT packet cap as a multiple of the upload cap. A re-encoded
/// PNG of a decoded JPEG, base64-wrapped, can exceed three times the upload.
const OUTGOING_PACKET_FACTOR: usize = 4;

#[derive(Debug, Deserialize, Default)]
struct DukerdConfigFile {
    classifier_file: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    workers: Option<WorkersConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    min_face_size: Option<u32>,
    score_thresh: Option<f64>,
    pyramid_scale_factor: Option<f32>,
    slide_window_step: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct WorkersConfigFile {
    count: Option<usize>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    queue_topic: Option<String>,
    broadcast_topic: Option<String>,
    max_outgoing_bytes: Option<usize>,
    allow_remote: Option<bool>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DukerdConfig {
    pub api_addr: String,
    pub max_upload_bytes: usize,
    /// `None` selects the bundled frontal-face model.
    pub classifier_file: Option<PathBuf>,
    pub detector: DetectorSettings,
    pub workers: WorkerConfig,
    pub broadcast_topic: String,
    pub mqtt: Option<MqttSettings>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            min_face_size: 20,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_addr: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub queue_topic: String,
    /// Largest packet the bridge publishes. `None` derives it from the upload cap.
    pub max_outgoing_bytes: Option<usize>,
    pub allow_remote: bool,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
}

impl DukerdConfig {
    /// Defaults, then the JSON file named by `DUKER_CONFIG`, then `DUKER_*` env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DUKER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DukerdConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let workers = file.workers.unwrap_or_default();
        let defaults = DetectorSettings::default();

        let broadcast_topic = file
            .mqtt
            .as_ref()
            .and_then(|mqtt| mqtt.broadcast_topic.clone())
            .unwrap_or_else(|| DEFAULT_BROADCAST_TOPIC.to_string());
        let mqtt = file.mqtt.and_then(|mqtt| {
            let broker_addr = mqtt.broker_addr?;
            Some(MqttSettings {
                broker_addr,
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                username: mqtt.username,
                password: mqtt.password,
                queue_topic: mqtt
                    .queue_topic
                    .unwrap_or_else(|| DEFAULT_QUEUE_TOPIC.to_string()),
                max_outgoing_bytes: mqtt.max_outgoing_bytes,
                allow_remote: mqtt.allow_remote.unwrap_or(false),
                use_tls: mqtt.use_tls.unwrap_or(false),
                tls_ca_path: mqtt.tls_ca_path,
                tls_client_cert_path: mqtt.tls_client_cert_path,
                tls_client_key_path: mqtt.tls_client_key_path,
            })
        });

        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            classifier_file: file.classifier_file,
            detector: DetectorSettings {
                min_face_size: detector.min_face_size.unwrap_or(defaults.min_face_size),
                score_thresh: detector.score_thresh.unwrap_or(defaults.score_thresh),
                pyramid_scale_factor: detector
                    .pyramid_scale_factor
                    .unwrap_or(defaults.pyramid_scale_factor),
                slide_window_step: detector
                    .slide_window_step
                    .unwrap_or(defaults.slide_window_step),
            },
            workers: WorkerConfig {
                workers: workers.count.unwrap_or(DEFAULT_WORKERS),
                queue_capacity: workers.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            },
            broadcast_topic,
            mqtt,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("DUKER_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(path) = non_empty_env("DUKER_CLASSIFIER_FILE") {
            self.classifier_file = Some(PathBuf::from(path));
        }
        if let Some(bytes) = non_empty_env("DUKER_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = bytes
                .parse()
                .map_err(|_| anyhow!("DUKER_MAX_UPLOAD_BYTES must be an integer byte count"))?;
        }
        if let Some(count) = non_empty_env("DUKER_WORKERS") {
            self.workers.workers = count
                .parse()
                .map_err(|_| anyhow!("DUKER_WORKERS must be an integer"))?;
        }
        if let Some(capacity) = non_empty_env("DUKER_QUEUE_CAPACITY") {
            self.workers.queue_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("DUKER_QUEUE_CAPACITY must be an integer"))?;
        }
        if let Some(topic) = non_empty_env("DUKER_BROADCAST_TOPIC") {
            self.broadcast_topic = topic;
        }

        if let Some(broker_addr) = non_empty_env("DUKER_MQTT_BROKER_ADDR") {
            match self.mqtt.as_mut() {
                Some(mqtt) => mqtt.broker_addr = broker_addr,
                None => {
                    self.mqtt = Some(MqttSettings {
                        broker_addr,
                        client_id: DEFAULT_CLIENT_ID.to_string(),
                        username: None,
                        password: None,
                        queue_topic: DEFAULT_QUEUE_TOPIC.to_string(),
                        max_outgoing_bytes: None,
                        allow_remote: false,
                        use_tls: false,
                        tls_ca_path: None,
                        tls_client_cert_path: None,
                        tls_client_key_path: None,
                    })
                }
            }
        }
        if let Some(mqtt) = self.mqtt.as_mut() {
            if let Some(id) = non_empty_env("DUKER_MQTT_CLIENT_ID") {
                mqtt.client_id = id;
            }
            if let Some(user) = non_empty_env("DUKER_MQTT_USERNAME") {
                mqtt.username = Some(user);
            }
            if let Some(password) = non_empty_env("DUKER_MQTT_PASSWORD") {
                mqtt.password = Some(password);
            }
            if let Some(topic) = non_empty_env("DUKER_QUEUE_TOPIC") {
                mqtt.queue_topic = topic;
            }
            if let Some(bytes) = non_empty_env("DUKER_MQTT_MAX_OUTGOING_BYTES") {
                mqtt.max_outgoing_bytes = Some(bytes.parse().map_err(|_| {
                    anyhow!("DUKER_MQTT_MAX_OUTGOING_BYTES must be an integer byte count")
                })?);
            }
            if let Some(flag) = non_empty_env("DUKER_ALLOW_REMOTE_MQTT") {
                mqtt.allow_remote = parse_bool("DUKER_ALLOW_REMOTE_MQTT", &flag)?;
            }
            if let Some(flag) = non_empty_env("DUKER_MQTT_USE_TLS") {
                mqtt.use_tls = parse_bool("DUKER_MQTT_USE_TLS", &flag)?;
            }
            if let Some(path) = non_empty_env("DUKER_MQTT_TLS_CA_PATH") {
                mqtt.tls_ca_path = Some(PathBuf::from(path));
            }
            if let Some(path) = non_empty_env("DUKER_MQTT_TLS_CLIENT_CERT_PATH") {
                mqtt.tls_client_cert_path = Some(PathBuf::from(path));
            }
            if let Some(path) = non_empty_env("DUKER_MQTT_TLS_CLIENT_KEY_PATH") {
                mqtt.tls_client_key_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.workers.workers == 0 || self.workers.workers > MAX_WORKERS {
            return Err(anyhow!(
                "worker count must be between 1 and {}, got {}",
                MAX_WORKERS,
                self.workers.workers
            ));
        }
        if self.workers.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be greater than zero"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max upload size must be greater than zero"));
        }
        if self.broadcast_topic.trim().is_empty() {
            return Err(anyhow!("broadcast topic must not be empty"));
        }

        let d = &self.detector;
        if d.min_face_size < MIN_FACE_SIZE_FLOOR {
            return Err(anyhow!(
                "detector.min_face_size must be at least {}",
                MIN_FACE_SIZE_FLOOR
            ));
        }
        if !(d.pyramid_scale_factor > 0.0 && d.pyramid_scale_factor < 1.0) {
            return Err(anyhow!("detector.pyramid_scale_factor must be in (0, 1)"));
        }
        if d.slide_window_step == 0 {
            return Err(anyhow!("detector.slide_window_step must be positive"));
        }

        if let Some(mqtt) = &self.mqtt {
            let endpoint = parse_mqtt_endpoint(&mqtt.broker_addr, mqtt.use_tls)?;
            if !mqtt.allow_remote {
                validate_loopback_addr(&endpoint, &mqtt.broker_addr)?;
            }
            if mqtt.tls_client_cert_path.is_some() != mqtt.tls_client_key_path.is_some() {
                return Err(anyhow!(
                    "MQTT TLS client cert and key must be provided together"
                ));
            }
            if mqtt.queue_topic.trim().is_empty() {
                return Err(anyhow!("queue topic must not be empty"));
            }
            let job_packet = self.max_incoming_bytes(mqtt);
            if self.max_outgoing_bytes(mqtt) < job_packet {
                return Err(anyhow!(
                    "mqtt.max_outgoing_bytes must be at least the queued job packet ({} bytes)",
                    job_packet
                ));
            }
        }
        Ok(())
    }

    /// Builder for the configured classifier and scan parameters.
    pub fn detector_builder(&self) -> DetectorBuilder {
        let d = &self.detector;
        let builder = DetectorBuilder::new()
            .min_face_size(d.min_face_size)
            .score_thresh(d.score_thresh)
            .pyramid_scale_factor(d.pyramid_scale_factor)
            .slide_window_step(d.slide_window_step, d.slide_window_step);
        match &self.classifier_file {
            Some(path) => builder.classifier_file(path),
            None => builder,
        }
    }

    /// Resolved MQTT link settings, reading TLS materials from disk.
    pub fn mqtt_link(&self) -> Result<Option<MqttLinkConfig>> {
        let Some(mqtt) = &self.mqtt else {
            return Ok(None);
        };
        let endpoint = parse_mqtt_endpoint(&mqtt.broker_addr, mqtt.use_tls)?;
        let tls = TlsMaterials::load(
            mqtt.tls_ca_path.as_deref(),
            mqtt.tls_client_cert_path.as_deref(),
            mqtt.tls_client_key_path.as_deref(),
        )?;
        Ok(Some(MqttLinkConfig {
            endpoint,
            tls,
            client_id: mqtt.client_id.clone(),
            username: mqtt.username.clone(),
            password: mqtt.password.clone(),
            queue_topic: mqtt.queue_topic.clone(),
            max_incoming_bytes: self.max_incoming_bytes(mqtt),
            max_outgoing_bytes: self.max_outgoing_bytes(mqtt),
        }))
    }

    /// Queued jobs are raw uploads framed as a QoS 1 publish.
    fn max_incoming_bytes(&self, mqtt: &MqttSettings) -> usize {
        publish_packet_size(&mqtt.queue_topic, self.max_upload_bytes)
    }

    fn max_outgoing_bytes(&self, mqtt: &MqttSettings) -> usize {
        mqtt.max_outgoing_bytes
            .unwrap_or_else(|| self.max_upload_bytes.saturating_mul(OUTGOING_PACKET_FACTOR))
    }
}

fn read_config_file(path: &Path) -> Result<DukerdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", key, other)),
    }
}
