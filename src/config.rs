use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

use crate::detect::{MatchRule, DEFAULT_MATCH_LABEL, DEFAULT_MIN_CONFIDENCE};
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::UriCaptureFactory;
use crate::publish::{DEFAULT_ATTACHMENT_NAME, DEFAULT_TOPIC_PREFIX};
use crate::sanitize_stream_name;
use crate::stream::{PipelineSettings, StreamIdentity, DEFAULT_BUFFER_LIMIT};
use crate::transport::{default_client_id, MqttSettings};
use crate::window::QueuePolicy;

/// Frames one window may hold; every buffered frame is a full decoded image.
pub const MAX_BUFFER_LIMIT: usize = 10_000;
const DEFAULT_RETRY_PAUSE_MS: u64 = 1000;
const DEFAULT_IDLE_POLL_MS: u64 = 100;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_STUB_WIDTH: u32 = 640;
const DEFAULT_STUB_HEIGHT: u32 = 480;
const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STORAGE_ROOT: &str = "snapshots";
const DEFAULT_STORAGE_BUCKET: &str = "stream-watch";

#[derive(Debug, Deserialize, Default)]
struct WatchConfigFile {
    buffer_limit: Option<usize>,
    streams: Option<BTreeMap<String, String>>,
    max_queued_batches: Option<usize>,
    timing: Option<TimingConfigFile>,
    capture: Option<CaptureConfigFile>,
    detector: Option<DetectorConfigFile>,
    storage: Option<StorageConfigFile>,
    notify: Option<NotifyConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    retry_pause_ms: Option<u64>,
    idle_poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    target_fps: Option<u32>,
    stub_width: Option<u32>,
    stub_height: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<DetectorKind>,
    endpoint: Option<String>,
    token: Option<String>,
    label: Option<String>,
    min_confidence: Option<f32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    kind: Option<StorageKind>,
    root: Option<PathBuf>,
    endpoint: Option<String>,
    bucket: Option<String>,
    token: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    kind: Option<NotifyKind>,
    topic_prefix: Option<String>,
    attachment_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    ca_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    #[default]
    Stub,
    #[serde(alias = "https")]
    Http,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    #[serde(alias = "fs")]
    Filesystem,
    #[serde(alias = "https")]
    Http,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    #[default]
    Log,
    Mqtt,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub buffer_limit: usize,
    /// Stream name (control topic) to source URI.
    pub streams: BTreeMap<String, String>,
    pub max_queued_batches: Option<usize>,
    pub timing: TimingSettings,
    pub capture: CaptureSettings,
    pub detector: DetectorSettings,
    pub storage: StorageSettings,
    pub notify: NotifySettings,
    pub mqtt: Option<MqttSettings>,
}

#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub retry_pause: Duration,
    pub idle_poll: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub target_fps: u32,
    pub stub_width: u32,
    pub stub_height: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub rule: MatchRule,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub kind: StorageKind,
    pub root: PathBuf,
    pub endpoint: Option<String>,
    pub bucket: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub kind: NotifyKind,
    pub topic_prefix: String,
    pub attachment_name: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::from_file(WatchConfigFile::default())
    }
}

impl WatchConfig {
    /// Load from `STREAM_WATCH_CONFIG` (when set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STREAM_WATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like `load_from`, but a broken configuration is logged and replaced by the
    /// default (empty) one.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match Self::load_from(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!("Config: {:#}; continuing with an empty configuration", e);
                Self::default()
            }
        }
    }

    fn from_file(file: WatchConfigFile) -> Self {
        let timing = file.timing.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let notify = file.notify.unwrap_or_default();

        Self {
            buffer_limit: file.buffer_limit.unwrap_or(DEFAULT_BUFFER_LIMIT),
            streams: file.streams.unwrap_or_default(),
            max_queued_batches: file.max_queued_batches,
            timing: TimingSettings {
                retry_pause: Duration::from_millis(
                    timing.retry_pause_ms.unwrap_or(DEFAULT_RETRY_PAUSE_MS),
                ),
                idle_poll: Duration::from_millis(
                    timing.idle_poll_ms.unwrap_or(DEFAULT_IDLE_POLL_MS),
                ),
            },
            capture: CaptureSettings {
                target_fps: capture.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                stub_width: capture.stub_width.unwrap_or(DEFAULT_STUB_WIDTH),
                stub_height: capture.stub_height.unwrap_or(DEFAULT_STUB_HEIGHT),
                jpeg_quality: capture.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            detector: DetectorSettings {
                kind: detector.kind.unwrap_or_default(),
                endpoint: detector.endpoint,
                token: detector.token,
                rule: MatchRule {
                    label: detector
                        .label
                        .unwrap_or_else(|| DEFAULT_MATCH_LABEL.to_string()),
                    min_confidence: detector.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                },
                timeout: Duration::from_millis(
                    detector.timeout_ms.unwrap_or(DEFAULT_DETECTOR_TIMEOUT_MS),
                ),
            },
            storage: StorageSettings {
                kind: storage.kind.unwrap_or_default(),
                root: storage
                    .root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT)),
                endpoint: storage.endpoint,
                bucket: storage
                    .bucket
                    .unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_string()),
                token: storage.token,
                timeout: Duration::from_millis(
                    storage.timeout_ms.unwrap_or(DEFAULT_STORAGE_TIMEOUT_MS),
                ),
            },
            notify: NotifySettings {
                kind: notify.kind.unwrap_or_default(),
                topic_prefix: notify
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string()),
                attachment_name: notify
                    .attachment_name
                    .unwrap_or_else(|| DEFAULT_ATTACHMENT_NAME.to_string()),
            },
            mqtt: file.mqtt.and_then(mqtt_settings),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(limit) = std::env::var("STREAM_WATCH_BUFFER_LIMIT") {
            self.buffer_limit = limit
                .trim()
                .parse()
                .map_err(|_| anyhow!("STREAM_WATCH_BUFFER_LIMIT must be a positive integer"))?;
        }
        if let Ok(streams) = std::env::var("STREAM_WATCH_STREAMS") {
            let parsed = parse_stream_list(&streams)?;
            if !parsed.is_empty() {
                self.streams = parsed;
            }
        }
        if let Ok(broker) = std::env::var("STREAM_WATCH_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                match self.mqtt.as_mut() {
                    Some(mqtt) => mqtt.broker = broker.trim().to_string(),
                    None => self.mqtt = Some(MqttSettings::new(broker.trim())),
                }
            }
        }
        if let Ok(username) = std::env::var("STREAM_WATCH_MQTT_USERNAME") {
            if let Some(mqtt) = self.mqtt.as_mut() {
                mqtt.username = Some(username).filter(|u| !u.trim().is_empty());
            }
        }
        if let Ok(password) = std::env::var("STREAM_WATCH_MQTT_PASSWORD") {
            if let Some(mqtt) = self.mqtt.as_mut() {
                mqtt.password = Some(Zeroizing::new(password));
            }
        }
        if let Ok(endpoint) = std::env::var("STREAM_WATCH_DETECTOR_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.detector.endpoint = Some(endpoint.trim().to_string());
                self.detector.kind = DetectorKind::Http;
            }
        }
        if let Ok(root) = std::env::var("STREAM_WATCH_STORAGE_ROOT") {
            if !root.trim().is_empty() {
                self.storage.root = PathBuf::from(root.trim());
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_limit == 0 {
            return Err(anyhow!("buffer_limit must be greater than zero"));
        }
        if self.buffer_limit > MAX_BUFFER_LIMIT {
            return Err(anyhow!("buffer_limit must be at most {}", MAX_BUFFER_LIMIT));
        }
        if self.max_queued_batches == Some(0) {
            return Err(anyhow!("max_queued_batches must be greater than zero when set"));
        }
        let mut directories: BTreeMap<String, &str> = BTreeMap::new();
        for (name, uri) in &self.streams {
            validate_stream_name(name)?;
            if let Some(other) = directories.insert(sanitize_stream_name(name), name) {
                return Err(anyhow!(
                    "streams '{}' and '{}' would share a storage directory",
                    other,
                    name
                ));
            }
            if uri.trim().is_empty() {
                return Err(anyhow!("stream '{}' has an empty source uri", name));
            }
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(anyhow!("capture.jpeg_quality must be between 1 and 100"));
        }
        let rule = &self.detector.rule;
        if rule.label.trim().is_empty() {
            return Err(anyhow!("detector.label must not be empty"));
        }
        if !(0.0..=100.0).contains(&rule.min_confidence) {
            return Err(anyhow!("detector.min_confidence must be between 0 and 100"));
        }
        if self.detector.kind == DetectorKind::Http && self.detector.endpoint.is_none() {
            return Err(anyhow!("detector.endpoint is required for the http detector"));
        }
        if self.storage.kind == StorageKind::Http && self.storage.endpoint.is_none() {
            return Err(anyhow!("storage.endpoint is required for http storage"));
        }
        if self.notify.kind == NotifyKind::Mqtt && self.mqtt.is_none() {
            return Err(anyhow!("notify.kind = mqtt requires an mqtt.broker"));
        }
        if self.notify.attachment_name.trim().is_empty() {
            return Err(anyhow!("notify.attachment_name must not be empty"));
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.endpoint()?;
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            buffer_limit: self.buffer_limit,
            retry_pause: self.timing.retry_pause,
            idle_poll: self.timing.idle_poll,
            queue_policy: QueuePolicy::from_cap(self.max_queued_batches),
            jpeg_quality: self.capture.jpeg_quality,
        }
    }

    pub fn capture_factory(&self) -> UriCaptureFactory {
        UriCaptureFactory {
            target_fps: self.capture.target_fps,
            stub_width: self.capture.stub_width,
            stub_height: self.capture.stub_height,
        }
    }

    pub fn stream_identities(&self) -> Vec<StreamIdentity> {
        self.streams
            .iter()
            .map(|(name, uri)| StreamIdentity::new(name.clone(), uri.clone()))
            .collect()
    }
}

fn mqtt_settings(file: MqttConfigFile) -> Option<MqttSettings> {
    let broker = file.broker.filter(|b| !b.trim().is_empty())?;
    let mut settings = MqttSettings::new(broker.trim());
    settings.client_id = file
        .client_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(default_client_id);
    settings.username = file.username;
    settings.password = file.password.map(Zeroizing::new);
    settings.use_tls = file.use_tls.unwrap_or(false);
    settings.ca_path = file.ca_path;
    settings.client_cert_path = file.client_cert_path;
    settings.client_key_path = file.client_key_path;
    Some(settings)
}

/// Stream names double as MQTT topic filters, so wildcards are rejected. They also
/// name a storage directory once sanitized, which must not be `.` or `..`.
fn validate_stream_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("stream name must not be empty"));
    }
    if matches!(sanitize_stream_name(name).as_str(), "." | "..") {
        return Err(anyhow!("stream name '{}' is not a usable directory name", name));
    }
    if name.contains('+') || name.contains('#') {
        return Err(anyhow!("stream name '{}' must not contain MQTT wildcards", name));
    }
    Ok(())
}

/// `topic=uri,topic=uri`
fn parse_stream_list(value: &str) -> Result<BTreeMap<String, String>> {
    let mut streams = BTreeMap::new();
    for entry in split_csv(value) {
        let (name, uri) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("STREAM_WATCH_STREAMS entry '{}' must be topic=uri", entry))?;
        streams.insert(name.trim().to_string(), uri.trim().to_string());
    }
    Ok(streams)
}

fn read_config_file(path: &Path) -> Result<WatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
