use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_API_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SOCKET_PREFIX: &str = "/api/websocket";
const DEFAULT_TARGET_CLASS: &str = "cell phone";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.35;
const DEFAULT_POLL_INTERVAL_MS: u64 = 800;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_COOLDOWN_SECS: u64 = 12;
const DEFAULT_STREAM_FPS: u32 = 10;

const MIN_POLL_INTERVAL_MS: u64 = 100;
const MAX_POLL_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    api: Option<ApiConfigFile>,
    detection: Option<DetectionConfigFile>,
    relay: Option<RelayConfigFile>,
    stream: Option<StreamConfigFile>,
    display: Option<DisplayConfigFile>,
    session: Option<SessionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    socket_prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    target_class: Option<String>,
    confidence_threshold: Option<f32>,
    poll_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    token_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub api_url: String,
    pub api_timeout: Duration,
    /// Path prefix the backend mounts its sockets under.
    pub socket_prefix: String,
    pub detection: DetectionSettings,
    pub relay_enabled: bool,
    pub stream: StreamSettings,
    /// Rendered size of the video; `None` renders at native size.
    pub display_size: Option<(u32, u32)>,
    /// TrueType font for overlay labels; system fonts are tried when unset.
    pub label_font: Option<PathBuf>,
    pub token_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub target_class: String,
    pub confidence_threshold: f32,
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Explicit camera stream; derived from the sign-in response when unset.
    pub url: Option<String>,
    pub target_fps: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// File named by `CLASSWATCH_CONFIG` (if any), then `CLASSWATCH_*` env
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CLASSWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let display = file.display.unwrap_or_default();
        Self {
            api_url: api.base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_timeout: Duration::from_millis(api.timeout_ms.unwrap_or(DEFAULT_API_TIMEOUT_MS)),
            socket_prefix: api
                .socket_prefix
                .unwrap_or_else(|| DEFAULT_SOCKET_PREFIX.to_string()),
            detection: DetectionSettings {
                target_class: detection
                    .target_class
                    .unwrap_or_else(|| DEFAULT_TARGET_CLASS.to_string()),
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                poll_interval: Duration::from_millis(
                    detection.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
                ),
                jpeg_quality: detection.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                cooldown: Duration::from_secs(
                    detection.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
                ),
            },
            relay_enabled: file.relay.and_then(|relay| relay.enabled).unwrap_or(true),
            stream: StreamSettings {
                url: stream.url,
                target_fps: stream.target_fps.unwrap_or(DEFAULT_STREAM_FPS),
            },
            display_size: match (display.width, display.height) {
                (Some(width), Some(height)) => Some((width, height)),
                _ => None,
            },
            label_font: display.font_path,
            token_path: file.session.and_then(|session| session.token_path),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CLASSWATCH_API_URL") {
            if !url.trim().is_empty() {
                self.api_url = url;
            }
        }
        if let Ok(class) = std::env::var("CLASSWATCH_TARGET_CLASS") {
            if !class.trim().is_empty() {
                self.detection.target_class = class;
            }
        }
        if let Ok(threshold) = std::env::var("CLASSWATCH_CONFIDENCE_THRESHOLD") {
            self.detection.confidence_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("CLASSWATCH_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Ok(relay) = std::env::var("CLASSWATCH_RELAY") {
            self.relay_enabled = parse_bool(&relay)
                .ok_or_else(|| anyhow!("CLASSWATCH_RELAY must be true or false"))?;
        }
        if let Ok(url) = std::env::var("CLASSWATCH_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.url = Some(url);
            }
        }
        if let Ok(path) = std::env::var("CLASSWATCH_TOKEN_PATH") {
            if !path.trim().is_empty() {
                self.token_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("CLASSWATCH_FONT_PATH") {
            if !path.trim().is_empty() {
                self.label_font = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    /// Normalize and range-check every setting. Re-run after overriding
    /// fields in code, e.g. from command-line flags.
    pub fn validate(&mut self) -> Result<()> {
        self.api_url = self.api_url.trim().trim_end_matches('/').to_string();
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(anyhow!(
                "api base url must be http(s), got '{}'",
                self.api_url
            ));
        }
        self.socket_prefix = format!("/{}", self.socket_prefix.trim().trim_matches('/'));
        if self.socket_prefix == "/" {
            self.socket_prefix.clear();
        }
        self.detection.target_class = self.detection.target_class.trim().to_lowercase();
        if self.detection.target_class.is_empty() {
            return Err(anyhow!("target class must not be empty"));
        }
        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be within 0..=1, got {}",
                threshold
            ));
        }
        let interval_ms = self.detection.poll_interval.as_millis() as u64;
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&interval_ms) {
            return Err(anyhow!(
                "poll interval must be within {}..={} ms, got {}",
                MIN_POLL_INTERVAL_MS,
                MAX_POLL_INTERVAL_MS,
                interval_ms
            ));
        }
        if !(1..=100).contains(&self.detection.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if self.detection.cooldown.as_secs() == 0 {
            return Err(anyhow!("cooldown must be greater than zero"));
        }
        if let Some((width, height)) = self.display_size {
            if width == 0 || height == 0 {
                return Err(anyhow!("display size must be non-zero"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
