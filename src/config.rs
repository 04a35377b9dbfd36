//! Configuration management
//!
//! Two documents live here:
//! - `config.toml` in the platform config directory: how the process runs
//!   (ports, timeouts, audio block size, HTTP API).
//! - settings files (JSON) chosen by the operator: the telemetry source, the
//!   audio device and the effect list.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_HTTP_PORT, PAUSE_TIMEOUT_MS, PLOT_HISTORY, POLL_INTERVAL_MS,
    STOP_TIMEOUT_MS,
};
use crate::effects::EffectConfig;
use crate::error::{ConfigError, NetworkError};

const CONFIG_FILE: &str = "config.toml";

/// Process configuration, one section per subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Telemetry socket and worker timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address to listen on (default: 127.0.0.1)
    #[serde(default = "default_loopback")]
    pub bind_address: String,
    /// UDP port; the source's own port when unset
    #[serde(default)]
    pub udp_port: Option<u16>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Quiet period before effects are silenced (default: 100)
    #[serde(default = "default_pause_timeout")]
    pub pause_timeout_ms: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
    /// Socket receive buffer in bytes, 0 for the OS default
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output device name; the default device when unset
    #[serde(default)]
    pub device: Option<String>,
    /// Frames per callback (default: 128)
    #[serde(default = "default_block_size")]
    pub block_size: u32,
}

/// HTTP control API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_loopback")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Plot samples kept per effect
    #[serde(default = "default_plot_history")]
    pub plot_history: usize,
}

fn default_true() -> bool {
    true
}
fn default_loopback() -> String {
    "127.0.0.1".to_string()
}
fn default_poll_interval() -> u64 {
    POLL_INTERVAL_MS
}
fn default_pause_timeout() -> u64 {
    PAUSE_TIMEOUT_MS
}
fn default_stop_timeout() -> u64 {
    STOP_TIMEOUT_MS
}
fn default_recv_buffer() -> usize {
    256 * 1024
}
fn default_block_size() -> u32 {
    DEFAULT_BLOCK_SIZE
}
fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_plot_history() -> usize {
    PLOT_HISTORY
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_loopback(),
            udp_port: None,
            poll_interval_ms: default_poll_interval(),
            pause_timeout_ms: default_pause_timeout(),
            stop_timeout_ms: default_stop_timeout(),
            recv_buffer_size: default_recv_buffer(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            block_size: default_block_size(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind_address: default_loopback(),
            http_port: default_http_port(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plot_history: default_plot_history(),
        }
    }
}

impl NetworkConfig {
    /// Listen address, falling back to `default_port` when no port is configured
    pub fn socket_addr(&self, default_port: u16) -> Result<SocketAddr, NetworkError> {
        let ip: IpAddr = self.bind_address.parse().map_err(|_| {
            NetworkError::BindFailed(format!("invalid bind address '{}'", self.bind_address))
        })?;
        Ok(SocketAddr::new(ip, self.udp_port.unwrap_or(default_port)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pause_timeout(&self) -> Duration {
        Duration::from_millis(self.pause_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl UiConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind_address.parse().map_err(|_| ConfigError::Parse {
            path: PathBuf::from(CONFIG_FILE),
            details: format!("invalid ui.bind_address '{}'", self.bind_address),
        })?;
        Ok(SocketAddr::new(ip, self.http_port))
    }
}

/// Platform configuration directory, `None` without a home directory
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "shakelab", "ShakeLab")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Platform data directory; recordings go here by default
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "shakelab", "ShakeLab")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

impl AppConfig {
    /// Load `config.toml` from the config directory.
    /// A missing file gives the defaults; an unreadable one is reported and
    /// the defaults are used.
    pub fn load() -> Self {
        let Some(path) = config_dir().map(|dir| dir.join(CONFIG_FILE)) else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Using default configuration");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
    }

    /// Save to the config directory, creating it if needed
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
        let path = dir.join(CONFIG_FILE);
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        write_file(path, &content)
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, content).map_err(io_err)
}

/// Which parts of a settings file to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSelection {
    #[serde(default = "default_true")]
    pub game_file: bool,
    #[serde(default = "default_true")]
    pub effects: bool,
    #[serde(default = "default_true")]
    pub audio_device: bool,
}

impl Default for LoadSelection {
    fn default() -> Self {
        Self {
            game_file: true,
            effects: true,
            audio_device: true,
        }
    }
}

/// Operator settings: source, device and effects, stored by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub game_file: Option<String>,
    pub audio_device: Option<String>,
    pub effects: Vec<EffectConfig>,
}

/// A settings file after decoding
#[derive(Debug, Clone, Default)]
pub struct LoadedSettings {
    pub settings: Settings,
    /// Effect records that failed to decode: (key, reason)
    pub skipped: Vec<(String, String)>,
}

#[derive(Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    game_file: String,
    #[serde(default)]
    audio_device: String,
    #[serde(default)]
    effects: Map<String, Value>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<LoadedSettings, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let loaded = Self::from_json(&content).map_err(|details| ConfigError::Parse {
            path: path.to_path_buf(),
            details,
        })?;

        for (key, reason) in &loaded.skipped {
            warn!(path = %path.display(), effect = %key, "Skipped effect: {}", reason);
        }
        info!(
            path = %path.display(),
            effects = loaded.settings.effects.len(),
            "Settings loaded"
        );
        Ok(loaded)
    }

    /// Decode a settings document. Effects decode one by one so a bad record
    /// does not discard the rest.
    pub fn from_json(content: &str) -> Result<LoadedSettings, String> {
        let file: SettingsFile = serde_json::from_str(content).map_err(|e| e.to_string())?;

        let mut effects = Vec::with_capacity(file.effects.len());
        let mut skipped = Vec::new();
        for (key, record) in file.effects {
            match serde_json::from_value::<EffectConfig>(record) {
                Ok(mut effect) => {
                    if let Ok(id) = Uuid::parse_str(&key) {
                        effect.id = id;
                    }
                    if effects.iter().any(|e: &EffectConfig| e.id == effect.id) {
                        skipped.push((key, "duplicate effect id".to_string()));
                        continue;
                    }
                    effects.push(effect);
                }
                Err(e) => skipped.push((key, e.to_string())),
            }
        }

        Ok(LoadedSettings {
            settings: Settings {
                game_file: Some(file.game_file).filter(|s| !s.is_empty()),
                audio_device: Some(file.audio_device).filter(|s| !s.is_empty()),
                effects,
            },
            skipped,
        })
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        let mut effects = Map::new();
        for effect in &self.effects {
            let record =
                serde_json::to_value(effect).map_err(|e| ConfigError::Serialize(e.to_string()))?;
            effects.insert(effect.id.to_string(), record);
        }
        let file = SettingsFile {
            game_file: self.game_file.clone().unwrap_or_default(),
            audio_device: self.audio_device.clone().unwrap_or_default(),
            effects,
        };
        serde_json::to_string_pretty(&file).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        write_file(path, &self.to_json()?)?;
        info!(path = %path.display(), effects = self.effects.len(), "Settings saved");
        Ok(())
    }
}
