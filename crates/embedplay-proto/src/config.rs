use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;
use crate::protocol::{PresentationMode, QualityLevel, RepeatMode};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub playlist: PlaylistConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Well-known id of the node that hosts the embedded player.
    #[serde(default = "default_container_id")]
    pub container_id: String,
    /// Linear 0–100 slider value applied on startup.
    #[serde(default = "default_volume")]
    pub default_volume: f64,
}

/// Presentation-mode → quality mapping and negotiation timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_hidden_quality")]
    pub hidden: QualityLevel,
    #[serde(default = "default_floating_quality")]
    pub floating: QualityLevel,
    #[serde(default = "default_fullscreen_quality")]
    pub fullscreen: QualityLevel,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_in_flight_guard_ms")]
    pub in_flight_guard_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Seed playlist for the headless daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistConfig {
    #[serde(default)]
    pub video_ids: Vec<String>,
    #[serde(default)]
    pub repeat: RepeatMode,
}

impl QualityConfig {
    pub fn target_for(&self, mode: PresentationMode) -> QualityLevel {
        match mode {
            PresentationMode::Hidden => self.hidden,
            PresentationMode::Floating => self.floating,
            PresentationMode::Fullscreen => self.fullscreen,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn in_flight_guard(&self) -> Duration {
        Duration::from_millis(self.in_flight_guard_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            log_file: default_log_file(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            container_id: default_container_id(),
            default_volume: default_volume(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            hidden: default_hidden_quality(),
            floating: default_floating_quality(),
            fullscreen: default_fullscreen_quality(),
            debounce_ms: default_debounce_ms(),
            in_flight_guard_ms: default_in_flight_guard_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("daemon.log")
}

fn default_container_id() -> String {
    "embedded-player-host".to_string()
}

fn default_volume() -> f64 {
    50.0
}

fn default_hidden_quality() -> QualityLevel {
    QualityLevel::Tiny
}

fn default_floating_quality() -> QualityLevel {
    QualityLevel::Medium
}

fn default_fullscreen_quality() -> QualityLevel {
    QualityLevel::Hd1080
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_in_flight_guard_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
