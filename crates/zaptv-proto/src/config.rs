use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub prebuffer: PrebufferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

/// Channel list source — either an https:// URL or a local file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Path to a local TOML channel file (highest priority).
    /// Defaults to `$XDG_CONFIG_HOME/zaptv/channels.toml`.
    #[serde(default = "default_channels_toml")]
    pub channels_toml: PathBuf,
    /// URL or file path for an M3U playlist (fallback when TOML not found).
    #[serde(default)]
    pub m3u_url: String,
}

/// Tuning knobs for the channel pre-buffer scheduler.  These are policy
/// values, not invariants; the defaults match a couch-zapping cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrebufferConfig {
    /// How many channels to buffer on each side of the current one.
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    /// Settle delay after a switch before the pool is reconciled, so rapid
    /// surfing does not churn buffers for channels merely passed through.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Minimum gap between standby handle creations, so a reconcile does
    /// not open every upstream connection at once.
    #[serde(default = "default_spacing_ms")]
    pub spacing_ms: u64,
    /// Cap the decode/bandwidth cost of standby buffers (reduced bitrate,
    /// no video track until promoted).
    #[serde(default = "default_limit_standby_quality")]
    pub limit_standby_quality: bool,
}

impl PrebufferConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn spacing(&self) -> Duration {
        Duration::from_millis(self.spacing_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            channels_toml: default_channels_toml(),
            m3u_url: String::new(),
        }
    }
}

impl Default for PrebufferConfig {
    fn default() -> Self {
        Self {
            buffer_count: default_buffer_count(),
            debounce_ms: default_debounce_ms(),
            spacing_ms: default_spacing_ms(),
            limit_standby_quality: default_limit_standby_quality(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_volume() -> f32 {
    0.5
}

fn default_channels_toml() -> PathBuf {
    platform::config_dir().join("channels.toml")
}

fn default_buffer_count() -> usize {
    2
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_spacing_ms() -> u64 {
    100
}

fn default_limit_standby_quality() -> bool {
    true
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
        let config: Self = toml::from_str(&content)?;
        Ok(config)
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
