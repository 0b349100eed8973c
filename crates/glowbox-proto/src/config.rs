use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Fixed output sample rate.  The decode pipeline resamples everything
    /// to this rate, so block-size arithmetic never has to renegotiate.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Preferred frames per output block.
    #[serde(default = "default_block_frames")]
    pub block_frames: u32,
    /// Output device name.  `None` picks the system default.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Number of indicator lights in the bar graph.
    #[serde(default = "default_led_count")]
    pub led_count: usize,
    /// IIR smoothing factor in [0,1); higher = slower response.
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    /// Linear gain applied to the RMS before clamping.
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Period of the idle chase animation.
    #[serde(default = "default_idle_period_ms")]
    pub idle_period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory scanned for locally playable files.
    #[serde(default = "default_library_dir")]
    pub dir: PathBuf,
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

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_frames: default_block_frames(),
            device: None,
            default_volume: default_volume(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            led_count: default_led_count(),
            smoothing: default_smoothing(),
            gain: default_gain(),
            idle_period_ms: default_idle_period_ms(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            dir: default_library_dir(),
        }
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

fn default_sample_rate() -> u32 {
    48_000
}

fn default_block_frames() -> u32 {
    1024
}

fn default_volume() -> f32 {
    1.0
}

fn default_led_count() -> usize {
    8
}

fn default_smoothing() -> f32 {
    0.8
}

fn default_gain() -> f32 {
    1.0
}

fn default_idle_period_ms() -> u64 {
    100
}

fn default_library_dir() -> PathBuf {
    dirs::audio_dir().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Music")
    })
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
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

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            display: DisplayConfig::default(),
            library: LibraryConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.block_frames, 1024);
        assert!(config.audio.device.is_none());
        assert_eq!(config.display.led_count, 8);
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [audio]
            sample_rate = 44100

            [display]
            led_count = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.audio.sample_rate, 44_100);
        // Unspecified fields fall back to their defaults.
        assert_eq!(config.audio.block_frames, 1024);
        assert_eq!(config.display.led_count, 10);
        assert!((config.display.smoothing - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.http.port, 8080);
    }
}
