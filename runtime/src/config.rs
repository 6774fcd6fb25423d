use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub avatar: AvatarConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_characters_path")]
    pub characters_path: String,
    #[serde(default = "default_models_path")]
    pub models_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_path: default_ws_path(),
            characters_path: default_characters_path(),
            models_path: default_models_path(),
        }
    }
}

impl ServerConfig {
    /// WebSocket endpoint derived from the HTTP base URL.
    pub fn ws_url(&self) -> Result<String> {
        let mut url = url::Url::parse(&self.base_url)?.join(&self.ws_path)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("Cannot derive websocket scheme from {}", self.base_url))?;
        Ok(url.to_string())
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_ws_path() -> String {
    "/ws/chat".to_string()
}
fn default_characters_path() -> String {
    "/characters".to_string()
}
fn default_models_path() -> String {
    "/models".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChannelConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl ChannelConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}
fn default_outbound_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_record_key")]
    pub record_key: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            record_key: default_record_key(),
        }
    }
}

fn default_sample_rate() -> u32 {
    16000
}
fn default_channels() -> u16 {
    1
}
fn default_record_key() -> String {
    "Space".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AnalysisConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_volume_divisor")]
    pub volume_divisor: f32,
    #[serde(default = "default_silence_gate")]
    pub silence_gate: f32,
    #[serde(default = "default_flutter_period_ms")]
    pub flutter_period_ms: f64,
    #[serde(default = "default_flutter_weight")]
    pub flutter_weight: f32,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            volume_divisor: default_volume_divisor(),
            silence_gate: default_silence_gate(),
            flutter_period_ms: default_flutter_period_ms(),
            flutter_weight: default_flutter_weight(),
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_fft_size() -> usize {
    256
}
fn default_volume_divisor() -> f32 {
    50.0
}
fn default_silence_gate() -> f32 {
    0.1
}
fn default_flutter_period_ms() -> f64 {
    90.0
}
fn default_flutter_weight() -> f32 {
    0.4
}
fn default_tick_ms() -> u64 {
    16
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AvatarConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_fit_ratio")]
    pub fit_ratio: f32,
    #[serde(default = "default_vertical_offset")]
    pub vertical_offset: f32,
    #[serde(default = "default_zoom_sensitivity")]
    pub zoom_sensitivity: f32,
    #[serde(default = "default_min_scale")]
    pub min_scale: f32,
    #[serde(default = "default_max_scale")]
    pub max_scale: f32,
    #[serde(default = "default_container_width")]
    pub container_width: f32,
    #[serde(default = "default_container_height")]
    pub container_height: f32,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            fit_ratio: default_fit_ratio(),
            vertical_offset: default_vertical_offset(),
            zoom_sensitivity: default_zoom_sensitivity(),
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
            container_width: default_container_width(),
            container_height: default_container_height(),
        }
    }
}

fn default_model() -> String {
    "/static/models/default/default.model3.json".to_string()
}
fn default_fit_ratio() -> f32 {
    1.2
}
fn default_vertical_offset() -> f32 {
    100.0
}
fn default_zoom_sensitivity() -> f32 {
    0.001
}
fn default_min_scale() -> f32 {
    0.1
}
fn default_max_scale() -> f32 {
    10.0
}
fn default_container_width() -> f32 {
    800.0
}
fn default_container_height() -> f32 {
    600.0
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ControlConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

impl Config {
    /// Replaces values the runtime cannot work with by their defaults.
    pub fn sanitize(&mut self) {
        let analysis = &mut self.analysis;
        positive_or(
            &mut analysis.volume_divisor,
            "analysis.volume_divisor",
            default_volume_divisor(),
        );
        positive_or(
            &mut analysis.flutter_period_ms,
            "analysis.flutter_period_ms",
            default_flutter_period_ms(),
        );
        finite_or(&mut analysis.silence_gate, "analysis.silence_gate", default_silence_gate());
        finite_or(
            &mut analysis.flutter_weight,
            "analysis.flutter_weight",
            default_flutter_weight(),
        );

        let avatar = &mut self.avatar;
        positive_or(&mut avatar.fit_ratio, "avatar.fit_ratio", default_fit_ratio());
        finite_or(&mut avatar.vertical_offset, "avatar.vertical_offset", default_vertical_offset());
        finite_or(
            &mut avatar.zoom_sensitivity,
            "avatar.zoom_sensitivity",
            default_zoom_sensitivity(),
        );
        positive_or(&mut avatar.min_scale, "avatar.min_scale", default_min_scale());
        positive_or(&mut avatar.max_scale, "avatar.max_scale", default_max_scale());
        if avatar.min_scale > avatar.max_scale {
            tracing::warn!(
                "avatar.min_scale {} exceeds avatar.max_scale {}, using defaults",
                avatar.min_scale,
                avatar.max_scale
            );
            avatar.min_scale = default_min_scale();
            avatar.max_scale = default_max_scale();
        }
        positive_or(
            &mut avatar.container_width,
            "avatar.container_width",
            default_container_width(),
        );
        positive_or(
            &mut avatar.container_height,
            "avatar.container_height",
            default_container_height(),
        );
    }
}

trait ConfigFloat: Copy + PartialOrd + std::fmt::Display {
    const ZERO: Self;
    fn is_finite(self) -> bool;
}

impl ConfigFloat for f32 {
    const ZERO: Self = 0.0;
    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }
}

impl ConfigFloat for f64 {
    const ZERO: Self = 0.0;
    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }
}

fn finite_or<T: ConfigFloat>(value: &mut T, name: &str, default: T) {
    if !value.is_finite() {
        tracing::warn!("{} must be finite, got {}, using {}", name, value, default);
        *value = default;
    }
}

fn positive_or<T: ConfigFloat>(value: &mut T, name: &str, default: T) {
    if !value.is_finite() || *value <= T::ZERO {
        tracing::warn!("{} must be positive, got {}, using {}", name, value, default);
        *value = default;
    }
}

/// Uses the XDG runtime directory if available, falls back to /tmp.
pub fn default_socket_path() -> PathBuf {
    if let Some(runtime_dir) = dirs::runtime_dir() {
        runtime_dir.join("avatard.sock")
    } else {
        PathBuf::from("/tmp/avatard.sock")
    }
}

pub fn load_config() -> Result<Config> {
    let Some(config_path) = get_config_path() else {
        tracing::info!("No config directory on this platform, using defaults");
        return Ok(Config::default());
    };

    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    tracing::info!("Loading config from {:?}", config_path);
    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    let mut config: Config = toml::from_str(&config_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
    config.sanitize();

    tracing::info!("Config loaded successfully");
    Ok(config)
}

fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("avatar-runtime").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.server.ws_path, "/ws/chat");
        assert_eq!(config.server.characters_path, "/characters");
        assert_eq!(config.server.models_path, "/models");

        assert_eq!(config.channel.reconnect_delay_ms, 3000);
        assert_eq!(config.channel.reconnect_delay(), Duration::from_secs(3));

        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.record_key, "Space");

        assert_eq!(config.analysis.fft_size, 256);
        assert_eq!(config.analysis.silence_gate, 0.1);
        assert_eq!(config.analysis.flutter_period_ms, 90.0);
        assert_eq!(config.analysis.flutter_weight, 0.4);

        assert_eq!(config.avatar.fit_ratio, 1.2);
        assert_eq!(config.avatar.min_scale, 0.1);
        assert_eq!(config.avatar.max_scale, 10.0);
    }

    #[test]
    fn test_ws_url_from_http_base() {
        let server = ServerConfig::default();
        assert_eq!(server.ws_url().unwrap(), "ws://127.0.0.1:8000/ws/chat");
    }

    #[test]
    fn test_ws_url_from_https_base() {
        let server = ServerConfig {
            base_url: "https://idol.example.com".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(server.ws_url().unwrap(), "wss://idol.example.com/ws/chat");
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[analysis]"));
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_with_missing_fields_uses_defaults() {
        let toml_str = r#"
            [server]
            base_url = "http://10.0.0.2:9000"

            [channel]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.server.base_url, "http://10.0.0.2:9000");
        assert_eq!(config.server.ws_path, "/ws/chat");
        assert_eq!(config.channel.reconnect_delay_ms, 3000);
        assert_eq!(config.avatar.default_model, default_model());
    }

    #[test]
    fn test_config_with_custom_avatar() {
        let toml_str = r#"
            [avatar]
            default_model = "/static/models/robin/robin.model3.json"
            zoom_sensitivity = 0.01
            container_width = 1920
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.avatar.default_model,
            "/static/models/robin/robin.model3.json"
        );
        assert_eq!(config.avatar.zoom_sensitivity, 0.01);
        assert_eq!(config.avatar.container_width, 1920.0);
        assert_eq!(config.avatar.container_height, 600.0);
    }

    #[test]
    fn test_sanitize_keeps_valid_values() {
        let mut config = Config::default();
        config.avatar.min_scale = 0.5;
        config.avatar.max_scale = 2.0;
        config.analysis.volume_divisor = 25.0;
        let expected = config.clone();
        config.sanitize();
        assert_eq!(config, expected);
    }

    #[test]
    fn test_sanitize_replaces_inverted_scale_bounds() {
        let toml_str = r#"
            [avatar]
            min_scale = 5.0
            max_scale = 1.0
        "#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        config.sanitize();
        assert_eq!(config.avatar.min_scale, 0.1);
        assert_eq!(config.avatar.max_scale, 10.0);
    }

    #[test]
    fn test_sanitize_replaces_zero_divisors() {
        let toml_str = r#"
            [analysis]
            volume_divisor = 0.0
            flutter_period_ms = 0.0
            flutter_weight = nan
        "#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        config.sanitize();
        assert_eq!(config.analysis.volume_divisor, 50.0);
        assert_eq!(config.analysis.flutter_period_ms, 90.0);
        assert_eq!(config.analysis.flutter_weight, 0.4);
    }

    #[test]
    fn test_config_with_invalid_types() {
        let toml_str = r#"
            [channel]
            reconnect_delay_ms = "soon"
        "#;
        let result: Result<Config, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }
}
