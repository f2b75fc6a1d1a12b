//! Configuration management for camrelay
//!
//! Loads signaling, session and camera settings from a TOML file. Every field
//! has a default so a missing file, or a file that only overrides a few keys,
//! is fine. The signaling host itself always comes from the command line.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "CAMRELAY_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub signaling: SignalingConfig,
    pub session: SessionConfig,
    pub camera: CameraConfig,
}

/// Signaling server connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Signaling server port
    pub port: u16,
    /// Use https/wss instead of http/ws
    pub secure: bool,
    /// Socket.IO namespace
    pub namespace: String,
    /// Handshake deadline in milliseconds
    pub connect_timeout_ms: u64,
    /// Reconnection attempts after an unexpected drop
    pub reconnection_attempts: u32,
    /// First reconnection delay in milliseconds
    pub reconnection_delay_ms: u64,
    /// Upper bound on the reconnection delay in milliseconds
    pub reconnection_delay_max_ms: u64,
    /// Jitter applied to each delay, as a fraction of it (0.0-1.0)
    pub randomization_factor: f64,
}

/// Peer session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Signaling room joined at start-up
    pub room: String,
    /// STUN/TURN urls handed to the WebRTC engine
    pub ice_servers: Vec<String>,
    /// Label of the control data channel
    pub control_label: String,
    /// How long an offer waits for ICE gathering, in milliseconds
    pub gather_timeout_ms: u64,
    /// Idle loop period in milliseconds
    pub idle_tick_ms: u64,
}

/// Camera settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Stream a generated test pattern instead of opening a device
    pub synthetic: bool,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            secure: false,
            namespace: "/".to_string(),
            connect_timeout_ms: 3000,
            reconnection_attempts: 5,
            reconnection_delay_ms: 100,
            reconnection_delay_max_ms: 1000,
            randomization_factor: 0.5,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room: "jetson-room".to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            control_label: "control".to_string(),
            gather_timeout_ms: 5000,
            idle_tick_ms: 1000,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
            synthetic: false,
        }
    }
}

impl SignalingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl SessionConfig {
    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }
}

impl CameraConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

impl RelayConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&contents)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Config path from `CAMRELAY_CONFIG`, else `camrelay.toml`
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("camrelay.toml"))
    }

    /// Load from default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.camera.width == 0 || self.camera.height == 0 {
            return invalid("camera resolution must be non-zero");
        }
        // I420 subsamples chroma 2x2
        if self.camera.width % 2 != 0 || self.camera.height % 2 != 0 {
            return invalid("camera resolution must be even in both dimensions");
        }
        if self.camera.fps == 0 || self.camera.fps > 120 {
            return invalid("camera fps must be between 1 and 120");
        }

        if self.session.room.is_empty() {
            return invalid("room must not be empty");
        }
        if self.session.control_label.is_empty() {
            return invalid("control channel label must not be empty");
        }
        if self.session.idle_tick_ms == 0 {
            return invalid("idle tick must be non-zero");
        }

        if !self.signaling.namespace.starts_with('/') {
            return invalid("namespace must start with '/'");
        }
        if self.signaling.reconnection_attempts == 0 {
            return invalid("reconnection attempts must be at least 1");
        }
        if self.signaling.reconnection_delay_ms > self.signaling.reconnection_delay_max_ms {
            return invalid("reconnection delay exceeds its maximum");
        }
        if !(0.0..=1.0).contains(&self.signaling.randomization_factor) {
            return invalid("randomization factor must be between 0.0 and 1.0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.signaling.port, 5000);
        assert_eq!(config.signaling.reconnection_attempts, 5);
        assert_eq!(config.signaling.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.session.room, "jetson-room");
        assert_eq!(config.session.control_label, "control");
        assert_eq!((config.camera.width, config.camera.height), (640, 480));
    }

    #[test]
    fn test_config_validation() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.camera.width = 641;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.signaling.randomization_factor = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.signaling.reconnection_delay_ms = 2000;
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.session.room.clear();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("camrelay.toml");

        let mut config = RelayConfig::default();
        config.session.room = "lab".to_string();
        config.camera.synthetic = true;
        config.save_to_file(&config_path).unwrap();

        let loaded = RelayConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("camrelay.toml");
        fs::write(&config_path, "[camera]\nfps = 15\n").unwrap();

        let loaded = RelayConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.camera.fps, 15);
        assert_eq!(loaded.camera.width, 640);
        assert_eq!(loaded.signaling.port, 5000);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = RelayConfig::load_from_file("nonexistent_file.toml");
        assert_eq!(result.unwrap(), RelayConfig::default());
    }

    #[test]
    fn test_frame_interval() {
        let camera = CameraConfig::default();
        assert_eq!(camera.frame_interval(), Duration::from_nanos(33_333_333));
    }
}
