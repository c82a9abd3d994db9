//! Application configuration
//!
//! Loaded from TOML. Missing sections and fields fall back to defaults.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::{AudioFormat, Framing};

/// Name of the config file inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub ui: UiConfig,
}

/// Listener and wire settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bind to this address only instead of scanning local interfaces
    pub bind_address: Option<Ipv4Addr>,
    /// Listening port, 0 lets the OS choose
    pub port: u16,
    /// Message delimiting on the socket
    pub framing: Framing,
    /// Disable Nagle on the peer socket
    pub low_delay: bool,
    /// Capacity of the capture → socket queue, in chunks
    pub capture_queue: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            port: 0,
            framing: Framing::default(),
            low_delay: true,
            capture_queue: DEFAULT_CAPTURE_QUEUE,
        }
    }
}

/// Device and format preselection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device id for the sender, output device id for the receiver.
    /// Empty selects the host default.
    pub device_id: String,
    pub format: AudioFormat,
    /// Receiver playback buffer
    pub playback_buffer_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            format: AudioFormat::default(),
            playback_buffer_ms: DEFAULT_PLAYBACK_BUFFER_MS,
        }
    }
}

/// Control API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl AppConfig {
    /// Platform config file location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sound-link")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                return Err(Error::Config(format!("{} does not exist", path.display())));
            }
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&content)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.audio
            .format
            .validate()
            .map_err(|e| Error::Config(format!("audio.format: {}", e)))?;
        if self.network.capture_queue == 0 {
            return Err(Error::Config("network.capture_queue must be positive".into()));
        }
        if self.audio.playback_buffer_ms == 0 {
            return Err(Error::Config("audio.playback_buffer_ms must be positive".into()));
        }
        Ok(())
    }
}
