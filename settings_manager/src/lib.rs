//! Configuration management for rtpcall
//!
//! This crate handles loading, saving and accessing
//! call configuration. Values come from a TOML file and can be
//! overridden with `RTPCALL__`-prefixed environment variables.

use call_core::{Error, SpeakerphoneMode};
use config::{Config, Environment, File, FileFormat};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "RTPCALL";

/// A STUN or TURN server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// What the session carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub audio: bool,
    pub video: bool,
    pub data_channel: bool,
    pub stats_enabled: bool,
    /// Stats sampling period in milliseconds
    pub stats_period_ms: u64,
    pub data_channel_label: String,
    pub ordered_data_channel: bool,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
            data_channel: false,
            stats_enabled: true,
            stats_period_ms: 1000,
            data_channel_label: "message data".to_string(),
            ordered_data_channel: true,
        }
    }
}

/// Audio routing preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub speakerphone: SpeakerphoneMode,
    pub sco_timeout_ms: u64,
    pub max_sco_attempts: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            speakerphone: SpeakerphoneMode::default(),
            sco_timeout_ms: 4000,
            max_sco_attempts: 2,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// STUN/TURN servers handed to the media engine
    pub ice_servers: Vec<IceServer>,
    pub media: MediaSettings,
    pub audio: AudioSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:stun.linphone.org:3478"),
                IceServer::stun("stun:stun.l.google.com:19302"),
            ],
            media: MediaSettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

/// Configuration manager
pub struct ConfigManager {
    settings: Settings,
    config_file: PathBuf,
}

impl ConfigManager {
    /// Create a config manager backed by the user's config directory
    pub fn new() -> Result<Self, Error> {
        let mut config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Failed to determine config directory".to_string()))?;
        config_dir.push("rtpcall");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        Self::with_file(config_dir.join("config.toml"))
    }

    /// Create a new ConfigManager with a custom file path
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_file = path.as_ref().to_path_buf();
        if !config_file.exists() {
            debug!("Config file {:?} not found, using defaults", config_file);
        }
        let settings = Self::load_layered(&config_file, ENV_PREFIX)?;
        info!("Loaded settings from {:?}", config_file);

        Ok(Self {
            settings,
            config_file,
        })
    }

    /// Defaults, then the TOML file if present, then environment overrides
    fn load_layered(path: &Path, env_prefix: &str) -> Result<Settings, Error> {
        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save settings to the config file
    pub fn save(&self) -> Result<(), Error> {
        let toml = toml::to_string_pretty(&self.settings)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.config_file.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        fs::write(&self.config_file, toml)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        debug!("Saved config to {:?}", self.config_file);
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }
}
