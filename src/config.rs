//! Laufzeit-Konfiguration
//!
//! Wird aus `config.json` im App-Konfigurationsverzeichnis gelesen und
//! danach mit Umgebungsvariablen überschrieben.
//!
//! ## Verwendung
//! ```no_run
//! let config = duocall::CallConfig::load()?;
//! let ice = config.ice_config();
//! # Ok::<(), duocall::ConfigError>(())
//! ```

use crate::call_engine::{IceTransportConfig, RelayDescriptor, DEFAULT_STUN_URL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Lokaler Relay-Server für die Entwicklung
pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:3000/ws";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid signaling URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("TURN server {0} needs either a secret or username and credential")]
    IncompleteTurn(String),
}

// ============================================================================
// CONFIG STRUCTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnConfig {
    pub url: String,
    /// Shared Secret für zeitlich begrenzte Credentials
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_signaling_url() -> String {
    DEFAULT_SIGNALING_URL.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_stun_urls() -> Vec<String> {
    vec![DEFAULT_STUN_URL.to_string()]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallConfig {
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_stun_urls")]
    pub stun_urls: Vec<String>,
    #[serde(default)]
    pub turn: Option<TurnConfig>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            room: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            stun_urls: default_stun_urls(),
            turn: None,
        }
    }
}

impl CallConfig {
    /// Lädt `config.json` (falls vorhanden) und wendet Umgebungsvariablen an
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::get_config_path()?;

        let mut config = if path.exists() {
            tracing::info!("Loading config from {:?}", path);
            Self::from_file(&path)?
        } else {
            tracing::debug!("No config file at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Überschreibt Felder aus der Umgebung
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SIGNALING_URL") {
            self.signaling_url = url;
        }
        if let Some(room) = lookup("SIGNALING_ROOM") {
            self.room = Some(room);
        }

        if let Some(url) = lookup("TURN_URL") {
            let turn = self.turn.get_or_insert_with(|| TurnConfig {
                url: url.clone(),
                secret: None,
                ttl_secs: default_ttl_secs(),
                username: None,
                credential: None,
            });
            turn.url = url;
        }
        if let Some(turn) = self.turn.as_mut() {
            if let Some(secret) = lookup("TURN_SECRET") {
                turn.secret = Some(secret);
            }
            if let Some(username) = lookup("TURN_USERNAME") {
                turn.username = Some(username);
            }
            if let Some(credential) = lookup("TURN_CREDENTIAL") {
                turn.credential = Some(credential);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.signaling_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.signaling_url.clone(),
            reason: e.to_string(),
        })?;

        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                url: self.signaling_url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        if let Some(turn) = &self.turn {
            let has_static = turn.username.is_some() && turn.credential.is_some();
            if turn.secret.is_none() && !has_static {
                return Err(ConfigError::IncompleteTurn(turn.url.clone()));
            }
        }

        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// STUN-Server plus optional TURN; ein Shared Secret hat Vorrang
    pub fn ice_config(&self) -> IceTransportConfig {
        let mut ice = self
            .stun_urls
            .iter()
            .fold(IceTransportConfig::empty(), |ice, url| {
                ice.with_static(RelayDescriptor::stun(url.clone()))
            });

        if let Some(turn) = &self.turn {
            match (&turn.secret, &turn.username, &turn.credential) {
                (Some(secret), _, _) => {
                    ice = ice.with_time_limited_turn(
                        turn.url.clone(),
                        secret.clone(),
                        Duration::from_secs(turn.ttl_secs),
                    );
                }
                (None, Some(username), Some(credential)) => {
                    ice = ice.with_static(RelayDescriptor::turn(
                        turn.url.clone(),
                        username.clone(),
                        credential.clone(),
                    ));
                }
                _ => tracing::warn!("Ignoring TURN server {} without credentials", turn.url),
            }
        }

        ice
    }

    /// Gibt den Pfad zur Konfigurationsdatei zurück
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let proj_dirs = directories::ProjectDirs::from("com", "duocall", "duocall").ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine app config directory",
            )
        })?;

        let mut path = proj_dirs.config_dir().to_path_buf();
        path.push("config.json");
        Ok(path)
    }
}
