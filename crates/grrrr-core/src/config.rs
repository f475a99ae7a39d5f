//! Configuration system for Grrrr.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GRRRR_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/grrrr/config.toml
//!   3. ~/.config/grrrr/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::wire::{PacketKind, MAX_PAYLOAD};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GrrrrConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
    pub debug: DebugConfig,
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Name this node registers under. Empty = $USER.
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address advertised to peers and bound locally.
    pub host: String,
    /// TCP port for chat messages.
    pub stream_port: u16,
    /// UDP port for history transfer.
    pub datagram_port: u16,
}

/// Tuning for the history transfer protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// DATA payload size in bytes.
    pub chunk_size: usize,
    /// Packets allowed in flight before an ACK.
    pub window_size: u32,
    /// How long the sender waits for an ACK before counting a failed round.
    pub ack_wait_ms: u64,
    /// Consecutive rounds without progress before the sender gives up.
    pub max_send_failures: u32,
    /// How long the requester waits per attempt.
    pub request_timeout_ms: u64,
    /// REQUEST attempts before the requester gives up.
    pub request_max_retries: u32,
}

/// Fault injection. Never active unless `enabled` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    /// Chance of dropping an inbound packet. 0.0 = off.
    pub loss_probability: f64,
    /// Only drop packets of this kind. None = any kind.
    pub loss_kind: Option<PacketKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Shared JSON directory file used by every node on this host.
    pub path: PathBuf,
    /// Peers known up front.
    pub peers: Vec<StaticPeer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPeer {
    pub name: String,
    pub host: String,
    pub stream_port: u16,
    pub datagram_port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            username: std::env::var("USER").unwrap_or_default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            stream_port: 4000,
            datagram_port: 4001,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            window_size: 4,
            ack_wait_ms: 200,
            max_send_failures: 5,
            request_timeout_ms: 6000,
            request_max_retries: 3,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            loss_probability: 0.0,
            loss_kind: None,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("directory.json"),
            peers: Vec::new(),
        }
    }
}

impl TransferConfig {
    pub fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject settings the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "transfer.chunk_size must be between 1 and {MAX_PAYLOAD}"
            )));
        }
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("transfer.window_size must be > 0".into()));
        }
        if self.max_send_failures == 0 {
            return Err(ConfigError::Invalid(
                "transfer.max_send_failures must be > 0".into(),
            ));
        }
        if self.request_max_retries == 0 {
            return Err(ConfigError::Invalid(
                "transfer.request_max_retries must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl DebugConfig {
    /// Loss simulation is only live in debug mode with a non-zero chance.
    pub fn loss_active(&self) -> bool {
        self.enabled && self.loss_probability > 0.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.loss_probability) {
            return Err(ConfigError::Invalid(
                "debug.loss_probability must be in [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("grrrr")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("grrrr")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GrrrrConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            GrrrrConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GRRRR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&GrrrrConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.username.is_empty() {
            return Err(ConfigError::Invalid("identity.username is empty".into()));
        }
        self.transfer.validate()?;
        self.debug.validate()
    }

    /// Apply GRRRR_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GRRRR_IDENTITY__USERNAME") {
            self.identity.username = v;
        }
        if let Ok(v) = std::env::var("GRRRR_NETWORK__HOST") {
            self.network.host = v;
        }
        if let Ok(v) = std::env::var("GRRRR_NETWORK__STREAM_PORT") {
            if let Ok(p) = v.parse() {
                self.network.stream_port = p;
            }
        }
        if let Ok(v) = std::env::var("GRRRR_NETWORK__DATAGRAM_PORT") {
            if let Ok(p) = v.parse() {
                self.network.datagram_port = p;
            }
        }
        if let Ok(v) = std::env::var("GRRRR_TRANSFER__CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.transfer.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("GRRRR_TRANSFER__WINDOW_SIZE") {
            if let Ok(n) = v.parse() {
                self.transfer.window_size = n;
            }
        }
        if let Ok(v) = std::env::var("GRRRR_TRANSFER__ACK_WAIT_MS") {
            if let Ok(n) = v.parse() {
                self.transfer.ack_wait_ms = n;
            }
        }
        if let Ok(v) = std::env::var("GRRRR_DEBUG__ENABLED") {
            self.debug.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("GRRRR_DEBUG__LOSS_PROBABILITY") {
            if let Ok(p) = v.parse() {
                self.debug.loss_probability = p;
            }
        }
        if let Ok(v) = std::env::var("GRRRR_DIRECTORY__PATH") {
            self.directory.path = PathBuf::from(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_transfer_settings() {
        let t = TransferConfig::default();
        assert_eq!(t.chunk_size, 10);
        assert_eq!(t.window_size, 4);
        assert_eq!(t.ack_wait(), Duration::from_millis(200));
        assert_eq!(t.max_send_failures, 5);
        assert_eq!(t.request_max_retries, 3);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn loss_is_off_by_default() {
        let d = DebugConfig::default();
        assert!(!d.loss_active());

        let only_probability = DebugConfig {
            loss_probability: 0.2,
            ..DebugConfig::default()
        };
        assert!(!only_probability.loss_active());
    }

    #[test]
    fn zero_window_rejected() {
        let t = TransferConfig {
            window_size: 0,
            ..TransferConfig::default()
        };
        assert!(matches!(t.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn oversized_chunk_rejected() {
        let t = TransferConfig {
            chunk_size: MAX_PAYLOAD + 1,
            ..TransferConfig::default()
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn loss_probability_of_one_rejected() {
        let d = DebugConfig {
            enabled: true,
            loss_probability: 1.0,
            loss_kind: None,
        };
        assert!(d.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let text = r#"
            [identity]
            username = "csung4"

            [transfer]
            window_size = 8

            [debug]
            enabled = true
            loss_probability = 0.14
            loss_kind = "data"
        "#;
        let config: GrrrrConfig = toml::from_str(text).unwrap();
        assert_eq!(config.identity.username, "csung4");
        assert_eq!(config.transfer.window_size, 8);
        assert_eq!(config.transfer.chunk_size, 10);
        assert_eq!(config.debug.loss_kind, Some(PacketKind::Data));
        assert!(config.debug.loss_active());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("grrrr-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("GRRRR_CONFIG", config_path.to_str().unwrap());
        }

        let path = GrrrrConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = GrrrrConfig::load().expect("load should succeed");
        assert_eq!(config.transfer, TransferConfig::default());

        unsafe {
            std::env::remove_var("GRRRR_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
