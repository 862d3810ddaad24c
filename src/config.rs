//! # Configuration Management
//!
//! Centralized configuration for the server's network stack.
//!
//! This module provides structured configuration for the listener, the wire
//! transport, the session-verification service, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - Default compression threshold (256 bytes) balances bandwidth and CPU
//! - The frame length cap bounds per-connection memory against hostile peers
//! - Online mode defaults to on; disabling it trusts client-declared names

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Numeric protocol version advertised in the status payload.
pub const PROTOCOL_VERSION: i32 = 760;

/// Game version string advertised in the status payload.
pub const GAME_VERSION: &str = "1.19.2";

/// Max allowed frame length (2 MB), pre-allocation guard against hostile
/// declared lengths.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Default minimum body size before compression applies.
pub const DEFAULT_COMPRESSION_THRESHOLD: i32 = 256;

/// Default single-byte legacy status probe.
pub const DEFAULT_LEGACY_PROBE: u8 = 0xFE;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Listener and player-facing settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Wire transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Session-verification service settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::Config(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(addr) = std::env::var("MANTLE_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(max) = std::env::var("MANTLE_MAX_PLAYERS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_players = val;
            }
        }

        if let Ok(online) = std::env::var("MANTLE_ONLINE_MODE") {
            if let Ok(val) = online.parse::<bool>() {
                config.server.online_mode = val;
            }
        }

        if let Ok(threshold) = std::env::var("MANTLE_COMPRESSION_THRESHOLD") {
            if let Ok(val) = threshold.parse::<i32>() {
                config.transport.compression_threshold = val;
            }
        }

        if let Ok(endpoint) = std::env::var("MANTLE_SESSION_ENDPOINT") {
            config.session.endpoint = endpoint;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.session.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener and player-facing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:25565")
    pub address: String,

    /// Maximum number of simultaneously authenticated players
    pub max_players: usize,

    /// Whether to verify identities against the session service.
    /// Offline mode trusts the client-declared username.
    pub online_mode: bool,

    /// Message of the day, shown in the status response
    pub motd: String,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:25565"),
            max_players: 20,
            online_mode: true,
            motd: String::from("A Mantle server"),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Validate listener configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:25565')",
                self.address
            ));
        }

        if self.max_players == 0 {
            errors.push("Max players must be greater than 0".to_string());
        } else if self.max_players > 100_000 {
            errors.push(format!(
                "Max players very high: {} (ensure system resources can support this)",
                self.max_players
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Wire transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Minimum body size (bytes) at which frames are compressed.
    /// Negative disables the compression sub-layer entirely.
    pub compression_threshold: i32,

    /// Compression level used when the threshold is met (0-9)
    pub compression_level: u32,

    /// Maximum allowed frame length in bytes
    pub max_frame_len: usize,

    /// Single byte recognized as the legacy status probe on a fresh
    /// connection, before any framed traffic
    pub legacy_probe: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_level: 6,
            max_frame_len: MAX_FRAME_LEN,
            legacy_probe: DEFAULT_LEGACY_PROBE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_len == 0 {
            errors.push("Max frame length cannot be 0".to_string());
        } else if self.max_frame_len < 1024 {
            errors.push("Max frame length too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_len > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max frame length too large: {} bytes (maximum recommended: 100 MB)",
                self.max_frame_len
            ));
        }

        if self.compression_level > 9 {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 0-9)",
                self.compression_level
            ));
        }

        if self.compression_threshold >= 0
            && self.compression_threshold as usize > self.max_frame_len
        {
            errors.push("Compression threshold cannot be larger than max frame length".to_string());
        }

        errors
    }
}

/// Session-verification service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Base URL of the session service
    pub endpoint: String,

    /// Optional bound on the verification request. The observed upstream
    /// behavior has no timeout; leaving this unset preserves that.
    pub request_timeout_ms: Option<u64>,

    /// Whether to forward the client address with the verification request
    pub forward_client_ip: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://sessionserver.mojang.com"),
            request_timeout_ms: None,
            forward_client_ip: false,
        }
    }
}

impl SessionConfig {
    /// Validate session service configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.endpoint.is_empty() {
            errors.push("Session endpoint cannot be empty".to_string());
        } else if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            errors.push(format!(
                "Invalid session endpoint: '{}' (expected an http(s) URL)",
                self.endpoint
            ));
        }

        if let Some(ms) = self.request_timeout_ms {
            if ms < 100 {
                errors.push("Session request timeout too short (minimum: 100ms)".to_string());
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to include event targets in output
    pub log_targets: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            log_targets: false,
            json_format: false,
        }
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_clean() {
        assert!(NetworkConfig::default().validate().is_empty());
    }

    #[test]
    fn test_toml_roundtrip() {
        let toml = r#"
            [server]
            address = "127.0.0.1:25570"
            max_players = 64
            online_mode = false
            motd = "test"
            shutdown_timeout = 5000

            [transport]
            compression_threshold = -1
            compression_level = 4
            max_frame_len = 1048576
            legacy_probe = 254
        "#;
        let config = NetworkConfig::from_toml(toml).unwrap();
        assert_eq!(config.server.max_players, 64);
        assert!(!config.server.online_mode);
        assert_eq!(config.transport.compression_threshold, -1);
        assert_eq!(config.transport.legacy_probe, 0xFE);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_bad_address_flagged() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.server.address = "not-an-address".to_string();
        });
        assert!(!config.validate().is_empty());
        assert!(config.validate_strict().is_err());
    }

    #[test]
    fn test_threshold_above_frame_cap_flagged() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.transport.max_frame_len = 2048;
            c.transport.compression_threshold = 4096;
        });
        assert!(!config.validate().is_empty());
    }
}
