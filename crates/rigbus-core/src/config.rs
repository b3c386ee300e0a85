//! Transport configuration.
//!
//! Runtime switches come from the whitespace-separated `RIGBUS_OPTIONS`
//! environment variable; everything else can be kept in a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::protocol::constants::{
    FLUSH_READ_TIMEOUT, OPTIONS_ENV, SHORT_TRANSFER_PAUSE, SHORT_TRANSFER_RETRIES,
};
use crate::transaction::TransactionSettings;
use crate::usb::UsbDeviceSpec;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown transport option '{0}'")]
    UnknownOption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Process-wide transport switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Clear halt on both endpoints when claiming an interface.
    pub use_clear_halt: bool,
    /// Skip the cross-process lock around device enumeration.
    pub no_lock: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            use_clear_halt: true,
            no_lock: false,
        }
    }
}

impl TransportOptions {
    /// Apply a single option token.
    pub fn apply(&mut self, token: &str) -> Result<(), ConfigError> {
        match token {
            "use-clear-halt" => self.use_clear_halt = true,
            "no-use-clear-halt" => self.use_clear_halt = false,
            "no-lock" => self.no_lock = true,
            other => return Err(ConfigError::UnknownOption(other.to_string())),
        }
        Ok(())
    }

    /// Parse a whitespace-separated option list, rejecting unknown tokens.
    pub fn parse(options: &str) -> Result<Self, ConfigError> {
        let mut parsed = Self::default();
        for token in options.split_whitespace() {
            parsed.apply(token)?;
        }
        Ok(parsed)
    }

    /// Parse an option list, warning about and skipping unknown tokens.
    pub fn parse_lossy(options: &str) -> Self {
        let mut parsed = Self::default();
        for token in options.split_whitespace() {
            if let Err(e) = parsed.apply(token) {
                warn!(env = OPTIONS_ENV, "{}", e);
            }
        }
        parsed
    }

    /// Options from the `RIGBUS_OPTIONS` environment variable.
    pub fn from_env() -> Self {
        match std::env::var(OPTIONS_ENV) {
            Ok(value) => Self::parse_lossy(&value),
            Err(_) => Self::default(),
        }
    }
}

/// Retry policy for zero-length bulk transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferTuning {
    /// Retries after a zero-length transfer before giving up.
    pub short_retries: u32,
    /// Pause between retries, in microseconds.
    pub short_pause_us: u64,
    /// Read timeout of the post-claim input drain, in milliseconds.
    pub flush_timeout_ms: u64,
}

impl Default for TransferTuning {
    fn default() -> Self {
        Self {
            short_retries: SHORT_TRANSFER_RETRIES,
            short_pause_us: SHORT_TRANSFER_PAUSE.as_micros() as u64,
            flush_timeout_ms: FLUSH_READ_TIMEOUT.as_millis() as u64,
        }
    }
}

impl TransferTuning {
    pub fn short_pause(&self) -> Duration {
        Duration::from_micros(self.short_pause_us)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// Complete link configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub options: TransportOptions,
    pub transaction: TransactionSettings,
    pub transfer: TransferTuning,
    /// Supported USB device variants, searched in order.
    pub devices: Vec<UsbDeviceSpec>,
}

impl LinkConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_defaults() {
        let options = TransportOptions::parse("").unwrap();
        assert!(options.use_clear_halt);
        assert!(!options.no_lock);
    }

    #[test]
    fn test_option_tokens() {
        let options = TransportOptions::parse("no-use-clear-halt\tno-lock").unwrap();
        assert!(!options.use_clear_halt);
        assert!(options.no_lock);

        let options = TransportOptions::parse("no-use-clear-halt use-clear-halt").unwrap();
        assert!(options.use_clear_halt);
    }

    #[test]
    fn test_unknown_option() {
        let err = TransportOptions::parse("no-lock bogus").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption(ref t) if t == "bogus"));

        let lossy = TransportOptions::parse_lossy("bogus no-lock");
        assert!(lossy.no_lock);
        assert!(lossy.use_clear_halt);
    }

    #[test]
    fn test_tuning_defaults() {
        let tuning = TransferTuning::default();
        assert_eq!(tuning.short_retries, 10);
        assert_eq!(tuning.short_pause(), Duration::from_micros(100));
        assert_eq!(tuning.flush_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn test_config_from_toml() {
        let config = LinkConfig::from_toml_str(
            r#"
            [options]
            no_lock = true

            [transaction]
            timeout_ms = 1000

            [[devices]]
            name = "Astribank"
            vendor_id = 0xE4E4
            product_id = 0x1162
            interface = 0
            num_endpoints = 2
            ep_out = 0x04
            ep_in = 0x88
            "#,
        )
        .unwrap();

        assert!(config.options.no_lock);
        assert!(config.options.use_clear_halt);
        assert_eq!(config.transaction.timeout_ms, 1000);
        assert_eq!(config.transaction.max_retries, 3);
        assert_eq!(config.transfer, TransferTuning::default());
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].num_interfaces, 0);
        assert_eq!(config.devices[0].ep_in, 0x88);
    }

    #[test]
    fn test_config_file_round_trip() {
        let path = std::env::temp_dir().join(format!("rigbus-config-{}.toml", std::process::id()));
        let mut config = LinkConfig::default();
        config.devices.push(UsbDeviceSpec::new("test", 1, 2, 1, 0, 2, 0x02, 0x81));

        config.save_to_file(&path).unwrap();
        let loaded = LinkConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, config);
    }
}
