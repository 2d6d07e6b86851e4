//! # Config Module
//!
//! Plugin configuration, persisted as RON. Values from the file are checked
//! when the plugin is built so an invalid setup fails before any port is
//! opened.

use std::path::Path;

use regex::Regex;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::error::{Result, SerialLinesError};
use crate::serial::encoding::TextEncoding;
use crate::serial::port::{
    COMMON_BAUD_RATES, DEFAULT_BAUD_RATE, DEFAULT_FALLBACK_PORT, DEFAULT_PORT_PATTERN,
    PortSettings,
};
use crate::tokenizer::{DEFAULT_VALUE_SEPARATOR, TokenizerSettings};

/// Configuration file path.
pub const CONFIG_FILE: &str = "config/serial_lines.ron";

/// Serial lines configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialLinesConfig {
    /// Port to open; discovered from `port_pattern` when unset.
    pub port_name: Option<String>,
    /// Regex a discovered port name must match.
    pub port_pattern: String,
    /// Port used when discovery finds nothing.
    pub fallback_port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Assert DTR after opening.
    pub dtr: bool,
    /// Drop stale input buffered by the OS before opening.
    pub discard_input: bool,
    pub encoding: TextEncoding,
    /// Publish every received chunk as it arrives.
    pub notify_data: bool,
    /// Publish every completed line.
    pub notify_lines: bool,
    /// Publish the values of every completed line.
    pub notify_values: bool,
    /// Maximum number of lines to remember for draining, `0` disables.
    pub remember_lines: i64,
    pub value_separator: char,
}

impl Default for SerialLinesConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            port_pattern: DEFAULT_PORT_PATTERN.to_string(),
            fallback_port: DEFAULT_FALLBACK_PORT.map(str::to_owned),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 10,
            dtr: false,
            discard_input: true,
            encoding: TextEncoding::Utf8,
            notify_data: false,
            notify_lines: true,
            notify_values: false,
            remember_lines: 0,
            value_separator: DEFAULT_VALUE_SEPARATOR,
        }
    }
}

impl SerialLinesConfig {
    /// Loads the configuration, failing on a missing or malformed file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        ron::from_str(&data).map_err(|e| {
            SerialLinesError::invalid_config(format!("{}: {e}", path.as_ref().display()))
        })
    }

    /// Loads the configuration, using defaults when the file is missing or
    /// cannot be parsed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("[serial_lines] No config file at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                log::info!("[serial_lines] Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("[serial_lines] Failed to load config: {e}, using defaults");
                Self::default()
            }
        }
    }

    /// Saves the configuration as pretty RON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = ron::ser::to_string_pretty(self, PrettyConfig::default())
            .map_err(|e| SerialLinesError::invalid_config(e.to_string()))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Line detection is needed by at least one consumer.
    pub fn detect_lines(&self) -> bool {
        self.notify_lines || self.notify_values || self.remember_lines > 0
    }

    /// Validated tokenizer settings.
    pub fn tokenizer_settings(&self) -> Result<TokenizerSettings> {
        let max_remembered = usize::try_from(self.remember_lines).map_err(|_| {
            SerialLinesError::invalid_config(format!(
                "remember_lines must not be negative, got {}",
                self.remember_lines
            ))
        })?;
        let mut settings = TokenizerSettings::new().max_remembered(max_remembered);
        settings.value_separator = self.value_separator;
        settings.split_values = self.notify_values;
        settings.validate()?;
        Ok(settings)
    }

    /// Compiled port discovery pattern.
    pub fn port_pattern(&self) -> Result<Regex> {
        Regex::new(&self.port_pattern).map_err(|e| {
            SerialLinesError::invalid_config(format!("port_pattern {:?}: {e}", self.port_pattern))
        })
    }

    /// Port settings for the given port.
    pub fn port_settings(&self, port_name: &str) -> Result<PortSettings> {
        if self.baud_rate == 0 {
            return Err(SerialLinesError::invalid_config("baud_rate must be positive"));
        }
        if !COMMON_BAUD_RATES.contains(&self.baud_rate) {
            log::warn!("[serial_lines] Non-standard baud rate {}", self.baud_rate);
        }
        let mut settings = PortSettings::new(port_name, self.baud_rate);
        settings.timeout = Duration::from_millis(self.timeout_ms);
        settings.dtr = self.dtr;
        settings.discard_input = self.discard_input;
        Ok(settings)
    }
}
