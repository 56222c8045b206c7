//! Bus configuration
//!
//! Settings are stored as JSON so they can sit next to whatever launches the
//! bus (a robot description, a service config directory, ...).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_US, DEFAULT_TIMEOUT_MS};
use crate::registers::Model;

/// Errors raised while loading or validating a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Baud rates a servo can be switched to, with their register codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaudRate {
    /// 1 Mbit/s
    B1M,
    /// 500 kbit/s
    B500K,
    /// 250 kbit/s
    B250K,
    /// 128 kbit/s
    B128K,
    /// 115200 bit/s
    B115200,
    /// 76800 bit/s
    B76800,
    /// 57600 bit/s
    B57600,
    /// 38400 bit/s
    B38400,
}

impl BaudRate {
    /// Every supported rate, fastest first
    pub const ALL: [BaudRate; 8] = [
        BaudRate::B1M,
        BaudRate::B500K,
        BaudRate::B250K,
        BaudRate::B128K,
        BaudRate::B115200,
        BaudRate::B76800,
        BaudRate::B57600,
        BaudRate::B38400,
    ];

    /// Value stored in the BAUD_RATE register
    pub fn code(&self) -> u8 {
        match self {
            BaudRate::B1M => 0,
            BaudRate::B500K => 1,
            BaudRate::B250K => 2,
            BaudRate::B128K => 3,
            BaudRate::B115200 => 4,
            BaudRate::B76800 => 5,
            BaudRate::B57600 => 6,
            BaudRate::B38400 => 7,
        }
    }

    /// Line speed
    pub fn bits_per_second(&self) -> u32 {
        match self {
            BaudRate::B1M => 1_000_000,
            BaudRate::B500K => 500_000,
            BaudRate::B250K => 250_000,
            BaudRate::B128K => 128_000,
            BaudRate::B115200 => 115_200,
            BaudRate::B76800 => 76_800,
            BaudRate::B57600 => 57_600,
            BaudRate::B38400 => 38_400,
        }
    }

    /// Short label, e.g. "1M" or "115200"
    pub fn name(&self) -> &'static str {
        match self {
            BaudRate::B1M => "1M",
            BaudRate::B500K => "500K",
            BaudRate::B250K => "250K",
            BaudRate::B128K => "128K",
            BaudRate::B115200 => "115200",
            BaudRate::B76800 => "76800",
            BaudRate::B57600 => "57600",
            BaudRate::B38400 => "38400",
        }
    }

    /// Look up a rate by its register code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.code() == code)
    }

    /// Look up a rate by its speed in bits per second
    pub fn from_bits_per_second(bps: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.bits_per_second() == bps)
    }
}

/// Connection and engine settings for one bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial port name (e.g. "/dev/ttyUSB0" or "COM3")
    #[serde(default)]
    pub port: Option<String>,

    /// Line speed in bits per second
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Budget for one complete response, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sleep between polls of an empty receive buffer, in microseconds
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,

    /// Servo family on this bus
    #[serde(default)]
    pub model: Model,

    /// Log every packet
    #[serde(default)]
    pub debug: bool,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_poll_interval_us() -> u64 {
    DEFAULT_POLL_INTERVAL_US
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            model: Model::default(),
            debug: false,
        }
    }
}

impl BusConfig {
    /// Response timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    /// Check values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if BaudRate::from_bits_per_second(self.baud_rate).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        if let Some(port) = &self.port {
            if port.trim().is_empty() {
                return Err(ConfigError::Invalid("port name is empty".into()));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: BusConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Write the config as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
