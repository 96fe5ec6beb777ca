// Timeouts, topics, controller and limiter configuration
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::limiter::{DEFAULT_INPUT_TIMEOUT, DEFAULT_TICK_FREQUENCY, SpeedLimiterConfig};
use crate::motor::sabertooth::{DEFAULT_ADDRESS, DEFAULT_REPLY_TIMEOUT};
use crate::motor::transport::DEFAULT_BAUDRATE;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "sabertooth/cmd/drive"; // commands
pub const TOPIC_TELEMETRY: &str = "sabertooth/state/telemetry"; // telemetry record
pub const TOPIC_HEALTH: &str = "sabertooth/state/health"; // health status

// Serial port for the Sabertooth controller
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";

// Enable hardware motor control (set to false for simulation/testing)
pub const MOTOR_ENABLED: bool = true;

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Limiter settings for one axis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AxisConfig {
    pub limits: SpeedLimiterConfig,
    pub exponential_mapping: bool,
}

impl AxisConfig {
    fn with_limits(limits: SpeedLimiterConfig) -> Self {
        Self {
            limits,
            exponential_mapping: false,
        }
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self::with_limits(SpeedLimiterConfig::symmetric(1.0, 1.5, 20.0))
    }
}

/// Full runtime configuration, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub port: String,
    pub baudrate: u32,
    pub address: u8,
    /// Milliseconds to wait for a GET reply
    pub reply_timeout_ms: u64,
    /// Controller serial watchdog in milliseconds (0 = controller default, negative = off)
    pub serial_timeout_ms: i16,
    pub tick_frequency: u32,
    /// Seconds without a tick before limiter history is dropped
    pub input_timeout: f32,
    /// Linear axis, m/s
    pub linear: AxisConfig,
    /// Angular axis, rad/s
    pub angular: AxisConfig,
    pub simulate: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: MOTOR_PORT.to_string(),
            baudrate: DEFAULT_BAUDRATE,
            address: DEFAULT_ADDRESS,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT.as_millis() as u64,
            serial_timeout_ms: 0,
            tick_frequency: DEFAULT_TICK_FREQUENCY,
            input_timeout: DEFAULT_INPUT_TIMEOUT,
            linear: AxisConfig::default(),
            angular: AxisConfig::with_limits(SpeedLimiterConfig::symmetric(2.0, 4.0, 40.0)),
            simulate: !MOTOR_ENABLED,
        }
    }
}

impl RuntimeConfig {
    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address < 128 || self.address > 135 {
            return Err(invalid("address", "Packet Serial addresses are 128..=135"));
        }
        if self.baudrate == 0 {
            return Err(invalid("baudrate", "must be non-zero"));
        }
        if self.tick_frequency == 0 {
            return Err(invalid("tick_frequency", "must be non-zero"));
        }
        if !(self.input_timeout.is_finite() && self.input_timeout > 0.0) {
            return Err(invalid("input_timeout", "must be a positive number of seconds"));
        }
        let loop_period = 1.0 / LOOP_HZ as f32;
        if self.input_timeout <= loop_period {
            return Err(invalid(
                "input_timeout",
                format!("must exceed the {loop_period}s control period"),
            ));
        }
        validate_limits("linear", &self.linear.limits)?;
        validate_limits("angular", &self.angular.limits)?;
        Ok(())
    }
}

/// Every bound must be finite and the allowed range must contain zero,
/// since the limiter starts from rest.
pub fn validate_limits(axis: &str, limits: &SpeedLimiterConfig) -> Result<(), ConfigError> {
    let pairs = [
        ("vel", limits.min_vel, limits.max_vel),
        ("acc", limits.min_acc, limits.max_acc),
        ("jerk", limits.min_jerk, limits.max_jerk),
    ];
    for (name, min, max) in pairs {
        let field = format!("{axis}.{name}");
        if !min.is_finite() || !max.is_finite() {
            return Err(invalid(field, "bounds must be finite"));
        }
        if min > 0.0 || max < 0.0 {
            return Err(invalid(
                field,
                format!("range [{min}, {max}] must contain zero"),
            ));
        }
    }
    Ok(())
}
