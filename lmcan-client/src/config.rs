//! Loading a controller setup from a TOML file
//!
//! ```toml
//! device_number = 5
//! neutral_mode = "brake"
//! max_output_voltage = 12.0
//!
//! [control]
//! mode = "speed"
//! source = "quad_encoder"
//! codes_per_rev = 360
//! p = 1.0
//! i = 0.01
//!
//! [safety]
//! enabled = true
//! expiration_ms = 100
//! ```
use std::{path::Path, time::Duration};

use lmcan_common::{traits::CanSessionMux, DeviceNumber};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::{
    control_mode::{ControlMode, NeutralMode, SourceMode},
    error::MotorControllerError,
    fields::FieldId,
    motor_controller::{MotorController, DEFAULT_MAX_OUTPUT_VOLTAGE},
    safety::DEFAULT_EXPIRATION,
};

/// Error returned when loading a controller configuration
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The file could not be read
    #[snafu(display("IO error loading {path}: {source:?}"))]
    Io {
        /// The path which was read
        path: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The file is not valid TOML, or does not match the expected layout
    #[snafu(display("Error parsing TOML: {source}"))]
    TomlDeserialization {
        /// The parse error
        source: toml::de::Error,
    },
    /// A value is out of range or inconsistent with the rest of the file
    #[snafu(display("Invalid value for {field}: {reason}"))]
    InvalidValue {
        /// The offending key
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Soft position limits, in rotations
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoftLimits {
    /// Forward limit
    pub forward: f64,
    /// Reverse limit
    pub reverse: f64,
}

/// Safety watchdog setup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyConfig {
    /// Whether the watchdog stops the motor
    pub enabled: bool,
    /// Time allowed between outputs
    pub expiration: Duration,
}

/// The desired setup of one motor controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorConfig {
    /// The device to configure
    pub device_number: DeviceNumber,
    /// Negate setpoints
    pub inverted: bool,
    /// Neutral behavior
    pub neutral_mode: NeutralMode,
    /// Maximum output voltage, in volts
    pub max_output_voltage: f64,
    /// Fault recovery time in seconds, if it should be changed
    pub fault_time: Option<f64>,
    /// Voltage ramp rate in volts per second; only used in percent voltage and voltage modes
    pub voltage_ramp_rate: f64,
    /// Control mode
    pub mode: ControlMode,
    /// Feedback source
    pub source: SourceMode,
    /// PID gains, for the closed loop modes
    pub pid: Option<(f64, f64, f64)>,
    /// Soft position limits; switch inputs only when absent
    pub soft_limits: Option<SoftLimits>,
    /// Safety watchdog; left disabled when absent
    pub safety: Option<SafetyConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SourceKind {
    #[default]
    None,
    Encoder,
    QuadEncoder,
    Potentiometer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlSerializer {
    #[serde(default)]
    mode: ControlMode,
    #[serde(default)]
    source: SourceKind,
    codes_per_rev: Option<u16>,
    p: Option<f64>,
    i: Option<f64>,
    d: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SafetySerializer {
    #[serde(default = "default_true")]
    enabled: bool,
    expiration_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct MotorConfigSerializer {
    device_number: u8,
    #[serde(default)]
    inverted: bool,
    #[serde(default)]
    neutral_mode: NeutralMode,
    #[serde(default = "default_max_output_voltage")]
    max_output_voltage: f64,
    fault_time: Option<f64>,
    #[serde(default)]
    voltage_ramp_rate: f64,
    #[serde(default)]
    control: ControlSerializer,
    soft_limits: Option<SoftLimits>,
    safety: Option<SafetySerializer>,
}

fn default_true() -> bool {
    true
}

fn default_max_output_voltage() -> f64 {
    DEFAULT_MAX_OUTPUT_VOLTAGE
}

fn invalid<T>(field: &str, reason: impl Into<String>) -> Result<T, ConfigError> {
    InvalidValueSnafu {
        field,
        reason: reason.into(),
    }
    .fail()
}

impl MotorConfig {
    /// Read a configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<MotorConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Self::load_from_str(&content)
    }

    /// Read a configuration from a string
    pub fn load_from_str(s: &str) -> Result<MotorConfig, ConfigError> {
        let raw: MotorConfigSerializer = toml::from_str(s).context(TomlDeserializationSnafu)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: MotorConfigSerializer) -> Result<MotorConfig, ConfigError> {
        let Ok(device_number) = DeviceNumber::new(raw.device_number) else {
            return invalid(
                "device_number",
                format!("{} is outside 1..=63", raw.device_number),
            );
        };

        if !raw.max_output_voltage.is_finite() || raw.max_output_voltage <= 0.0 {
            return invalid("max_output_voltage", "must be positive");
        }

        let control = raw.control;
        let source = match (control.source, control.codes_per_rev) {
            (SourceKind::None, _) => SourceMode::None,
            (SourceKind::Potentiometer, _) => SourceMode::Potentiometer,
            (SourceKind::Encoder, Some(cpr)) => SourceMode::Encoder(cpr),
            (SourceKind::QuadEncoder, Some(cpr)) => SourceMode::QuadEncoder(cpr),
            (_, None) => {
                return invalid("control.codes_per_rev", "required for encoder sources");
            }
        };

        if control.mode == ControlMode::Position && !source.supports_position() {
            return invalid(
                "control.source",
                "position mode requires a quad_encoder or potentiometer source",
            );
        }

        let gains_given = control.p.is_some() || control.i.is_some() || control.d.is_some();
        let pid = if control.mode.is_closed_loop() {
            Some((
                control.p.unwrap_or(0.0),
                control.i.unwrap_or(0.0),
                control.d.unwrap_or(0.0),
            ))
        } else if gains_given {
            return invalid(
                "control",
                format!("PID gains do not apply in {} mode", control.mode),
            );
        } else {
            None
        };

        if raw.voltage_ramp_rate != 0.0 && !FieldId::VoltageRampRate.applies_to(control.mode) {
            return invalid(
                "voltage_ramp_rate",
                format!("ramp rate does not apply in {} mode", control.mode),
            );
        }
        if raw.voltage_ramp_rate < 0.0 {
            return invalid("voltage_ramp_rate", "must not be negative");
        }

        let safety = raw.safety.map(|s| SafetyConfig {
            enabled: s.enabled,
            expiration: s
                .expiration_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_EXPIRATION),
        });

        Ok(MotorConfig {
            device_number,
            inverted: raw.inverted,
            neutral_mode: raw.neutral_mode,
            max_output_voltage: raw.max_output_voltage,
            fault_time: raw.fault_time,
            voltage_ramp_rate: raw.voltage_ramp_rate,
            mode: control.mode,
            source,
            pid,
            soft_limits: raw.soft_limits,
            safety,
        })
    }
}

impl<M: CanSessionMux> MotorController<M> {
    /// Bring the session in line with a loaded configuration
    ///
    /// This makes the same setter calls a caller would; the values are then confirmed by
    /// subsequent [`verify`](Self::verify) calls.
    pub fn apply_config(&mut self, config: &MotorConfig) -> Result<(), MotorControllerError> {
        if config.device_number != self.device_number() {
            log::warn!(
                "Applying configuration for device {} to device {}",
                config.device_number,
                self.device_number()
            );
        }

        let (p, i, d) = config.pid.unwrap_or_default();
        match config.mode {
            ControlMode::PercentVoltage => self.set_percent_mode(config.source)?,
            ControlMode::Voltage => self.set_voltage_mode(config.source)?,
            ControlMode::Current => self.set_current_mode(p, i, d, config.source)?,
            ControlMode::Speed => self.set_speed_mode(p, i, d, config.source)?,
            ControlMode::Position => self.set_position_mode(p, i, d, config.source)?,
        }

        self.set_inverted(config.inverted);
        self.set_neutral_mode(config.neutral_mode)?;
        self.set_max_output_voltage(config.max_output_voltage)?;
        if FieldId::VoltageRampRate.applies_to(config.mode) {
            self.set_voltage_ramp_rate(config.voltage_ramp_rate)?;
        }
        if let Some(fault_time) = config.fault_time {
            self.set_fault_time(fault_time)?;
        }

        match config.soft_limits {
            Some(limits) => self.config_soft_position_limits(limits.forward, limits.reverse)?,
            None => self.disable_soft_position_limits()?,
        }

        match config.safety {
            Some(safety) => {
                self.set_expiration(safety.expiration);
                self.set_safety_enabled(safety.enabled);
            }
            None => self.set_safety_enabled(false),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml = r#"
            device_number = 5
            inverted = true
            neutral_mode = "brake"
            max_output_voltage = 10.0
            fault_time = 0.5

            [control]
            mode = "speed"
            source = "quad_encoder"
            codes_per_rev = 360
            p = 1.0
            i = 0.01

            [soft_limits]
            forward = 10.0
            reverse = -10.0

            [safety]
            expiration_ms = 250
        "#;
        let config = MotorConfig::load_from_str(toml).unwrap();
        assert_eq!(5, config.device_number.raw());
        assert!(config.inverted);
        assert_eq!(NeutralMode::Brake, config.neutral_mode);
        assert_eq!(ControlMode::Speed, config.mode);
        assert_eq!(SourceMode::QuadEncoder(360), config.source);
        assert_eq!(Some((1.0, 0.01, 0.0)), config.pid);
        assert_eq!(Some(0.5), config.fault_time);
        assert_eq!(
            Some(SoftLimits {
                forward: 10.0,
                reverse: -10.0
            }),
            config.soft_limits
        );
        let safety = config.safety.unwrap();
        assert!(safety.enabled);
        assert_eq!(Duration::from_millis(250), safety.expiration);
    }

    #[test]
    fn test_defaults() {
        let config = MotorConfig::load_from_str("device_number = 1").unwrap();
        assert_eq!(ControlMode::PercentVoltage, config.mode);
        assert_eq!(SourceMode::None, config.source);
        assert_eq!(NeutralMode::Jumper, config.neutral_mode);
        assert_eq!(DEFAULT_MAX_OUTPUT_VOLTAGE, config.max_output_voltage);
        assert_eq!(None, config.pid);
        assert_eq!(None, config.safety);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let result = MotorConfig::load_from_str("device_number = 1\nspeed = 3");
        assert!(matches!(
            result,
            Err(ConfigError::TomlDeserialization { .. })
        ));
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        let cases = [
            "device_number = 64",
            "device_number = 0",
            "device_number = 2\n[control]\nmode = \"voltage\"\np = 1.0",
            "device_number = 2\n[control]\nmode = \"position\"\nsource = \"encoder\"\ncodes_per_rev = 100",
            "device_number = 2\n[control]\nsource = \"quad_encoder\"",
            "device_number = 2\nvoltage_ramp_rate = 5.0\n[control]\nmode = \"current\"",
            "device_number = 2\nmax_output_voltage = 0.0",
        ];
        for case in cases {
            let result = MotorConfig::load_from_str(case);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { .. })),
                "expected rejection of {case:?}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_missing_file() {
        let result = MotorConfig::load_from_file("/nonexistent/motor.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
