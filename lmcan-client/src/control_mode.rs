//! Control modes and the configuration value types that go with them
use std::fmt::Display;

use bitflags::bitflags;
use lmcan_common::{
    api::{self, MessageId},
    codec::{self, CodecError, Payload},
    constants::reference,
};
use serde::Deserialize;

/// The closed loop (or open loop) mode a controller runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Output as a fraction of bus voltage, -1.0 to 1.0
    #[default]
    PercentVoltage,
    /// Closed loop speed, in rotations per minute
    Speed,
    /// Closed loop position, in rotations
    Position,
    /// Closed loop current, in amps
    Current,
    /// Compensated output voltage, in volts
    Voltage,
}

/// Wire representation of a setpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointFormat {
    /// [`codec::encode_percentage`]
    Percentage,
    /// [`codec::encode_fxp8_8`]
    Fxp8_8,
    /// [`codec::encode_fxp16_16`]
    Fxp16_16,
}

impl SetpointFormat {
    /// Append `value` to `payload` in this format
    pub fn push(&self, payload: &mut Payload, value: f64) -> Result<(), CodecError> {
        match self {
            SetpointFormat::Percentage => payload.push_percentage(value)?,
            SetpointFormat::Fxp8_8 => payload.push_fxp8_8(value)?,
            SetpointFormat::Fxp16_16 => payload.push_fxp16_16(value)?,
        };
        Ok(())
    }

    /// Read a value in this format from the start of `data`
    pub fn unpack(&self, data: &[u8]) -> Result<f64, CodecError> {
        match self {
            SetpointFormat::Percentage => codec::unpack_percentage(data),
            SetpointFormat::Fxp8_8 => codec::unpack_fxp8_8(data),
            SetpointFormat::Fxp16_16 => codec::unpack_fxp16_16(data),
        }
    }

    /// Number of bytes a value occupies on the wire
    pub const fn encoded_len(&self) -> usize {
        match self {
            SetpointFormat::Percentage | SetpointFormat::Fxp8_8 => 2,
            SetpointFormat::Fxp16_16 => 4,
        }
    }
}

/// Message ids for the proportional, integral, and derivative gains of a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidIds {
    /// Proportional gain
    pub p: MessageId,
    /// Integral gain
    pub i: MessageId,
    /// Derivative gain
    pub d: MessageId,
}

/// The messages and encoding used by one control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTable {
    /// Trusted enable message
    pub enable: MessageId,
    /// Disable message
    pub disable: MessageId,
    /// Trusted setpoint message
    pub set: MessageId,
    /// Setpoint encoding
    pub format: SetpointFormat,
    /// Whether the inverted flag negates the setpoint
    pub invertible: bool,
    /// PID gain messages, for the closed loop modes
    pub pid: Option<PidIds>,
}

const PERCENT_TABLE: ModeTable = ModeTable {
    enable: api::voltage::TRUSTED_ENABLE,
    disable: api::voltage::DISABLE,
    set: api::voltage::TRUSTED_SET,
    format: SetpointFormat::Percentage,
    invertible: true,
    pid: None,
};

const SPEED_TABLE: ModeTable = ModeTable {
    enable: api::speed::TRUSTED_ENABLE,
    disable: api::speed::DISABLE,
    set: api::speed::TRUSTED_SET,
    format: SetpointFormat::Fxp16_16,
    invertible: true,
    pid: Some(PidIds {
        p: api::speed::P,
        i: api::speed::I,
        d: api::speed::D,
    }),
};

const POSITION_TABLE: ModeTable = ModeTable {
    enable: api::position::TRUSTED_ENABLE,
    disable: api::position::DISABLE,
    set: api::position::TRUSTED_SET,
    format: SetpointFormat::Fxp16_16,
    invertible: false,
    pid: Some(PidIds {
        p: api::position::P,
        i: api::position::I,
        d: api::position::D,
    }),
};

const CURRENT_TABLE: ModeTable = ModeTable {
    enable: api::current::TRUSTED_ENABLE,
    disable: api::current::DISABLE,
    set: api::current::TRUSTED_SET,
    format: SetpointFormat::Fxp8_8,
    invertible: false,
    pid: Some(PidIds {
        p: api::current::P,
        i: api::current::I,
        d: api::current::D,
    }),
};

const VOLTAGE_TABLE: ModeTable = ModeTable {
    enable: api::voltage_comp::TRUSTED_ENABLE,
    disable: api::voltage_comp::DISABLE,
    set: api::voltage_comp::TRUSTED_SET,
    format: SetpointFormat::Fxp8_8,
    invertible: true,
    pid: None,
};

impl ControlMode {
    /// All modes
    pub const ALL: [ControlMode; 5] = [
        ControlMode::PercentVoltage,
        ControlMode::Speed,
        ControlMode::Position,
        ControlMode::Current,
        ControlMode::Voltage,
    ];

    /// The message table for this mode
    pub const fn table(&self) -> &'static ModeTable {
        match self {
            ControlMode::PercentVoltage => &PERCENT_TABLE,
            ControlMode::Speed => &SPEED_TABLE,
            ControlMode::Position => &POSITION_TABLE,
            ControlMode::Current => &CURRENT_TABLE,
            ControlMode::Voltage => &VOLTAGE_TABLE,
        }
    }

    /// Returns true for modes with PID gains
    pub const fn is_closed_loop(&self) -> bool {
        self.table().pid.is_some()
    }

    /// The value reported by the device in the control mode status message
    pub const fn status_value(&self) -> u8 {
        match self {
            ControlMode::PercentVoltage => 0,
            ControlMode::Current => 1,
            ControlMode::Speed => 2,
            ControlMode::Position => 3,
            ControlMode::Voltage => 4,
        }
    }
}

impl TryFrom<u8> for ControlMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ControlMode::PercentVoltage),
            1 => Ok(ControlMode::Current),
            2 => Ok(ControlMode::Speed),
            3 => Ok(ControlMode::Position),
            4 => Ok(ControlMode::Voltage),
            v => Err(v),
        }
    }
}

impl Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControlMode::PercentVoltage => "percent voltage",
            ControlMode::Speed => "speed",
            ControlMode::Position => "position",
            ControlMode::Current => "current",
            ControlMode::Voltage => "voltage",
        };
        f.write_str(s)
    }
}

/// Feedback device used as the speed or position reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReferenceSource {
    /// No reference
    #[default]
    None,
    /// Encoder
    Encoder,
    /// Quadrature encoder
    QuadEncoder,
    /// Encoder with inverted direction
    InvertedEncoder,
    /// Potentiometer
    Potentiometer,
}

impl ReferenceSource {
    /// The value written to the reference configuration registers
    pub const fn raw(&self) -> u8 {
        match self {
            ReferenceSource::None => reference::NONE,
            ReferenceSource::Encoder => reference::ENCODER,
            ReferenceSource::QuadEncoder => reference::QUAD_ENCODER,
            ReferenceSource::InvertedEncoder => reference::INVERTED_ENCODER,
            ReferenceSource::Potentiometer => reference::POTENTIOMETER,
        }
    }
}

impl TryFrom<u8> for ReferenceSource {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            reference::NONE => Ok(ReferenceSource::None),
            reference::ENCODER => Ok(ReferenceSource::Encoder),
            reference::QUAD_ENCODER => Ok(ReferenceSource::QuadEncoder),
            reference::INVERTED_ENCODER => Ok(ReferenceSource::InvertedEncoder),
            reference::POTENTIOMETER => Ok(ReferenceSource::Potentiometer),
            v => Err(v),
        }
    }
}

/// Feedback sensor selection used when setting up a control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// No feedback sensor
    None,
    /// Single channel encoder with the given codes per revolution
    Encoder(u16),
    /// Quadrature encoder with the given codes per revolution
    QuadEncoder(u16),
    /// Single turn potentiometer
    Potentiometer,
}

/// The reference register values implied by a [`SourceMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSelection {
    /// Position reference
    pub position: ReferenceSource,
    /// Speed reference
    pub speed: ReferenceSource,
    /// Encoder codes per revolution, for encoder sources
    pub codes_per_rev: Option<u16>,
    /// Potentiometer turns, for potentiometer sources
    pub potentiometer_turns: Option<u16>,
}

impl SourceMode {
    /// Map a source onto the reference registers for `mode`
    ///
    /// A single channel encoder cannot measure direction, so it is never used as the reference in
    /// current mode.
    pub fn selection(&self, mode: ControlMode) -> SourceSelection {
        match *self {
            SourceMode::None => SourceSelection {
                position: ReferenceSource::None,
                speed: ReferenceSource::None,
                codes_per_rev: None,
                potentiometer_turns: None,
            },
            SourceMode::Encoder(cpr) => SourceSelection {
                position: ReferenceSource::None,
                speed: if mode == ControlMode::Current {
                    ReferenceSource::None
                } else {
                    ReferenceSource::Encoder
                },
                codes_per_rev: Some(cpr),
                potentiometer_turns: None,
            },
            SourceMode::QuadEncoder(cpr) => SourceSelection {
                position: ReferenceSource::Encoder,
                speed: ReferenceSource::QuadEncoder,
                codes_per_rev: Some(cpr),
                potentiometer_turns: None,
            },
            SourceMode::Potentiometer => SourceSelection {
                position: ReferenceSource::Potentiometer,
                speed: ReferenceSource::None,
                codes_per_rev: None,
                potentiometer_turns: Some(1),
            },
        }
    }

    /// Returns true if the source can be used for closed loop position control
    pub fn supports_position(&self) -> bool {
        matches!(self, SourceMode::QuadEncoder(_) | SourceMode::Potentiometer)
    }
}

/// Behavior of the output when the setpoint is neutral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeutralMode {
    /// Use the setting of the jumper on the device
    #[default]
    Jumper,
    /// Short the motor leads
    Brake,
    /// Leave the motor leads floating
    Coast,
}

impl NeutralMode {
    /// The value written to the brake/coast configuration register
    pub const fn raw(&self) -> u8 {
        match self {
            NeutralMode::Jumper => 0,
            NeutralMode::Brake => 1,
            NeutralMode::Coast => 2,
        }
    }
}

impl TryFrom<u8> for NeutralMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NeutralMode::Jumper),
            1 => Ok(NeutralMode::Brake),
            2 => Ok(NeutralMode::Coast),
            v => Err(v),
        }
    }
}

/// Which limits stop the motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LimitMode {
    /// Only the limit switch inputs
    #[default]
    SwitchInputsOnly,
    /// Limit switch inputs and the soft position limits
    SoftPositionLimits,
}

impl LimitMode {
    /// The value written to the limit mode configuration register
    pub const fn raw(&self) -> u8 {
        match self {
            LimitMode::SwitchInputsOnly => 0,
            LimitMode::SoftPositionLimits => 1,
        }
    }
}

impl TryFrom<u8> for LimitMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LimitMode::SwitchInputsOnly),
            1 => Ok(LimitMode::SoftPositionLimits),
            v => Err(v),
        }
    }
}

bitflags! {
    /// Limit state reported in periodic status
    ///
    /// A set bit means the limit is OK, i.e. motion in that direction is allowed.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Limits: u8 {
        /// Forward limit switch
        const FORWARD = 0x01;
        /// Reverse limit switch
        const REVERSE = 0x02;
        /// Forward soft limit
        const SOFT_FORWARD = 0x04;
        /// Reverse soft limit
        const SOFT_REVERSE = 0x08;
        /// Latched forward limit switch
        const STICKY_FORWARD = 0x10;
        /// Latched reverse limit switch
        const STICKY_REVERSE = 0x20;
        /// Latched forward soft limit
        const STICKY_SOFT_FORWARD = 0x40;
        /// Latched reverse soft limit
        const STICKY_SOFT_REVERSE = 0x80;
    }
}

bitflags! {
    /// Active faults reported in periodic status
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Faults: u8 {
        /// Over current
        const CURRENT = 0x01;
        /// Over temperature
        const TEMPERATURE = 0x02;
        /// Bus voltage out of range
        const BUS_VOLTAGE = 0x04;
        /// Gate driver fault
        const GATE_DRIVER = 0x08;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_table() {
        assert_eq!(api::current::P, ControlMode::Current.table().pid.unwrap().p);
        assert_eq!(api::speed::I, ControlMode::Speed.table().pid.unwrap().i);
        assert_eq!(api::position::D, ControlMode::Position.table().pid.unwrap().d);
        assert!(!ControlMode::Voltage.is_closed_loop());
        assert!(!ControlMode::PercentVoltage.is_closed_loop());
        for mode in ControlMode::ALL {
            let table = mode.table();
            assert!(table.enable.is_trusted());
            assert!(table.set.is_trusted());
            assert!(!table.disable.is_trusted());
            assert_eq!(Ok(mode), ControlMode::try_from(mode.status_value()));
        }
    }

    #[test]
    fn test_setpoint_encoding() {
        let mut payload = Payload::new();
        SetpointFormat::Percentage.push(&mut payload, 0.5).unwrap();
        assert_eq!(&[0x00, 0x40], payload.as_slice());
        assert_eq!(
            0.5,
            SetpointFormat::Fxp16_16.unpack(&[0x00, 0x80, 0x00, 0x00]).unwrap()
        );
        assert_eq!(2, SetpointFormat::Percentage.encoded_len());
        assert_eq!(4, SetpointFormat::Fxp16_16.encoded_len());
    }

    #[test]
    fn test_source_selection() {
        let sel = SourceMode::QuadEncoder(360).selection(ControlMode::Speed);
        assert_eq!(ReferenceSource::Encoder, sel.position);
        assert_eq!(ReferenceSource::QuadEncoder, sel.speed);
        assert_eq!(Some(360), sel.codes_per_rev);

        let sel = SourceMode::Encoder(100).selection(ControlMode::Current);
        assert_eq!(ReferenceSource::None, sel.speed);
        let sel = SourceMode::Encoder(100).selection(ControlMode::Speed);
        assert_eq!(ReferenceSource::Encoder, sel.speed);

        let sel = SourceMode::Potentiometer.selection(ControlMode::Position);
        assert_eq!(ReferenceSource::Potentiometer, sel.position);
        assert_eq!(Some(1), sel.potentiometer_turns);

        assert!(!SourceMode::Encoder(1).supports_position());
        assert!(SourceMode::Potentiometer.supports_position());
    }

    #[test]
    fn test_flags() {
        let limits = Limits::from_bits_truncate(0x03);
        assert!(limits.contains(Limits::FORWARD));
        assert!(limits.contains(Limits::REVERSE));
        assert!(!limits.contains(Limits::SOFT_FORWARD));
        let faults = Faults::from_bits_truncate(0x0a);
        assert_eq!(Faults::TEMPERATURE | Faults::GATE_DRIVER, faults);
    }
}
