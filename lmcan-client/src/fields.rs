//! Tracking of which remote configuration values have been confirmed
use std::fmt::Display;

use crate::control_mode::ControlMode;

/// A configuration value held by the device which the session keeps in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldId {
    /// Active control mode; only checked while control is enabled
    ControlMode = 0,
    /// Speed reference source
    SpeedReference,
    /// Position reference source
    PositionReference,
    /// Proportional gain
    P,
    /// Integral gain
    I,
    /// Derivative gain
    D,
    /// Brake / coast behavior
    NeutralMode,
    /// Encoder codes per revolution
    EncoderCodesPerRev,
    /// Potentiometer turns
    PotentiometerTurns,
    /// Limit switch mode
    LimitMode,
    /// Forward soft limit
    ForwardLimit,
    /// Reverse soft limit
    ReverseLimit,
    /// Maximum output voltage
    MaxOutputVoltage,
    /// Voltage ramp rate
    VoltageRampRate,
    /// Fault recovery time
    FaultTime,
}

impl FieldId {
    /// All fields, in the order they are verified
    pub const ALL: [FieldId; 15] = [
        FieldId::ControlMode,
        FieldId::SpeedReference,
        FieldId::PositionReference,
        FieldId::P,
        FieldId::I,
        FieldId::D,
        FieldId::NeutralMode,
        FieldId::EncoderCodesPerRev,
        FieldId::PotentiometerTurns,
        FieldId::LimitMode,
        FieldId::ForwardLimit,
        FieldId::ReverseLimit,
        FieldId::MaxOutputVoltage,
        FieldId::VoltageRampRate,
        FieldId::FaultTime,
    ];

    const fn bit(&self) -> u16 {
        1 << (*self as u8)
    }

    /// Returns true if the field has meaning in `mode`
    ///
    /// Fields which do not apply are neither read nor verified.
    pub fn applies_to(&self, mode: ControlMode) -> bool {
        match self {
            FieldId::P | FieldId::I | FieldId::D => mode.is_closed_loop(),
            FieldId::VoltageRampRate => {
                matches!(mode, ControlMode::PercentVoltage | ControlMode::Voltage)
            }
            _ => true,
        }
    }
}

impl Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldId::ControlMode => "control mode",
            FieldId::SpeedReference => "speed reference",
            FieldId::PositionReference => "position reference",
            FieldId::P => "P",
            FieldId::I => "I",
            FieldId::D => "D",
            FieldId::NeutralMode => "neutral mode",
            FieldId::EncoderCodesPerRev => "encoder codes per rev",
            FieldId::PotentiometerTurns => "potentiometer turns",
            FieldId::LimitMode => "limit mode",
            FieldId::ForwardLimit => "forward limit",
            FieldId::ReverseLimit => "reverse limit",
            FieldId::MaxOutputVoltage => "max output voltage",
            FieldId::VoltageRampRate => "voltage ramp rate",
            FieldId::FaultTime => "fault time",
        };
        f.write_str(s)
    }
}

/// The set of fields awaiting confirmation from the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnverifiedFields(u16);

impl UnverifiedFields {
    /// An empty set, i.e. everything verified
    pub const fn new() -> Self {
        Self(0)
    }

    /// Mark a field as needing verification
    pub fn mark(&mut self, field: FieldId) {
        self.0 |= field.bit();
    }

    /// Mark a field as confirmed
    pub fn clear(&mut self, field: FieldId) {
        self.0 &= !field.bit();
    }

    /// Returns true if `field` has not been confirmed
    pub fn contains(&self, field: FieldId) -> bool {
        self.0 & field.bit() != 0
    }

    /// Mark every field which applies to `mode`
    ///
    /// Fields that do not apply are left as they are.
    pub fn mark_all(&mut self, mode: ControlMode) {
        for field in FieldId::ALL {
            if field.applies_to(mode) {
                self.mark(field);
            }
        }
    }

    /// Iterate over the unconfirmed fields which apply to `mode`
    pub fn pending(&self, mode: ControlMode) -> impl Iterator<Item = FieldId> + '_ {
        FieldId::ALL
            .into_iter()
            .filter(move |f| self.contains(*f) && f.applies_to(mode))
    }

    /// Returns true when no field applicable to `mode` awaits confirmation
    pub fn all_verified(&self, mode: ControlMode) -> bool {
        self.pending(mode).next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applicability() {
        assert!(!FieldId::P.applies_to(ControlMode::Voltage));
        assert!(!FieldId::D.applies_to(ControlMode::PercentVoltage));
        assert!(FieldId::I.applies_to(ControlMode::Current));
        assert!(FieldId::VoltageRampRate.applies_to(ControlMode::PercentVoltage));
        assert!(!FieldId::VoltageRampRate.applies_to(ControlMode::Speed));
        assert!(FieldId::FaultTime.applies_to(ControlMode::Position));
    }

    #[test]
    fn test_bitset() {
        let mut set = UnverifiedFields::new();
        assert!(set.all_verified(ControlMode::Speed));
        set.mark(FieldId::P);
        set.mark(FieldId::FaultTime);
        assert!(set.contains(FieldId::P));
        assert_eq!(
            vec![FieldId::P, FieldId::FaultTime],
            set.pending(ControlMode::Speed).collect::<Vec<_>>()
        );
        // P does not apply in voltage mode, so it is not pending there
        assert_eq!(
            vec![FieldId::FaultTime],
            set.pending(ControlMode::Voltage).collect::<Vec<_>>()
        );
        set.clear(FieldId::FaultTime);
        assert!(set.all_verified(ControlMode::Voltage));
        assert!(!set.all_verified(ControlMode::Current));
    }

    #[test]
    fn test_mark_all() {
        let mut set = UnverifiedFields::new();
        set.mark_all(ControlMode::PercentVoltage);
        assert!(set.contains(FieldId::VoltageRampRate));
        assert!(!set.contains(FieldId::P));
        assert_eq!(12, set.pending(ControlMode::PercentVoltage).count());
    }
}
