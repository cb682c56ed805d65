//! Protocol constants shared by the firmware and the client

/// Oldest firmware version known to work
pub const MIN_FIRMWARE_VERSION: u32 = 108;

/// Firmware versions at or above this have not been validated
pub const MAX_FIRMWARE_VERSION: u32 = 3330;

/// Repeat period for setpoint and periodic status messages, in milliseconds
pub const SEND_MESSAGE_PERIOD_MS: u32 = 20;

/// Rate of the controller's internal control loop, in Hz
///
/// Ramp rates are configured in units per control tick.
pub const CONTROLLER_RATE_HZ: f64 = 1000.0;

/// Number of periodic status groups used by the client
pub const STATUS_GROUP_COUNT: usize = 3;

/// Returns true if a firmware version is in the supported range
pub const fn firmware_supported(version: u32) -> bool {
    version >= MIN_FIRMWARE_VERSION && version < MAX_FIRMWARE_VERSION
}

/// Item codes used to build a periodic status message layout
///
/// Each periodic status group is configured with an 8 byte list of these codes. The device fills
/// byte `n` of the group's data message with the item named by code `n`.
pub mod status_items {
    /// End of the message
    pub const END: u8 = 0;
    /// Output voltage (percentage), low byte
    pub const OUTPUT_PERCENT_B0: u8 = 1;
    /// Output voltage (percentage), high byte
    pub const OUTPUT_PERCENT_B1: u8 = 2;
    /// Bus voltage, low byte
    pub const BUS_VOLTAGE_B0: u8 = 3;
    /// Bus voltage, high byte
    pub const BUS_VOLTAGE_B1: u8 = 4;
    /// Current, low byte
    pub const CURRENT_B0: u8 = 5;
    /// Current, high byte
    pub const CURRENT_B1: u8 = 6;
    /// Temperature, low byte
    pub const TEMPERATURE_B0: u8 = 7;
    /// Temperature, high byte
    pub const TEMPERATURE_B1: u8 = 8;
    /// Position, byte 0
    pub const POSITION_B0: u8 = 9;
    /// Position, byte 1
    pub const POSITION_B1: u8 = 10;
    /// Position, byte 2
    pub const POSITION_B2: u8 = 11;
    /// Position, byte 3
    pub const POSITION_B3: u8 = 12;
    /// Speed, byte 0
    pub const SPEED_B0: u8 = 13;
    /// Speed, byte 1
    pub const SPEED_B1: u8 = 14;
    /// Speed, byte 2
    pub const SPEED_B2: u8 = 15;
    /// Speed, byte 3
    pub const SPEED_B3: u8 = 16;
    /// Limit switch state, cleared on read
    pub const LIMIT_CLEAR: u8 = 18;
    /// Fault state
    pub const FAULT: u8 = 19;

    /// Layout of status group 0: bus voltage, output percent, current, temperature
    pub const GROUP0_LAYOUT: [u8; 8] = [
        BUS_VOLTAGE_B0,
        BUS_VOLTAGE_B1,
        OUTPUT_PERCENT_B0,
        OUTPUT_PERCENT_B1,
        CURRENT_B0,
        CURRENT_B1,
        TEMPERATURE_B0,
        TEMPERATURE_B1,
    ];

    /// Layout of status group 1: position, speed
    pub const GROUP1_LAYOUT: [u8; 8] = [
        POSITION_B0,
        POSITION_B1,
        POSITION_B2,
        POSITION_B3,
        SPEED_B0,
        SPEED_B1,
        SPEED_B2,
        SPEED_B3,
    ];

    /// Layout of status group 2: limits, faults
    pub const GROUP2_LAYOUT: [u8; 8] = [LIMIT_CLEAR, FAULT, END, END, END, END, END, END];
}

/// Values of the speed and position reference configuration registers
pub mod reference {
    /// Quadrature encoder, or single channel encoder for speed
    pub const ENCODER: u8 = 0;
    /// Potentiometer
    pub const POTENTIOMETER: u8 = 1;
    /// Inverted encoder
    pub const INVERTED_ENCODER: u8 = 2;
    /// Quadrature encoder used for speed
    pub const QUAD_ENCODER: u8 = 3;
    /// No reference selected
    pub const NONE: u8 = 0xff;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_range() {
        assert!(!firmware_supported(107));
        assert!(firmware_supported(108));
        assert!(firmware_supported(3329));
        assert!(!firmware_supported(3330));
    }
}
