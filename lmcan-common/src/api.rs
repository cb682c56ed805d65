//! Message addressing
//!
//! Every message exchanged with a motor controller carries a 29-bit extended identifier made up
//! of five fields:
//!
//! ```text
//!  28      24 23            16 15        10 9      6 5          0
//! +----------+----------------+------------+--------+------------+
//! | dev type |  manufacturer  | API class  | index  | device num |
//! +----------+----------------+------------+--------+------------+
//! ```
//!
//! The constants in the sub-modules of this module are API identifiers with the device number
//! bits set to zero; the device number is added with [`MessageId::with_device`] when a message is
//! addressed to a particular controller.
//!
//! Bit 31 is not part of the identifier on the wire. It flags a remote (request-only) frame, see
//! [`REMOTE_FRAME`].

use crate::{codec::CodecError, device_number::DeviceNumber};

/// Bit position of the device number field
pub const DEVICE_NUMBER_SHIFT: u32 = 0;
/// Bit position of the API index field
pub const API_INDEX_SHIFT: u32 = 6;
/// Bit position of the API class field
pub const API_CLASS_SHIFT: u32 = 10;
/// Bit position of the manufacturer field
pub const MANUFACTURER_SHIFT: u32 = 16;
/// Bit position of the device type field
pub const DEVICE_TYPE_SHIFT: u32 = 24;

/// Device number bits
pub const DEVICE_NUMBER_MASK: u32 = 0x0000_003f;
/// API index bits
pub const API_INDEX_MASK: u32 = 0x0000_03c0;
/// API class bits
pub const API_CLASS_MASK: u32 = 0x0000_fc00;
/// Both API bit fields
pub const API_MASK: u32 = API_CLASS_MASK | API_INDEX_MASK;
/// Manufacturer bits
pub const MANUFACTURER_MASK: u32 = 0x00ff_0000;
/// Device type bits
pub const DEVICE_TYPE_MASK: u32 = 0x1f00_0000;
/// All 29 identifier bits
pub const FULL_MESSAGE_MASK: u32 = 0x1fff_ffff;
/// Identifier bits excluding the device number
///
/// Used to match an API regardless of which device it is addressed to.
pub const API_ID_MASK: u32 = API_MASK | MANUFACTURER_MASK | DEVICE_TYPE_MASK;

/// Flag marking a remote frame
///
/// This is outside of the 29 identifier bits, and must be stripped by the transport before the
/// frame is put on the wire.
pub const REMOTE_FRAME: u32 = 0x8000_0000;

/// Manufacturer codes
pub mod manufacturer {
    /// Broadcast to all manufacturers
    pub const BROADCAST: u8 = 0;
    /// National Instruments
    pub const NATIONAL_INSTRUMENTS: u8 = 1;
    /// Luminary Micro / Texas Instruments
    pub const LUMINARY_MICRO: u8 = 2;
    /// DEKA
    pub const DEKA: u8 = 3;
}

/// Device type codes
pub mod device_type {
    /// Broadcast to all device types
    pub const BROADCAST: u8 = 0;
    /// Robot controller
    pub const ROBOT_CONTROLLER: u8 = 1;
    /// Motor controller
    pub const MOTOR_CONTROLLER: u8 = 2;
    /// Relay
    pub const RELAY: u8 = 3;
    /// Gyro sensor
    pub const GYRO: u8 = 4;
    /// Accelerometer
    pub const ACCELEROMETER: u8 = 5;
    /// Ultrasonic sensor
    pub const ULTRASONIC: u8 = 6;
    /// Gear tooth sensor
    pub const GEAR_TOOTH: u8 = 7;
    /// Firmware update
    pub const FIRMWARE_UPDATE: u8 = 0x1f;
}

/// API class codes for the motor controller
pub mod api_class {
    /// Open loop voltage (percent of bus voltage) control
    pub const VOLTAGE: u8 = 0;
    /// Closed loop speed control
    pub const SPEED: u8 = 1;
    /// Compensated voltage control
    pub const VOLTAGE_COMP: u8 = 2;
    /// Closed loop position control
    pub const POSITION: u8 = 3;
    /// Closed loop current control
    pub const CURRENT: u8 = 4;
    /// Status readback
    pub const STATUS: u8 = 5;
    /// Periodic status
    pub const PERIODIC_STATUS: u8 = 6;
    /// Configuration
    pub const CONFIG: u8 = 7;
    /// Acknowledge
    pub const ACK: u8 = 8;
}

/// A message identifier
///
/// A thin wrapper around the raw 32-bit value, which includes the [`REMOTE_FRAME`] flag bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(u32);

/// The decoded fields of a [`MessageId`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIdFields {
    /// Manufacturer code
    pub manufacturer: u8,
    /// Device type code
    pub device_type: u8,
    /// API class
    pub api_class: u8,
    /// API index within the class
    pub api_index: u8,
    /// Device number, 0 for broadcast
    pub device_number: u8,
    /// Remote frame flag
    pub remote: bool,
}

impl MessageId {
    /// Build an identifier from its fields
    ///
    /// Each field is masked to its width.
    pub const fn new(
        manufacturer: u8,
        device_type: u8,
        api_class: u8,
        api_index: u8,
        device_number: u8,
    ) -> Self {
        let id = (((device_type as u32) << DEVICE_TYPE_SHIFT) & DEVICE_TYPE_MASK)
            | (((manufacturer as u32) << MANUFACTURER_SHIFT) & MANUFACTURER_MASK)
            | (((api_class as u32) << API_CLASS_SHIFT) & API_CLASS_MASK)
            | (((api_index as u32) << API_INDEX_SHIFT) & API_INDEX_MASK)
            | (((device_number as u32) << DEVICE_NUMBER_SHIFT) & DEVICE_NUMBER_MASK);
        Self(id)
    }

    /// Build a motor controller API identifier with no device number
    pub const fn motor_controller(api_class: u8, api_index: u8) -> Self {
        Self::new(
            manufacturer::LUMINARY_MICRO,
            device_type::MOTOR_CONTROLLER,
            api_class,
            api_index,
            0,
        )
    }

    /// Wrap a raw 32-bit value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit value, including the remote flag
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Address this API to a particular device
    pub const fn with_device(&self, device_number: DeviceNumber) -> Self {
        Self((self.0 & !DEVICE_NUMBER_MASK) | device_number.raw() as u32)
    }

    /// Flag this identifier as a remote frame
    pub const fn remote(&self) -> Self {
        Self(self.0 | REMOTE_FRAME)
    }

    /// Returns true if the remote frame flag is set
    pub const fn is_remote(&self) -> bool {
        self.0 & REMOTE_FRAME != 0
    }

    /// The identifier with the remote flag removed, as it appears on the wire
    pub const fn wire_id(&self) -> u32 {
        self.0 & FULL_MESSAGE_MASK
    }

    /// The identifier with the device number removed
    pub const fn api(&self) -> Self {
        Self(self.0 & API_ID_MASK)
    }

    /// The device number field
    pub const fn device_number(&self) -> u8 {
        ((self.0 & DEVICE_NUMBER_MASK) >> DEVICE_NUMBER_SHIFT) as u8
    }

    /// Decode all fields
    pub const fn fields(&self) -> MessageIdFields {
        MessageIdFields {
            manufacturer: ((self.0 & MANUFACTURER_MASK) >> MANUFACTURER_SHIFT) as u8,
            device_type: ((self.0 & DEVICE_TYPE_MASK) >> DEVICE_TYPE_SHIFT) as u8,
            api_class: ((self.0 & API_CLASS_MASK) >> API_CLASS_SHIFT) as u8,
            api_index: ((self.0 & API_INDEX_MASK) >> API_INDEX_SHIFT) as u8,
            device_number: self.device_number(),
            remote: self.is_remote(),
        }
    }

    /// Returns true if `other` matches this identifier in all bits selected by `mask`
    pub const fn matches(&self, other: u32, mask: u32) -> bool {
        (self.0 & mask) == (other & mask)
    }

    /// Returns true for the APIs whose payload is prefixed with two reserved zero bytes
    pub fn is_trusted(&self) -> bool {
        TRUSTED_APIS
            .iter()
            .any(|api| api.raw() == self.0 & API_ID_MASK)
    }
}

impl From<MessageId> for u32 {
    fn from(value: MessageId) -> Self {
        value.raw()
    }
}

/// Build the mask used to match a response
///
/// Masks off everything outside the 29 identifier bits of `message_mask`.
pub const fn mask(message_mask: u32) -> u32 {
    message_mask & FULL_MESSAGE_MASK
}

/// Open loop voltage control APIs
pub mod voltage {
    use super::{api_class::VOLTAGE, MessageId};
    /// Enable
    pub const ENABLE: MessageId = MessageId::motor_controller(VOLTAGE, 0);
    /// Disable
    pub const DISABLE: MessageId = MessageId::motor_controller(VOLTAGE, 1);
    /// Set output
    pub const SET: MessageId = MessageId::motor_controller(VOLTAGE, 2);
    /// Set ramp rate
    pub const SET_RAMP: MessageId = MessageId::motor_controller(VOLTAGE, 3);
    /// Trusted enable
    pub const TRUSTED_ENABLE: MessageId = MessageId::motor_controller(VOLTAGE, 4);
    /// Trusted set output
    pub const TRUSTED_SET: MessageId = MessageId::motor_controller(VOLTAGE, 5);
}

/// Closed loop speed control APIs
pub mod speed {
    use super::{api_class::SPEED, MessageId};
    /// Enable
    pub const ENABLE: MessageId = MessageId::motor_controller(SPEED, 0);
    /// Disable
    pub const DISABLE: MessageId = MessageId::motor_controller(SPEED, 1);
    /// Set target
    pub const SET: MessageId = MessageId::motor_controller(SPEED, 2);
    /// Proportional gain
    pub const P: MessageId = MessageId::motor_controller(SPEED, 3);
    /// Integral gain
    pub const I: MessageId = MessageId::motor_controller(SPEED, 4);
    /// Derivative gain
    pub const D: MessageId = MessageId::motor_controller(SPEED, 5);
    /// Speed reference source
    pub const REFERENCE: MessageId = MessageId::motor_controller(SPEED, 6);
    /// Trusted enable
    pub const TRUSTED_ENABLE: MessageId = MessageId::motor_controller(SPEED, 7);
    /// Trusted set target
    pub const TRUSTED_SET: MessageId = MessageId::motor_controller(SPEED, 8);
}

/// Compensated voltage control APIs
pub mod voltage_comp {
    use super::{api_class::VOLTAGE_COMP, MessageId};
    /// Enable
    pub const ENABLE: MessageId = MessageId::motor_controller(VOLTAGE_COMP, 0);
    /// Disable
    pub const DISABLE: MessageId = MessageId::motor_controller(VOLTAGE_COMP, 1);
    /// Set output voltage
    pub const SET: MessageId = MessageId::motor_controller(VOLTAGE_COMP, 2);
    /// Input ramp rate
    pub const IN_RAMP: MessageId = MessageId::motor_controller(VOLTAGE_COMP, 3);
    /// Compensation ramp rate
    pub const COMP_RAMP: MessageId = MessageId::motor_controller(VOLTAGE_COMP, 4);
    /// Trusted enable
    pub const TRUSTED_ENABLE: MessageId = MessageId::motor_controller(VOLTAGE_COMP, 5);
    /// Trusted set output voltage
    pub const TRUSTED_SET: MessageId = MessageId::motor_controller(VOLTAGE_COMP, 6);
}

/// Closed loop position control APIs
pub mod position {
    use super::{api_class::POSITION, MessageId};
    /// Enable
    pub const ENABLE: MessageId = MessageId::motor_controller(POSITION, 0);
    /// Disable
    pub const DISABLE: MessageId = MessageId::motor_controller(POSITION, 1);
    /// Set target
    pub const SET: MessageId = MessageId::motor_controller(POSITION, 2);
    /// Proportional gain
    pub const P: MessageId = MessageId::motor_controller(POSITION, 3);
    /// Integral gain
    pub const I: MessageId = MessageId::motor_controller(POSITION, 4);
    /// Derivative gain
    pub const D: MessageId = MessageId::motor_controller(POSITION, 5);
    /// Position reference source
    pub const REFERENCE: MessageId = MessageId::motor_controller(POSITION, 6);
    /// Trusted enable, with initial encoder position
    pub const TRUSTED_ENABLE: MessageId = MessageId::motor_controller(POSITION, 7);
    /// Trusted set target
    pub const TRUSTED_SET: MessageId = MessageId::motor_controller(POSITION, 8);
}

/// Closed loop current control APIs
pub mod current {
    use super::{api_class::CURRENT, MessageId};
    /// Enable
    pub const ENABLE: MessageId = MessageId::motor_controller(CURRENT, 0);
    /// Disable
    pub const DISABLE: MessageId = MessageId::motor_controller(CURRENT, 1);
    /// Set target
    pub const SET: MessageId = MessageId::motor_controller(CURRENT, 2);
    /// Proportional gain
    pub const P: MessageId = MessageId::motor_controller(CURRENT, 3);
    /// Integral gain
    pub const I: MessageId = MessageId::motor_controller(CURRENT, 4);
    /// Derivative gain
    pub const D: MessageId = MessageId::motor_controller(CURRENT, 5);
    /// Trusted enable
    pub const TRUSTED_ENABLE: MessageId = MessageId::motor_controller(CURRENT, 6);
    /// Trusted set target
    pub const TRUSTED_SET: MessageId = MessageId::motor_controller(CURRENT, 7);
}

/// Status readback APIs
pub mod status {
    use super::{api_class::STATUS, MessageId};
    /// Output as a percentage of bus voltage
    pub const OUTPUT_PERCENT: MessageId = MessageId::motor_controller(STATUS, 0);
    /// Bus voltage
    pub const BUS_VOLTAGE: MessageId = MessageId::motor_controller(STATUS, 1);
    /// Motor current
    pub const CURRENT: MessageId = MessageId::motor_controller(STATUS, 2);
    /// Temperature
    pub const TEMPERATURE: MessageId = MessageId::motor_controller(STATUS, 3);
    /// Position
    pub const POSITION: MessageId = MessageId::motor_controller(STATUS, 4);
    /// Speed
    pub const SPEED: MessageId = MessageId::motor_controller(STATUS, 5);
    /// Limit switch state
    pub const LIMIT: MessageId = MessageId::motor_controller(STATUS, 6);
    /// Fault state
    pub const FAULT: MessageId = MessageId::motor_controller(STATUS, 7);
    /// Power status; non-zero after the device has been power cycled
    pub const POWER: MessageId = MessageId::motor_controller(STATUS, 8);
    /// Active control mode
    pub const CONTROL_MODE: MessageId = MessageId::motor_controller(STATUS, 9);
    /// Output voltage
    pub const OUTPUT_VOLTAGE: MessageId = MessageId::motor_controller(STATUS, 10);
    /// Sticky faults
    pub const STICKY_FAULT: MessageId = MessageId::motor_controller(STATUS, 11);
    /// Fault counters
    pub const FAULT_COUNT: MessageId = MessageId::motor_controller(STATUS, 12);
}

/// Periodic status APIs
///
/// Each of the status groups has an enable message (payload is the period in ms), a configuration
/// message (payload is a list of status item codes), and a data message sent by the device.
pub mod periodic_status {
    use super::{api_class::PERIODIC_STATUS, MessageId};
    /// Enable group 0
    pub const ENABLE_S0: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 0);
    /// Enable group 1
    pub const ENABLE_S1: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 1);
    /// Enable group 2
    pub const ENABLE_S2: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 2);
    /// Enable group 3
    pub const ENABLE_S3: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 3);
    /// Configure group 0
    pub const CONFIG_S0: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 4);
    /// Configure group 1
    pub const CONFIG_S1: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 5);
    /// Configure group 2
    pub const CONFIG_S2: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 6);
    /// Configure group 3
    pub const CONFIG_S3: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 7);
    /// Group 0 data
    pub const DATA_S0: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 8);
    /// Group 1 data
    pub const DATA_S1: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 9);
    /// Group 2 data
    pub const DATA_S2: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 10);
    /// Group 3 data
    pub const DATA_S3: MessageId = MessageId::motor_controller(PERIODIC_STATUS, 11);
}

/// Configuration APIs
pub mod config {
    use super::{api_class::CONFIG, MessageId};
    /// Number of motor brushes
    pub const NUM_BRUSHES: MessageId = MessageId::motor_controller(CONFIG, 0);
    /// Encoder lines per revolution
    pub const ENCODER_LINES: MessageId = MessageId::motor_controller(CONFIG, 1);
    /// Potentiometer turns
    pub const POT_TURNS: MessageId = MessageId::motor_controller(CONFIG, 2);
    /// Brake / coast neutral behavior
    pub const BRAKE_COAST: MessageId = MessageId::motor_controller(CONFIG, 3);
    /// Limit switch mode
    pub const LIMIT_MODE: MessageId = MessageId::motor_controller(CONFIG, 4);
    /// Forward soft limit
    pub const LIMIT_FORWARD: MessageId = MessageId::motor_controller(CONFIG, 5);
    /// Reverse soft limit
    pub const LIMIT_REVERSE: MessageId = MessageId::motor_controller(CONFIG, 6);
    /// Maximum output voltage
    pub const MAX_OUTPUT_VOLTAGE: MessageId = MessageId::motor_controller(CONFIG, 7);
    /// Fault recovery time
    pub const FAULT_TIME: MessageId = MessageId::motor_controller(CONFIG, 8);
}

/// Firmware version request/response. Not manufacturer or device type specific.
pub const FIRMWARE_VERSION: MessageId = MessageId::new(0, 0, 0, 8, 0);

/// Hardware version request/response
pub const HARDWARE_VERSION: MessageId = MessageId::new(
    manufacturer::LUMINARY_MICRO,
    device_type::FIRMWARE_UPDATE,
    0,
    5,
    0,
);

/// Sync group update, broadcast to all devices
pub const SYNC: MessageId = MessageId::new(0, 0, 0, 6, 0);

/// The APIs which require two reserved zero bytes in front of their payload
pub const TRUSTED_APIS: [MessageId; 10] = [
    voltage::TRUSTED_ENABLE,
    voltage::TRUSTED_SET,
    speed::TRUSTED_ENABLE,
    speed::TRUSTED_SET,
    voltage_comp::TRUSTED_ENABLE,
    voltage_comp::TRUSTED_SET,
    position::TRUSTED_ENABLE,
    position::TRUSTED_SET,
    current::TRUSTED_ENABLE,
    current::TRUSTED_SET,
];

/// Number of reserved bytes prefixed to trusted payloads
pub const TRUSTED_PREFIX_LEN: usize = 2;

/// Build the payload actually put on the bus for a message
///
/// Trusted APIs get two zero bytes in front of `data`; everything else is passed through.
pub fn frame_payload(id: MessageId, data: &[u8]) -> Result<crate::codec::Payload, CodecError> {
    let mut payload = crate::codec::Payload::new();
    if id.is_trusted() {
        payload.push_bytes(&[0; TRUSTED_PREFIX_LEN])?;
    }
    payload.push_bytes(data)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_match_firmware_layout() {
        assert_eq!(0x0202_0140, voltage::TRUSTED_SET.raw());
        assert_eq!(0x0202_0400 | (3 << 6), speed::P.raw());
        assert_eq!(0x0202_1000 | (3 << 6), current::P.raw());
        assert_eq!(0x0202_1400 | (8 << 6), status::POWER.raw());
        assert_eq!(0x0202_1c00 | (7 << 6), config::MAX_OUTPUT_VOLTAGE.raw());
        assert_eq!(0x0202_1800 | (10 << 6), periodic_status::DATA_S2.raw());
        assert_eq!(0x0000_0200, FIRMWARE_VERSION.raw());
        assert_eq!(0x0000_0180, SYNC.raw());
        assert_eq!(0x1f02_0000 | (5 << 6), HARDWARE_VERSION.raw());
    }

    #[test]
    fn test_build_and_parse() {
        let dn = DeviceNumber::new(5).unwrap();
        let id = speed::SET.with_device(dn);
        let fields = id.fields();
        assert_eq!(manufacturer::LUMINARY_MICRO, fields.manufacturer);
        assert_eq!(device_type::MOTOR_CONTROLLER, fields.device_type);
        assert_eq!(api_class::SPEED, fields.api_class);
        assert_eq!(2, fields.api_index);
        assert_eq!(5, fields.device_number);
        assert!(!fields.remote);
        assert_eq!(speed::SET, id.api());
    }

    #[test]
    fn test_fields_are_masked() {
        // Device number 64 does not fit in 6 bits and must not bleed into the API index
        let id = MessageId::new(2, 2, 0, 0, 64);
        assert_eq!(0, id.device_number());
        assert_eq!(0, id.fields().api_index);
    }

    #[test]
    fn test_remote_flag() {
        let id = FIRMWARE_VERSION.with_device(DeviceNumber::new(3).unwrap()).remote();
        assert!(id.is_remote());
        assert_eq!(0x203, id.wire_id());
        assert_eq!(0x8000_0203, id.raw());
    }

    #[test]
    fn test_mask_matching() {
        let dn = DeviceNumber::new(7).unwrap();
        let id = status::POWER.with_device(dn);
        assert!(id.matches(status::POWER.with_device(dn).raw(), mask(FULL_MESSAGE_MASK)));
        assert!(!id.matches(status::POWER.raw(), FULL_MESSAGE_MASK));
        // Matching the API regardless of device number
        assert!(id.matches(status::POWER.raw(), API_ID_MASK));
        assert_eq!(FULL_MESSAGE_MASK, mask(0xffff_ffff));
    }

    #[test]
    fn test_trusted_payload() {
        let dn = DeviceNumber::new(1).unwrap();
        assert!(voltage::TRUSTED_SET.with_device(dn).is_trusted());
        assert!(!config::FAULT_TIME.with_device(dn).is_trusted());

        let payload = frame_payload(speed::TRUSTED_SET.with_device(dn), &[1, 2, 3, 4]).unwrap();
        assert_eq!(&[0, 0, 1, 2, 3, 4], payload.as_slice());
        let payload = frame_payload(config::FAULT_TIME, &[1, 2]).unwrap();
        assert_eq!(&[1, 2], payload.as_slice());
        assert!(frame_payload(voltage::TRUSTED_SET, &[0; 7]).is_err());
    }
}
