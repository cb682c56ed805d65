use lmcan_common::{
    codec::CodecError, device_number::InvalidDeviceNumberError, traits::BusError,
};
use snafu::Snafu;

/// Error returned by [`MotorController`](crate::MotorController) operations
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MotorControllerError {
    /// Another session on this bus already owns the device number
    #[snafu(display("Device number {device_number} is already allocated"))]
    Allocation {
        /// The requested device number
        device_number: u8,
    },
    /// The device did not answer during session setup
    #[snafu(display("Device {device_number} did not respond"))]
    DeviceNotResponding {
        /// The device number which was polled
        device_number: u8,
    },
    /// The device firmware is outside of the supported range; control is refused
    #[snafu(display(
        "Device {device_number} has unsupported firmware version {version} (supported: {}..{})",
        lmcan_common::constants::MIN_FIRMWARE_VERSION,
        lmcan_common::constants::MAX_FIRMWARE_VERSION
    ))]
    FirmwareVersion {
        /// The device number
        device_number: u8,
        /// The version reported by the device
        version: u32,
    },
    /// The operation is not valid in the current control mode
    #[snafu(display("Invalid operation: {message}"))]
    InvalidOperation {
        /// Description of what was attempted
        message: String,
    },
    /// A transport error
    #[snafu(display("Bus error: {source}"))]
    Bus {
        /// The transport error
        source: BusError,
    },
    /// A payload could not be packed or unpacked
    #[snafu(display("Codec error: {source}"))]
    Codec {
        /// The codec error
        source: CodecError,
    },
    /// An invalid device number was supplied
    #[snafu(display("{source}"))]
    InvalidDeviceNumber {
        /// The rejected value
        source: InvalidDeviceNumberError,
    },
}

impl From<BusError> for MotorControllerError {
    fn from(source: BusError) -> Self {
        MotorControllerError::Bus { source }
    }
}

impl From<CodecError> for MotorControllerError {
    fn from(source: CodecError) -> Self {
        MotorControllerError::Codec { source }
    }
}

impl From<InvalidDeviceNumberError> for MotorControllerError {
    fn from(source: InvalidDeviceNumberError) -> Self {
        MotorControllerError::InvalidDeviceNumber { source }
    }
}
