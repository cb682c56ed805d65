//! Device number type

/// The number identifying one motor controller on a bus
///
/// Valid device numbers are 1 through 63. Device number 0 is reserved for broadcast messages and
/// is never assigned to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceNumber(u8);

impl DeviceNumber {
    /// The lowest assignable device number
    pub const MIN: u8 = 1;
    /// The highest assignable device number
    pub const MAX: u8 = 63;

    /// Create a device number, checking that it is in the valid range
    pub const fn new(value: u8) -> Result<Self, InvalidDeviceNumberError> {
        if value >= Self::MIN && value <= Self::MAX {
            Ok(DeviceNumber(value))
        } else {
            Err(InvalidDeviceNumberError { value })
        }
    }

    /// Get the device number as a u8
    pub const fn raw(&self) -> u8 {
        self.0
    }
}

impl core::fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when constructing a [`DeviceNumber`] from an out of range value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidDeviceNumberError {
    /// The rejected value
    pub value: u8,
}

impl core::fmt::Display for InvalidDeviceNumberError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Invalid device number {} (must be {}..={})",
            self.value,
            DeviceNumber::MIN,
            DeviceNumber::MAX
        )
    }
}

impl std::error::Error for InvalidDeviceNumberError {}

impl TryFrom<u8> for DeviceNumber {
    type Error = InvalidDeviceNumberError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DeviceNumber::new(value)
    }
}

impl From<DeviceNumber> for u8 {
    fn from(value: DeviceNumber) -> Self {
        value.raw()
    }
}
