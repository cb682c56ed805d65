//! Raw CAN frame types
use snafu::Snafu;

/// A CAN identifier, either an 11-bit standard or a 29-bit extended ID
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CanId {
    /// A 29-bit extended identifier
    Extended(u32),
    /// An 11-bit standard identifier
    Std(u16),
}

impl CanId {
    /// Create an extended ID
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id)
    }

    /// Create a standard ID
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id)
    }

    /// Get the ID as a raw integer
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true if this is an extended ID
    pub fn is_extended(&self) -> bool {
        match self {
            CanId::Extended(_) => true,
            CanId::Std(_) => false,
        }
    }
}

/// The maximum payload of a classic CAN frame
pub const MAX_DATA_LENGTH: usize = 8;

/// A single CAN frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanMessage {
    /// Payload buffer; only the first `dlc` bytes are valid
    pub data: [u8; MAX_DATA_LENGTH],
    /// Number of valid bytes in `data`
    pub dlc: u8,
    /// Remote transmission request flag
    pub rtr: bool,
    /// The frame identifier
    pub id: CanId,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            data: [0; MAX_DATA_LENGTH],
            dlc: 0,
            rtr: false,
            id: CanId::Std(0),
        }
    }
}

impl CanMessage {
    /// Create a new data frame
    ///
    /// Any data beyond [`MAX_DATA_LENGTH`] bytes is discarded.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(MAX_DATA_LENGTH);
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[0..dlc].copy_from_slice(&data[0..dlc]);

        Self {
            id,
            dlc: dlc as u8,
            rtr: false,
            data: buf,
        }
    }

    /// Create a new remote (request) frame with no payload
    pub fn new_rtr(id: CanId) -> Self {
        Self {
            id,
            rtr: true,
            ..Default::default()
        }
    }

    /// Get the frame identifier
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Get the valid portion of the payload
    pub fn data(&self) -> &[u8] {
        &self.data[0..self.dlc as usize]
    }

    /// Returns true for remote frames
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }
}

/// Bus level error reported by a CAN controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum CanError {
    /// A transmitted bit was not read back as expected
    Bit,
    /// Bit stuffing rule violated
    Stuff,
    /// A fixed-form field held an illegal value
    Form,
    /// A transmitted frame was not acknowledged
    Ack,
    /// CRC mismatch
    Crc,
    /// The controller went bus-off after too many errors
    BusOff,
    /// Any other error reported by the controller
    Other,
}

impl CanError {
    /// Convert a raw error code into a [`CanError`]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => CanError::Bit,
            2 => CanError::Stuff,
            3 => CanError::Form,
            4 => CanError::Ack,
            5 => CanError::Crc,
            6 => CanError::BusOff,
            _ => CanError::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_truncates_long_payload() {
        let msg = CanMessage::new(CanId::extended(0x1234), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(8, msg.dlc);
        assert_eq!(&[0, 1, 2, 3, 4, 5, 6, 7], msg.data());
    }

    #[test]
    fn test_rtr_frame() {
        let msg = CanMessage::new_rtr(CanId::extended(0x0202_1400));
        assert!(msg.is_rtr());
        assert!(msg.data().is_empty());
        assert!(msg.id().is_extended());
    }

    #[test]
    fn test_error_from_raw() {
        assert_eq!(CanError::Ack, CanError::from_raw(4));
        assert_eq!(CanError::Other, CanError::from_raw(42));
    }
}
