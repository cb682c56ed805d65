//! Cache of the periodic telemetry messages sent by a controller
use lmcan_common::codec::{self, CodecError};

use crate::control_mode::{Faults, Limits};

/// The latest decoded values of the three periodic status groups
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Bus voltage, in volts
    pub bus_voltage: f64,
    /// Output voltage, in volts
    pub output_voltage: f64,
    /// Output current, in amps
    pub output_current: f64,
    /// Temperature, in degrees Celsius
    pub temperature: f64,
    /// Position, in rotations
    pub position: f64,
    /// Speed, in rotations per minute
    pub speed: f64,
    /// Limit state
    pub limits: Limits,
    /// Active faults
    pub faults: Faults,
    received: [bool; 3],
}

impl StatusSnapshot {
    /// Create an empty snapshot with no groups received
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode group 0: bus voltage, output percent, current, temperature
    pub fn update_group0(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let bus_voltage = codec::unpack_fxp8_8(field(data, 0, 2)?)?;
        let output_percent = codec::unpack_percentage(field(data, 2, 2)?)?;
        let output_current = codec::unpack_fxp8_8(field(data, 4, 2)?)?;
        let temperature = codec::unpack_fxp8_8(field(data, 6, 2)?)?;
        self.bus_voltage = bus_voltage;
        self.output_voltage = output_percent * bus_voltage;
        self.output_current = output_current;
        self.temperature = temperature;
        self.received[0] = true;
        Ok(())
    }

    /// Decode group 1: position, speed
    pub fn update_group1(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let position = codec::unpack_fxp16_16(field(data, 0, 4)?)?;
        let speed = codec::unpack_fxp16_16(field(data, 4, 4)?)?;
        self.position = position;
        self.speed = speed;
        self.received[1] = true;
        Ok(())
    }

    /// Decode group 2: limits, faults
    pub fn update_group2(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let limits = codec::unpack_u8(field(data, 0, 1)?)?;
        let faults = codec::unpack_u8(field(data, 1, 1)?)?;
        self.limits = Limits::from_bits_retain(limits);
        self.faults = Faults::from_bits_truncate(faults);
        self.received[2] = true;
        Ok(())
    }

    /// Decode a message of status group `group` (0..=2)
    ///
    /// A payload that cannot be decoded leaves the cached values unchanged and marks the group as
    /// not received.
    pub fn update(&mut self, group: usize, data: &[u8]) -> Result<(), CodecError> {
        let result = match group {
            0 => self.update_group0(data),
            1 => self.update_group1(data),
            2 => self.update_group2(data),
            _ => return Ok(()),
        };
        if result.is_err() {
            self.received[group] = false;
        }
        result
    }

    /// Returns true once the given group (0..=2) has been decoded
    pub fn received(&self, group: usize) -> bool {
        self.received.get(group).copied().unwrap_or(false)
    }

    /// Returns true once every group has been decoded
    pub fn all_received(&self) -> bool {
        self.received.iter().all(|r| *r)
    }

    /// Forget that any group has been received
    ///
    /// The cached values are kept.
    pub fn clear_received(&mut self) {
        self.received = [false; 3];
    }
}

fn field(data: &[u8], offset: usize, len: usize) -> Result<&[u8], CodecError> {
    data.get(offset..offset + len)
        .ok_or(CodecError::PayloadTooShort {
            needed: offset + len,
            actual: data.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::*;

    #[test]
    fn test_group0() {
        let mut status = StatusSnapshot::new();
        assert!(!status.received(0));
        // 12V bus, 50% output, 1.5A, 30.5C
        let data = [0x00, 0x0c, 0x00, 0x40, 0x80, 0x01, 0x80, 0x1e];
        status.update_group0(&data).unwrap();
        assert_eq!(12.0, status.bus_voltage);
        assert_in_delta!(6.0, status.output_voltage, 0.001);
        assert_eq!(1.5, status.output_current);
        assert_eq!(30.5, status.temperature);
        assert!(status.received(0));
        assert!(!status.all_received());
    }

    #[test]
    fn test_group1_and_2() {
        let mut status = StatusSnapshot::new();
        let mut data = [0u8; 8];
        data[0..4].copy_from_slice(&(-2 * 65536i32).to_le_bytes());
        data[4..8].copy_from_slice(&(100 * 65536i32 + 32768).to_le_bytes());
        status.update_group1(&data).unwrap();
        assert_eq!(-2.0, status.position);
        assert_eq!(100.5, status.speed);

        status.update_group2(&[0x01, 0x02, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(Limits::FORWARD, status.limits);
        assert_eq!(Faults::TEMPERATURE, status.faults);
        assert!(status.all_received());

        status.clear_received();
        assert!(!status.received(1));
        assert_eq!(100.5, status.speed);
    }

    #[test]
    fn test_short_payload_is_rejected() {
        let mut status = StatusSnapshot::new();
        assert!(status.update_group0(&[0, 1, 2]).is_err());
        assert!(!status.received(0));
        assert!(!status.received(7));
    }

    #[test]
    fn test_malformed_group_is_forgotten() {
        let mut status = StatusSnapshot::new();
        status.update(2, &[0x03, 0x00]).unwrap();
        assert!(status.received(2));

        assert!(status.update(2, &[0x01]).is_err());
        assert!(!status.received(2));
        // The last good values are kept
        assert_eq!(Limits::FORWARD | Limits::REVERSE, status.limits);
        assert!(status.update(5, &[]).is_ok());
    }
}
