//! Fixed-point payload encoding
//!
//! All multi-byte values are little-endian. The real valued formats are:
//!
//! | Format     | Encoding                                   | Width |
//! |------------|--------------------------------------------|-------|
//! | Percentage | `round(clamp(v, -1, 1) * 32767)`            | i16   |
//! | FXP8.8     | `round(v * 256)`                           | i16   |
//! | FXP16.16   | `round(v * 65536)`                         | i32   |
//!
//! Comparisons between a local value and one reported by a device should go through
//! [`fxp8_eq`] / [`fxp16_eq`] / [`percentage_eq`], which compare the encoded integers, since the
//! device only ever stores the quantized value.
use heapless::Vec;
use snafu::Snafu;

use crate::messages::MAX_DATA_LENGTH;

/// Errors from packing or unpacking a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum CodecError {
    /// The payload is shorter than the value being read from it
    #[snafu(display("Payload too short: need {needed} bytes, got {actual}"))]
    PayloadTooShort {
        /// Number of bytes required
        needed: usize,
        /// Number of bytes available
        actual: usize,
    },
    /// Writing the value would exceed the maximum frame payload
    #[snafu(display("Payload exceeds 8 bytes"))]
    PayloadOverflow,
}

const PERCENTAGE_SCALE: f64 = 32767.0;
const FXP8_SCALE: f64 = 256.0;
const FXP16_SCALE: f64 = 65536.0;

fn saturate_i16(v: f64) -> i16 {
    v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

fn saturate_i32(v: f64) -> i32 {
    v.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Encode a value in [-1, 1] as a percentage. Out of range values are clamped.
pub fn encode_percentage(value: f64) -> i16 {
    saturate_i16(value.clamp(-1.0, 1.0) * PERCENTAGE_SCALE)
}

/// Decode a percentage
pub fn decode_percentage(raw: i16) -> f64 {
    raw as f64 / PERCENTAGE_SCALE
}

/// Encode a value as signed 8.8 fixed point
pub fn encode_fxp8_8(value: f64) -> i16 {
    saturate_i16(value * FXP8_SCALE)
}

/// Decode a signed 8.8 fixed point value
pub fn decode_fxp8_8(raw: i16) -> f64 {
    raw as f64 / FXP8_SCALE
}

/// Encode a value as signed 16.16 fixed point
pub fn encode_fxp16_16(value: f64) -> i32 {
    saturate_i32(value * FXP16_SCALE)
}

/// Decode a signed 16.16 fixed point value
pub fn decode_fxp16_16(raw: i32) -> f64 {
    raw as f64 / FXP16_SCALE
}

/// True when both values quantize to the same percentage
pub fn percentage_eq(a: f64, b: f64) -> bool {
    encode_percentage(a) == encode_percentage(b)
}

/// True when both values quantize to the same 8.8 fixed point value
pub fn fxp8_eq(a: f64, b: f64) -> bool {
    encode_fxp8_8(a) == encode_fxp8_8(b)
}

/// True when both values quantize to the same 16.16 fixed point value
pub fn fxp16_eq(a: f64, b: f64) -> bool {
    encode_fxp16_16(a) == encode_fxp16_16(b)
}

fn take<const N: usize>(data: &[u8]) -> Result<[u8; N], CodecError> {
    if data.len() < N {
        return PayloadTooShortSnafu {
            needed: N,
            actual: data.len(),
        }
        .fail();
    }
    let mut buf = [0u8; N];
    buf.copy_from_slice(&data[0..N]);
    Ok(buf)
}

/// Read a u8 from the start of `data`
pub fn unpack_u8(data: &[u8]) -> Result<u8, CodecError> {
    Ok(take::<1>(data)?[0])
}

/// Read a little-endian i16 from the start of `data`
pub fn unpack_i16(data: &[u8]) -> Result<i16, CodecError> {
    Ok(i16::from_le_bytes(take(data)?))
}

/// Read a little-endian i32 from the start of `data`
pub fn unpack_i32(data: &[u8]) -> Result<i32, CodecError> {
    Ok(i32::from_le_bytes(take(data)?))
}

/// Read a percentage from the start of `data`
pub fn unpack_percentage(data: &[u8]) -> Result<f64, CodecError> {
    unpack_i16(data).map(decode_percentage)
}

/// Read an 8.8 fixed point value from the start of `data`
pub fn unpack_fxp8_8(data: &[u8]) -> Result<f64, CodecError> {
    unpack_i16(data).map(decode_fxp8_8)
}

/// Read a 16.16 fixed point value from the start of `data`
pub fn unpack_fxp16_16(data: &[u8]) -> Result<f64, CodecError> {
    unpack_i32(data).map(decode_fxp16_16)
}

/// A message payload of up to 8 bytes, built up field by field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(Vec<u8, MAX_DATA_LENGTH>);

impl Payload {
    /// Create an empty payload
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Create a payload from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self, CodecError> {
        let mut payload = Self::new();
        payload.push_bytes(data)?;
        Ok(payload)
    }

    /// Append raw bytes
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<&mut Self, CodecError> {
        self.0
            .extend_from_slice(data)
            .map_err(|_| CodecError::PayloadOverflow)?;
        Ok(self)
    }

    /// Append a single byte
    pub fn push_u8(&mut self, value: u8) -> Result<&mut Self, CodecError> {
        self.push_bytes(&[value])
    }

    /// Append a little-endian i16
    pub fn push_i16(&mut self, value: i16) -> Result<&mut Self, CodecError> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian i32
    pub fn push_i32(&mut self, value: i32) -> Result<&mut Self, CodecError> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Append a percentage
    pub fn push_percentage(&mut self, value: f64) -> Result<&mut Self, CodecError> {
        self.push_i16(encode_percentage(value))
    }

    /// Append an 8.8 fixed point value
    pub fn push_fxp8_8(&mut self, value: f64) -> Result<&mut Self, CodecError> {
        self.push_i16(encode_fxp8_8(value))
    }

    /// Append a 16.16 fixed point value
    pub fn push_fxp16_16(&mut self, value: f64) -> Result<&mut Self, CodecError> {
        self.push_i32(encode_fxp16_16(value))
    }

    /// The payload bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes in the payload
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload has no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::*;

    #[test]
    fn test_percentage() {
        assert_eq!(16384, encode_percentage(0.5));
        assert_eq!(32767, encode_percentage(1.0));
        assert_eq!(-32767, encode_percentage(-1.0));
        // clamped
        assert_eq!(32767, encode_percentage(3.0));
        assert_eq!(-32767, encode_percentage(-1.5));
        assert_eq!(0, encode_percentage(0.0));
    }

    #[test]
    fn test_fixed_point_values() {
        assert_eq!(0x0100, encode_fxp8_8(1.0));
        assert_eq!(-384, encode_fxp8_8(-1.5));
        assert_eq!(0x0001_0000, encode_fxp16_16(1.0));
        assert_eq!(0x0001_4000, encode_fxp16_16(1.25));
        assert_eq!(i16::MAX, encode_fxp8_8(1000.0));
    }

    #[test]
    fn test_decode_within_one_step() {
        for v in [-0.999, -0.3, 0.0, 0.123_456, 0.77, 1.0] {
            assert_in_delta!(v, decode_percentage(encode_percentage(v)), 1.0 / 32767.0);
        }
        for v in [-127.5, -3.3, 0.01, 12.0, 99.99] {
            assert_in_delta!(v, decode_fxp8_8(encode_fxp8_8(v)), 1.0 / 256.0);
        }
        for v in [-30000.1, -1.0e-3, 0.0, 3.14159, 1234.5678] {
            assert_in_delta!(v, decode_fxp16_16(encode_fxp16_16(v)), 1.0 / 65536.0);
        }
    }

    #[test]
    fn test_fixed_point_equality() {
        assert!(fxp16_eq(1.25, 1.25));
        // Below half a step both round to the same integer
        assert!(fxp16_eq(1.25, 1.25 + 0.4 / 65536.0));
        assert!(!fxp16_eq(1.25, 1.25 + 2.0 / 65536.0));
        assert!(fxp8_eq(12.0, 12.001));
        assert!(!fxp8_eq(12.0, 12.01));
        assert!(percentage_eq(0.5, 0.500_001));
        assert!(!percentage_eq(0.5, 0.51));
    }

    #[test]
    fn test_payload_building() {
        let mut payload = Payload::new();
        payload.push_percentage(0.5).unwrap().push_u8(3).unwrap();
        assert_eq!(&[0x00, 0x40, 0x03], payload.as_slice());

        let mut payload = Payload::new();
        payload.push_fxp16_16(-1.0).unwrap();
        assert_eq!(&[0x00, 0x00, 0xff, 0xff], payload.as_slice());

        let mut payload = Payload::from_slice(&[0; 6]).unwrap();
        assert_eq!(Err(CodecError::PayloadOverflow), payload.push_i32(1).map(|_| ()));
        assert_eq!(6, payload.len());
    }

    #[test]
    fn test_unpack() {
        assert_eq!(Ok(0x4000), unpack_i16(&[0x00, 0x40, 0xff]));
        assert_eq!(Ok(-2), unpack_i32(&[0xfe, 0xff, 0xff, 0xff]));
        assert_eq!(Ok(1.5), unpack_fxp8_8(&[0x80, 0x01]));
        assert_eq!(
            Err(CodecError::PayloadTooShort {
                needed: 4,
                actual: 2
            }),
            unpack_fxp16_16(&[0, 1])
        );
        assert_eq!(Ok(7), unpack_u8(&[7]));
        assert!(unpack_u8(&[]).is_err());
    }
}
