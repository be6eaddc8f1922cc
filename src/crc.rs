//! CRC-16/MODBUS checksum
//!
//! Table-free bitwise implementation: initial value 0xFFFF, reflected
//! polynomial 0xA001. The result goes on the wire low byte first.

use crate::constants::CRC_LEN;

/// Reflected form of the 0x8005 generator polynomial
const POLYNOMIAL: u16 = 0xA001;

/// Compute the Modbus RTU CRC of `data`.
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of `frame` to it, low byte first.
#[inline]
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// CRC carried in the last two bytes of `frame`, if it has any.
#[inline]
pub fn trailing_crc(frame: &[u8]) -> Option<u16> {
    if frame.len() < CRC_LEN {
        return None;
    }
    let tail = &frame[frame.len() - CRC_LEN..];
    Some(u16::from_le_bytes([tail[0], tail[1]]))
}

/// Check the trailing CRC of a complete RTU frame.
///
/// Frames with no payload ahead of the CRC are rejected.
#[inline]
pub fn verify_crc(frame: &[u8]) -> bool {
    if frame.len() <= CRC_LEN {
        return false;
    }
    let body = &frame[..frame.len() - CRC_LEN];
    trailing_crc(frame) == Some(crc16(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crc::{Crc, CRC_16_MODBUS};
    use proptest::prelude::*;

    const ORACLE: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

    #[test]
    fn test_reference_vectors() {
        // Check value of the CRC-16/MODBUS catalogue entry
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x1E, 0x00, 0x03]), 0xCD65);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_append_crc_low_byte_first() {
        let mut frame = vec![0x01, 0x03, 0x00, 0x1E, 0x00, 0x03];
        append_crc(&mut frame);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x1E, 0x00, 0x03, 0x65, 0xCD]);
    }

    #[test]
    fn test_verify_crc() {
        assert!(verify_crc(&[0x01, 0x03, 0x00, 0x1E, 0x00, 0x03, 0x65, 0xCD]));
        // Swapped CRC bytes
        assert!(!verify_crc(&[0x01, 0x03, 0x00, 0x1E, 0x00, 0x03, 0xCD, 0x65]));
        assert!(!verify_crc(&[0x65, 0xCD]));
        assert!(!verify_crc(&[]));
    }

    #[test]
    fn test_trailing_crc() {
        assert_eq!(trailing_crc(&[0x01, 0x21, 0x75]), Some(0x7521));
        assert_eq!(trailing_crc(&[0x01]), None);
    }

    proptest! {
        #[test]
        fn crc_matches_oracle(data in proptest::collection::vec(any::<u8>(), 0..300)) {
            prop_assert_eq!(crc16(&data), ORACLE.checksum(&data));
        }

        #[test]
        fn appended_crc_always_verifies(data in proptest::collection::vec(any::<u8>(), 1..256)) {
            let mut frame = data.clone();
            append_crc(&mut frame);
            prop_assert!(verify_crc(&frame));
        }

        #[test]
        fn single_bit_flip_is_detected(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut frame = data.clone();
            append_crc(&mut frame);
            let i = index.index(frame.len());
            frame[i] ^= 1 << bit;
            prop_assert!(!verify_crc(&frame));
        }
    }
}
