//! 8-bit ⇄ 7-bit nibble codec
//!
//! Bulk records are 8-bit data but MIDI data bytes only carry 7 bits, so each
//! byte travels as two values, low nibble first.

use super::error::FrameError;

/// Split every byte into `(low, high)` nibbles
pub fn nibblize(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    for &byte in data {
        out.push(byte & 0x0F);
        out.push((byte >> 4) & 0x0F);
    }
    out
}

/// Rebuild bytes from `(low, high)` nibble pairs
pub fn unnibblize(nibbles: &[u8]) -> Result<Vec<u8>, FrameError> {
    if nibbles.len() % 2 != 0 {
        return Err(FrameError::OddNibbleCount(nibbles.len()));
    }

    Ok(nibbles
        .chunks_exact(2)
        .map(|pair| {
            let lsn = pair[0] & 0x7F;
            let msn = pair[1] & 0x7F;
            (msn << 4) | (lsn & 0x0F)
        })
        .collect())
}

/// 7-bit XOR checksum over nibblized data followed by the flag bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ (b & 0x7F)) & 0x7F
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysex::BULK_FLAGS;
    use proptest::prelude::*;

    #[test]
    fn test_nibblize_low_nibble_first() {
        assert_eq!(nibblize(&[0xAB, 0x01]), vec![0x0B, 0x0A, 0x01, 0x00]);
        assert!(nibblize(&[]).is_empty());
    }

    #[test]
    fn test_unnibblize() {
        assert_eq!(unnibblize(&[0x0B, 0x0A, 0x0F, 0x0F]).unwrap(), vec![0xAB, 0xFF]);
    }

    #[test]
    fn test_unnibblize_odd_length() {
        assert_eq!(unnibblize(&[0x01, 0x02, 0x03]), Err(FrameError::OddNibbleCount(3)));
    }

    #[test]
    fn test_unnibblize_ignores_high_bits_of_low_nibble() {
        // Only the low nibble of the first value contributes
        assert_eq!(unnibblize(&[0x7F, 0x01]).unwrap(), vec![0x1F]);
    }

    #[test]
    fn test_checksum_reference() {
        let mut data = vec![0x01, 0x02, 0x03, 0x04];
        data.extend_from_slice(&BULK_FLAGS);
        assert_eq!(checksum(&data), 0x0D);
    }

    #[test]
    fn test_checksum_masks_to_seven_bits() {
        assert_eq!(checksum(&[0xFF]), 0x7F);
        assert_eq!(checksum(&[0x80, 0x01]), 0x01);
        assert_eq!(checksum(&[]), 0);
    }

    proptest! {
        #[test]
        fn prop_nibble_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let nibbles = nibblize(&data);
            prop_assert_eq!(nibbles.len(), data.len() * 2);
            prop_assert!(nibbles.iter().all(|&n| n <= 0x0F));
            prop_assert_eq!(unnibblize(&nibbles).unwrap(), data);
        }
    }
}
