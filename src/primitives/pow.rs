//! Compact target decoding and proof-of-work checks

use super::Hash256;

/// Decoded compact target as a little-endian 256-bit number
///
/// `None` for negative, zero or overflowing encodings.
pub fn target_from_compact(bits: u32) -> Option<[u8; 32]> {
    let exponent = (bits >> 24) as i32;
    let mantissa = bits & 0x007f_ffff;
    let negative = bits & 0x0080_0000 != 0;

    if mantissa == 0 || negative {
        return None;
    }
    let overflow = exponent > 34
        || (mantissa > 0xff && exponent > 33)
        || (mantissa > 0xffff && exponent > 32);
    if overflow {
        return None;
    }

    let mut target = [0u8; 32];
    for i in 0..3 {
        let byte = ((mantissa >> (8 * i)) & 0xff) as u8;
        let pos = i + exponent - 3;
        if (0..32).contains(&pos) {
            target[pos as usize] = byte;
        }
    }
    if target.iter().all(|b| *b == 0) {
        return None;
    }
    Some(target)
}

fn le_cmp(a: &[u8; 32], b: &[u8; 32]) -> std::cmp::Ordering {
    a.iter().rev().cmp(b.iter().rev())
}

/// Check that `hash` satisfies `bits` and that `bits` does not exceed `pow_limit_bits`
pub fn check_proof_of_work(hash: &Hash256, bits: u32, pow_limit_bits: u32) -> bool {
    let (Some(target), Some(limit)) = (
        target_from_compact(bits),
        target_from_compact(pow_limit_bits),
    ) else {
        return false;
    };
    if le_cmp(&target, &limit).is_gt() {
        return false;
    }
    le_cmp(hash.as_bytes(), &target).is_le()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_compact_encodings() {
        assert!(target_from_compact(0).is_none());
        assert!(target_from_compact(0x0180_0000 | 0x01).is_none()); // negative
        assert!(target_from_compact(0xff12_3456).is_none()); // overflow
    }

    #[test]
    fn test_regtest_limit_accepts_low_hash() {
        let mut low = [0u8; 32];
        low[31] = 0x10; // most significant byte
        assert!(check_proof_of_work(&Hash256(low), 0x207fffff, 0x207fffff));

        let mut high = [0u8; 32];
        high[31] = 0x80;
        assert!(!check_proof_of_work(&Hash256(high), 0x207fffff, 0x207fffff));
    }

    #[test]
    fn test_bits_above_limit_rejected() {
        // Regtest difficulty on a mainnet limit
        assert!(!check_proof_of_work(&Hash256::ZERO, 0x207fffff, 0x1d00ffff));
    }

    #[test]
    fn test_mainnet_genesis_target() {
        let target = target_from_compact(0x1d00ffff).unwrap();
        // 0x00000000ffff0000...: bytes 26 and 27 (little-endian) hold 0xffff
        assert_eq!(target[27], 0xff);
        assert_eq!(target[26], 0xff);
        assert!(target[28..].iter().all(|b| *b == 0));
    }
}
