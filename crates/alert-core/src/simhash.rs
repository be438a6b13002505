//! Canonical 64-bit SimHash over whitespace-split, lower-cased tokens.
//!
//! Each token contributes an MD5-derived 128-bit value; bit position `i`
//! of the low 64 bits votes +1/-1 into the accumulator, and the final
//! fingerprint sets bit `i` iff the accumulator is positive.

const HASH_BITS: usize = 64;

/// Compute the 64-bit SimHash of `text`.
pub fn simhash64(text: &str) -> u64 {
    let mut accumulator = [0i32; HASH_BITS];

    for token in text.to_lowercase().split_whitespace() {
        let digest = md5::compute(token.as_bytes());
        let value = u128::from_be_bytes(digest.0);
        for (i, slot) in accumulator.iter_mut().enumerate() {
            if value & (1u128 << i) != 0 {
                *slot += 1;
            } else {
                *slot -= 1;
            }
        }
    }

    let mut fingerprint = 0u64;
    for (i, slot) in accumulator.iter().enumerate() {
        if *slot > 0 {
            fingerprint |= 1 << i;
        }
    }
    fingerprint
}

/// Number of differing bits between two fingerprints.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_identical_hash() {
        let a = simhash64("file encrypted by ransom");
        let b = simhash64("file encrypted by ransom");
        assert_eq!(a, b);
    }

    #[test]
    fn test_case_and_whitespace_normalised() {
        let a = simhash64("File   Encrypted\tBy Ransom");
        let b = simhash64("file encrypted by ransom");
        assert_eq!(a, b);
    }

    #[test]
    fn test_similar_text_close_hash() {
        let a = simhash64(
            "ransomware detected mass file encryption on share finance \
             with entropy spike and shadow copy deletion",
        );
        let b = simhash64(
            "ransomware detected mass file encryption on share finance \
             with entropy spike and shadow copy removal",
        );
        assert_eq!(hamming_distance(a, b), 3);
    }

    #[test]
    fn test_unrelated_text_far_hash() {
        let a = simhash64("file encrypted by ransom");
        let b = simhash64("routine backup completed successfully tonight");
        assert!(hamming_distance(a, b) > 3);
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(0b1010, 0b1010), 0);
        assert_eq!(hamming_distance(0b1010, 0b0101), 4);
        assert_eq!(hamming_distance(u64::MAX, 0), 64);
    }
}
