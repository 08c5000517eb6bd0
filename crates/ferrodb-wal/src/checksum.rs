//! The log's bespoke 32-bit signed-overflow polynomial hash (§4.2).
//!
//! `h <- 0; for b in bytes: h <- h*SEED + (b as signed)`. Every byte is
//! reinterpreted as a signed `i8` before folding it in, and the
//! multiply/add happen in wrapping 32-bit signed arithmetic. Both the
//! per-record checksum and the whole-file checksum use this same fold —
//! the file checksum just folds in each record's checksum instead of raw
//! bytes.

/// Multiplier used by the log's rolling checksum.
pub const SEED: i32 = 13331;

/// Fold a single value into a running checksum, wrapping on overflow.
#[inline]
#[must_use]
pub const fn fold(running: i32, value: i32) -> i32 {
    running.wrapping_mul(SEED).wrapping_add(value)
}

/// Checksum of a record's raw payload bytes.
#[must_use]
pub fn record_checksum(bytes: &[u8]) -> i32 {
    let mut h: i32 = 0;
    for &b in bytes {
        h = fold(h, i32::from(b as i8));
    }
    h
}

/// Accumulate a record checksum into the whole-file checksum.
///
/// The original source computes this ambiguously (reassignment vs.
/// accumulation) in its tail-check path; the canonical behavior, consistent
/// with the writer's update routine, is accumulation.
#[inline]
#[must_use]
pub const fn accumulate_file_checksum(file_checksum: i32, record_checksum: i32) -> i32 {
    fold(file_checksum, record_checksum)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn record_checksum_matches_fold_over_signed_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            let mut expected: i32 = 0;
            for &b in &bytes {
                expected = fold(expected, i32::from(b as i8));
            }
            prop_assert_eq!(record_checksum(&bytes), expected);
        }

        #[test]
        fn record_checksum_never_panics_on_any_length(bytes in prop::collection::vec(any::<u8>(), 0..8192)) {
            let _ = record_checksum(&bytes);
        }

        #[test]
        fn accumulate_is_fold_of_running_and_record(running in any::<i32>(), record in any::<i32>()) {
            prop_assert_eq!(accumulate_file_checksum(running, record), fold(running, record));
        }
    }

    #[test]
    fn empty_bytes_checksum_to_zero() {
        assert_eq!(record_checksum(&[]), 0);
    }

    #[test]
    fn matches_hand_computed_fold() {
        let bytes = [1u8, 2, 3];
        let mut expected: i32 = 0;
        expected = expected.wrapping_mul(SEED).wrapping_add(1);
        expected = expected.wrapping_mul(SEED).wrapping_add(2);
        expected = expected.wrapping_mul(SEED).wrapping_add(3);
        assert_eq!(record_checksum(&bytes), expected);
    }

    #[test]
    fn high_bit_bytes_fold_as_negative() {
        // 0xFF as i8 is -1, not 255.
        let with_high_bit = record_checksum(&[0xFF]);
        let as_negative_one = fold(0, -1);
        assert_eq!(with_high_bit, as_negative_one);
    }

    #[test]
    fn overflow_wraps_instead_of_panicking() {
        // A long run of 0xFF bytes would overflow a naive i32 multiply/add;
        // wrapping semantics must hold bit-for-bit.
        let bytes = vec![0xFFu8; 10_000];
        let mut expected: i32 = 0;
        for &b in &bytes {
            expected = fold(expected, i32::from(b as i8));
        }
        assert_eq!(record_checksum(&bytes), expected);
    }

    #[test]
    fn file_checksum_accumulates_record_checksums() {
        let r1 = record_checksum(b"hello");
        let r2 = record_checksum(b"world");
        let mut file_chk = 0i32;
        file_chk = accumulate_file_checksum(file_chk, r1);
        file_chk = accumulate_file_checksum(file_chk, r2);
        let expected = fold(fold(0, r1), r2);
        assert_eq!(file_chk, expected);
    }
}
