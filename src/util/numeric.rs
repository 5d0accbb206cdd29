//! Order-preserving byte encodings for numeric terms.
//!
//! The index compares terms as raw bytes. Flipping the sign bit and writing
//! big-endian makes byte order agree with numeric order, which is what
//! [`crate::lexical::query::Query::NumericRange`] relies on.

use crate::error::{Result, StrataError};

/// Encode an `i64` so lexicographic byte order equals numeric order.
pub fn encode_i64(value: i64) -> [u8; 8] {
    ((value as u64) ^ (1 << 63)).to_be_bytes()
}

/// Inverse of [`encode_i64`].
pub fn decode_i64(bytes: &[u8]) -> Result<i64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StrataError::invalid_argument("numeric term must be 8 bytes"))?;
    Ok((u64::from_be_bytes(array) ^ (1 << 63)) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_matches_numeric_order() {
        let values = [i64::MIN, -1000, -1, 0, 1, 9, 10, 399, i64::MAX];
        let encoded: Vec<[u8; 8]> = values.iter().map(|v| encode_i64(*v)).collect();
        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for (value, bytes) in values.iter().zip(encoded.iter()) {
            assert_eq!(decode_i64(bytes).unwrap(), *value);
        }
    }

    #[test]
    fn test_wrong_length() {
        assert!(decode_i64(&[1, 2, 3]).is_err());
    }
}
