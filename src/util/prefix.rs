//! Prefix-compressed encoding of sorted byte strings.
//!
//! Each entry is written as a single byte holding the length of the prefix
//! it shares with the previous entry (capped at 255), a varint suffix
//! length, and the suffix bytes. Decoding an entry needs nothing but the
//! previously decoded entry.

use crate::error::{Result, StrataError};
use crate::util::varint::{decode_u64, put_u64};

/// Longest shared prefix a single entry can reference.
pub const MAX_SHARED_PREFIX: usize = 255;

/// Length of the common prefix of two byte strings, capped at
/// [`MAX_SHARED_PREFIX`].
#[inline]
pub fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .zip(b.iter())
        .take(MAX_SHARED_PREFIX)
        .take_while(|(x, y)| x == y)
        .count()
}

/// Encoder carrying the previous entry between calls.
#[derive(Debug, Default, Clone)]
pub struct PrefixEncoder {
    previous: Vec<u8>,
}

impl PrefixEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `key` to `out`, sharing a prefix with the previous key.
    pub fn encode(&mut self, key: &[u8], out: &mut Vec<u8>) {
        let shared = shared_prefix_len(&self.previous, key);
        out.push(shared as u8);
        put_u64(out, (key.len() - shared) as u64);
        out.extend_from_slice(&key[shared..]);

        self.previous.clear();
        self.previous.extend_from_slice(key);
    }

    /// Forget the previous entry, e.g. at a block boundary.
    pub fn reset(&mut self) {
        self.previous.clear();
    }
}

/// Decoder rebuilding full keys from prefix-compressed entries.
#[derive(Debug, Default, Clone)]
pub struct PrefixDecoder {
    current: Vec<u8>,
}

impl PrefixDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one entry starting at `data[*pos]`, advancing `pos`.
    pub fn decode<'a>(&'a mut self, data: &[u8], pos: &mut usize) -> Result<&'a [u8]> {
        let shared = *data
            .get(*pos)
            .ok_or_else(|| StrataError::corrupt("Truncated prefix entry"))? as usize;
        *pos += 1;

        if shared > self.current.len() {
            return Err(StrataError::corrupt(format!(
                "Shared prefix {shared} exceeds previous entry length {}",
                self.current.len()
            )));
        }

        let (suffix_len, read) = decode_u64(&data[*pos..])?;
        *pos += read;

        let end = pos
            .checked_add(suffix_len as usize)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| StrataError::corrupt("Prefix entry suffix out of bounds"))?;

        self.current.truncate(shared);
        self.current.extend_from_slice(&data[*pos..end]);
        *pos = end;

        Ok(&self.current)
    }

    /// The most recently decoded entry.
    pub fn current(&self) -> &[u8] {
        &self.current
    }

    pub fn reset(&mut self) {
        self.current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(keys: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut encoder = PrefixEncoder::new();
        let mut buf = Vec::new();
        for key in keys {
            encoder.encode(key, &mut buf);
        }

        let mut decoder = PrefixDecoder::new();
        let mut pos = 0;
        let mut out = Vec::new();
        while pos < buf.len() {
            out.push(decoder.decode(&buf, &mut pos).unwrap().to_vec());
        }
        out
    }

    #[test]
    fn test_roundtrip_sorted_keys() {
        let keys: Vec<&[u8]> = vec![&b""[..], &b"alfa"[..], &b"alfalfa"[..], &b"alpha"[..], &b"bravo"[..], &b"bravo"[..]];
        let decoded = roundtrip(&keys);
        assert_eq!(decoded, keys.iter().map(|k| k.to_vec()).collect::<Vec<_>>());
    }

    #[test]
    fn test_shared_prefix_is_capped() {
        let long_a = vec![b'x'; 400];
        let mut long_b = long_a.clone();
        long_b.push(b'y');

        assert_eq!(shared_prefix_len(&long_a, &long_b), MAX_SHARED_PREFIX);

        let decoded = roundtrip(&[long_a.as_slice(), long_b.as_slice()]);
        assert_eq!(decoded[0], long_a);
        assert_eq!(decoded[1], long_b);
    }

    #[test]
    fn test_prefix_sharing_saves_space() {
        let mut encoder = PrefixEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(b"international", &mut buf);
        let first = buf.len();
        encoder.encode(b"internationalize", &mut buf);
        // shared byte + length byte + "ize"
        assert_eq!(buf.len() - first, 5);
    }

    #[test]
    fn test_corrupt_shared_length() {
        let mut decoder = PrefixDecoder::new();
        let mut pos = 0;
        let data = [3u8, 1, b'a'];
        assert!(decoder.decode(&data, &mut pos).unwrap_err().is_corruption());
    }

    #[test]
    fn test_truncated_suffix() {
        let mut decoder = PrefixDecoder::new();
        let mut pos = 0;
        let data = [0u8, 5, b'a'];
        assert!(decoder.decode(&data, &mut pos).is_err());
    }
}
