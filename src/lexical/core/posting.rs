//! Postings list codec and the posting matcher.
//!
//! A term that occurs in a single document keeps its posting inline in the
//! dictionary. Longer lists are written to the segment's `.pst` file as a
//! skip table followed by fixed-size blocks:
//!
//! ```text
//! block_count                          varint
//! skip table, per block:
//!     last doc id (delta to previous)  varint
//!     block byte length                varint
//! blocks, each:
//!     crc32 of body                    u32
//!     body:
//!         count                        varint
//!         doc id deltas                varint * count
//!         weights   (weighted formats) flag u8, then f32 * count unless all 1.0
//!         positions (positional)       per posting: count, in-document deltas
//!         values    (payload formats)  per posting: len + 1 (0 = none), bytes
//! ```
//!
//! [`PostingMatcher::skip_to`] binary-searches the skip table and decodes
//! only the block that can contain the target.

use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::schema::PostingFormat;
use crate::storage::structured::SliceReader;
use crate::util::varint::{put_u32, put_u64};

/// Default number of postings per block.
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Local document id within a segment.
pub type DocId = u32;

/// One (document, weight, value, positions) entry of a term.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub doc_id: DocId,
    pub weight: f32,
    pub value: Option<Vec<u8>>,
    pub positions: Option<Vec<u32>>,
}

impl Posting {
    pub fn new(doc_id: DocId) -> Self {
        Posting {
            doc_id,
            weight: 1.0,
            value: None,
            positions: None,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_positions(mut self, positions: Vec<u32>) -> Self {
        self.positions = Some(positions);
        self
    }

    pub fn with_value(mut self, value: Vec<u8>) -> Self {
        self.value = Some(value);
        self
    }

    /// Reshape the posting to what `format` records.
    pub fn conform(mut self, format: PostingFormat) -> Self {
        if !format.has_weights() {
            self.weight = 1.0;
        }
        if format.has_positions() {
            self.positions.get_or_insert_with(Vec::new);
        } else {
            self.positions = None;
        }
        if !format.has_values() {
            self.value = None;
        }
        self
    }
}

fn put_positions(buf: &mut Vec<u8>, positions: &[u32]) {
    put_u32(buf, positions.len() as u32);
    let mut previous = 0u32;
    for &position in positions {
        put_u32(buf, position.wrapping_sub(previous));
        previous = position;
    }
}

fn read_positions(reader: &mut SliceReader<'_>, out: &mut Vec<u32>) -> Result<()> {
    let count = reader.read_varint_u32()?;
    let mut previous = 0u32;
    for _ in 0..count {
        previous = previous.wrapping_add(reader.read_varint_u32()?);
        out.push(previous);
    }
    Ok(())
}

fn put_value(buf: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            put_u64(buf, bytes.len() as u64 + 1);
            buf.extend_from_slice(bytes);
        }
        None => put_u64(buf, 0),
    }
}

fn read_value(reader: &mut SliceReader<'_>) -> Result<Option<Vec<u8>>> {
    match reader.read_varint()? {
        0 => Ok(None),
        len => Ok(Some(reader.read_raw(len as usize - 1)?.to_vec())),
    }
}

/// Encode a posting kept inline in the dictionary. Every part is written,
/// independent of the field's format.
pub(crate) fn encode_inline(posting: &Posting, buf: &mut Vec<u8>) {
    let mut flags = 0u8;
    if posting.positions.is_some() {
        flags |= 1;
    }
    if posting.value.is_some() {
        flags |= 2;
    }
    buf.push(flags);
    put_u32(buf, posting.doc_id);
    buf.extend_from_slice(&posting.weight.to_le_bytes());
    if let Some(positions) = &posting.positions {
        put_positions(buf, positions);
    }
    if let Some(value) = &posting.value {
        put_u64(buf, value.len() as u64);
        buf.extend_from_slice(value);
    }
}

pub(crate) fn decode_inline(reader: &mut SliceReader<'_>) -> Result<Posting> {
    let flags = reader.read_u8()?;
    let doc_id = reader.read_varint_u32()?;
    let weight = reader.read_f32()?;
    let positions = if flags & 1 != 0 {
        let mut positions = Vec::new();
        read_positions(reader, &mut positions)?;
        Some(positions)
    } else {
        None
    };
    let value = if flags & 2 != 0 {
        Some(reader.read_bytes()?.to_vec())
    } else {
        None
    };
    Ok(Posting {
        doc_id,
        weight,
        value,
        positions,
    })
}

/// Encode a postings list (ascending by doc id, at least one posting).
pub fn encode_postings(format: PostingFormat, postings: &[Posting], block_size: usize) -> Result<Vec<u8>> {
    if postings.is_empty() {
        return Err(StrataError::invalid_argument("cannot encode an empty postings list"));
    }
    if block_size == 0 {
        return Err(StrataError::invalid_argument("posting block size must be positive"));
    }
    for pair in postings.windows(2) {
        if pair[1].doc_id <= pair[0].doc_id {
            return Err(StrataError::invalid_argument(format!(
                "postings out of order: {} after {}",
                pair[1].doc_id, pair[0].doc_id
            )));
        }
    }

    let mut blocks = Vec::new();
    let mut skip = Vec::new();
    let mut previous_last: Option<DocId> = None;
    let mut body = Vec::new();

    for chunk in postings.chunks(block_size) {
        body.clear();
        put_u32(&mut body, chunk.len() as u32);

        let mut previous = previous_last.unwrap_or(0);
        for posting in chunk {
            put_u32(&mut body, posting.doc_id - previous);
            previous = posting.doc_id;
        }

        if format.has_weights() {
            if chunk.iter().all(|p| p.weight == 1.0) {
                body.push(1);
            } else {
                body.push(0);
                for posting in chunk {
                    body.extend_from_slice(&posting.weight.to_le_bytes());
                }
            }
        }

        if format.has_positions() {
            for posting in chunk {
                put_positions(&mut body, posting.positions.as_deref().unwrap_or(&[]));
            }
        }

        if format.has_values() {
            for posting in chunk {
                put_value(&mut body, posting.value.as_deref());
            }
        }

        let last = chunk[chunk.len() - 1].doc_id;
        put_u32(&mut skip, last - previous_last.unwrap_or(0));
        put_u64(&mut skip, body.len() as u64 + 4);
        previous_last = Some(last);

        blocks.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        blocks.extend_from_slice(&body);
    }

    let block_count = postings.len().div_ceil(block_size);
    let mut out = Vec::with_capacity(skip.len() + blocks.len() + 5);
    put_u64(&mut out, block_count as u64);
    out.extend_from_slice(&skip);
    out.extend_from_slice(&blocks);
    Ok(out)
}

/// Decode a whole postings list written by [`encode_postings`].
pub fn decode_postings(format: PostingFormat, data: &[u8]) -> Result<Vec<Posting>> {
    let mut matcher = PostingMatcher::from_blocks(Arc::from(data), 0, data.len(), format, 0)?;
    let mut postings = Vec::new();
    while matcher.is_active() {
        postings.push(matcher.posting()?);
        matcher.next()?;
    }
    Ok(postings)
}

#[derive(Debug, Clone, Copy)]
struct SkipEntry {
    last_doc: DocId,
    offset: usize,
    len: usize,
}

#[derive(Debug, Default)]
struct DecodedBlock {
    docs: Vec<DocId>,
    weights: Vec<f32>,
    positions: Vec<u32>,
    position_ends: Vec<usize>,
    values: Vec<Option<Vec<u8>>>,
}

#[derive(Debug)]
enum Source {
    Inline(Posting),
    Blocks {
        data: Arc<[u8]>,
        skip: Vec<SkipEntry>,
    },
}

/// Forward-only cursor over one term's postings in one segment.
#[derive(Debug)]
pub struct PostingMatcher {
    source: Source,
    format: PostingFormat,
    doc_frequency: u32,
    block_index: usize,
    block: DecodedBlock,
    pos: usize,
    active: bool,
}

impl PostingMatcher {
    /// Matcher over a single inline posting.
    pub fn inline(posting: Posting, format: PostingFormat) -> Self {
        PostingMatcher {
            source: Source::Inline(posting),
            format,
            doc_frequency: 1,
            block_index: 0,
            block: DecodedBlock::default(),
            pos: 0,
            active: true,
        }
    }

    /// Matcher over a block-encoded list stored at `data[offset..offset + len]`.
    pub fn from_blocks(
        data: Arc<[u8]>,
        offset: usize,
        len: usize,
        format: PostingFormat,
        doc_frequency: u32,
    ) -> Result<Self> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| StrataError::corrupt("postings pointer out of bounds"))?;

        let skip = {
            let mut reader = SliceReader::at(&data[..end], offset)?;
            let block_count = reader.read_varint()? as usize;
            if block_count == 0 {
                return Err(StrataError::corrupt("postings list without blocks"));
            }
            let mut entries = Vec::with_capacity(block_count);
            let mut last_doc = 0u32;
            let mut lens = Vec::with_capacity(block_count);
            for i in 0..block_count {
                let delta = reader.read_varint_u32()?;
                last_doc = if i == 0 { delta } else { last_doc.wrapping_add(delta) };
                lens.push((last_doc, reader.read_varint()? as usize));
            }
            let mut block_offset = reader.position();
            for (last_doc, len) in lens {
                entries.push(SkipEntry {
                    last_doc,
                    offset: block_offset,
                    len,
                });
                block_offset += len;
            }
            if block_offset != end {
                return Err(StrataError::corrupt("postings blocks do not fill their range"));
            }
            entries
        };

        let mut matcher = PostingMatcher {
            source: Source::Blocks { data, skip },
            format,
            doc_frequency,
            block_index: 0,
            block: DecodedBlock::default(),
            pos: 0,
            active: true,
        };
        matcher.load_block(0)?;
        Ok(matcher)
    }

    fn load_block(&mut self, index: usize) -> Result<()> {
        let Source::Blocks { data, skip } = &self.source else {
            return Ok(());
        };
        let entry = skip[index];
        let base = if index == 0 { 0 } else { skip[index - 1].last_doc };

        let raw = &data[entry.offset..entry.offset + entry.len];
        if raw.len() < 4 {
            return Err(StrataError::corrupt("postings block too short"));
        }
        let (crc, body) = raw.split_at(4);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if crc32fast::hash(body) != stored {
            return Err(StrataError::corrupt(format!("postings block {index} checksum mismatch")));
        }

        let block = &mut self.block;
        block.docs.clear();
        block.weights.clear();
        block.positions.clear();
        block.position_ends.clear();
        block.values.clear();

        let mut reader = SliceReader::new(body);
        let count = reader.read_varint_u32()? as usize;
        if count == 0 {
            return Err(StrataError::corrupt("empty postings block"));
        }

        let mut doc = base;
        for _ in 0..count {
            doc = doc
                .checked_add(reader.read_varint_u32()?)
                .ok_or_else(|| StrataError::corrupt("doc id overflow in postings block"))?;
            block.docs.push(doc);
        }
        if doc != entry.last_doc {
            return Err(StrataError::corrupt("postings block disagrees with skip table"));
        }

        if self.format.has_weights() {
            if reader.read_u8()? == 1 {
                block.weights.resize(count, 1.0);
            } else {
                for _ in 0..count {
                    block.weights.push(reader.read_f32()?);
                }
            }
        } else {
            block.weights.resize(count, 1.0);
        }

        if self.format.has_positions() {
            for _ in 0..count {
                read_positions(&mut reader, &mut block.positions)?;
                block.position_ends.push(block.positions.len());
            }
        }

        if self.format.has_values() {
            for _ in 0..count {
                block.values.push(read_value(&mut reader)?);
            }
        }

        self.block_index = index;
        self.pos = 0;
        Ok(())
    }

    fn check_active(&self, op: &str) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(StrataError::invalid_state(format!(
                "{op}() called on an exhausted posting matcher"
            )))
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn format(&self) -> PostingFormat {
        self.format
    }

    /// Number of documents in the list (as recorded in the dictionary).
    pub fn doc_frequency(&self) -> u32 {
        self.doc_frequency
    }

    /// Current document id, or `None` once exhausted.
    #[inline]
    pub fn current(&self) -> Option<DocId> {
        if !self.active {
            return None;
        }
        match &self.source {
            Source::Inline(posting) => Some(posting.doc_id),
            Source::Blocks { .. } => Some(self.block.docs[self.pos]),
        }
    }

    /// Current document id.
    pub fn id(&self) -> Result<DocId> {
        self.check_active("id")?;
        self.current()
            .ok_or_else(|| StrataError::invalid_state("posting matcher has no current id"))
    }

    /// Advance to the next document.
    pub fn next(&mut self) -> Result<()> {
        self.check_active("next")?;
        match &self.source {
            Source::Inline(_) => self.active = false,
            Source::Blocks { skip, .. } => {
                self.pos += 1;
                if self.pos >= self.block.docs.len() {
                    let next_block = self.block_index + 1;
                    if next_block >= skip.len() {
                        self.active = false;
                    } else {
                        self.load_block(next_block)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Advance to the first document `>= target`. Exhausting the list is not
    /// an error; calling this on an inactive matcher does nothing.
    pub fn skip_to(&mut self, target: DocId) -> Result<()> {
        let Some(current) = self.current() else {
            return Ok(());
        };
        if current >= target {
            return Ok(());
        }

        match &self.source {
            Source::Inline(_) => {
                self.active = false;
            }
            Source::Blocks { skip, .. } => {
                if skip[self.block_index].last_doc < target {
                    let rest = &skip[self.block_index + 1..];
                    let found = rest.partition_point(|entry| entry.last_doc < target);
                    if found == rest.len() {
                        self.active = false;
                        return Ok(());
                    }
                    let index = self.block_index + 1 + found;
                    self.load_block(index)?;
                }
                let docs = &self.block.docs[self.pos..];
                self.pos += docs.partition_point(|doc| *doc < target);
            }
        }
        Ok(())
    }

    /// Weight of the current posting.
    pub fn weight(&self) -> Result<f32> {
        self.check_active("weight")?;
        Ok(match &self.source {
            Source::Inline(posting) => posting.weight,
            Source::Blocks { .. } => self.block.weights[self.pos],
        })
    }

    /// Value (payload) of the current posting.
    pub fn value(&self) -> Result<Option<&[u8]>> {
        self.check_active("value")?;
        Ok(match &self.source {
            Source::Inline(posting) => posting.value.as_deref(),
            Source::Blocks { .. } => {
                if self.format.has_values() {
                    self.block.values[self.pos].as_deref()
                } else {
                    None
                }
            }
        })
    }

    /// Positions of the current posting; empty for non-positional formats.
    pub fn positions(&self) -> Result<&[u32]> {
        self.check_active("positions")?;
        Ok(match &self.source {
            Source::Inline(posting) => posting.positions.as_deref().unwrap_or(&[]),
            Source::Blocks { .. } => {
                if self.format.has_positions() {
                    let start = if self.pos == 0 {
                        0
                    } else {
                        self.block.position_ends[self.pos - 1]
                    };
                    &self.block.positions[start..self.block.position_ends[self.pos]]
                } else {
                    &[]
                }
            }
        })
    }

    /// The current posting as an owned value.
    pub fn posting(&self) -> Result<Posting> {
        let posting = Posting {
            doc_id: self.id()?,
            weight: self.weight()?,
            value: self.value()?.map(|v| v.to_vec()),
            positions: if self.format.has_positions() {
                Some(self.positions()?.to_vec())
            } else {
                None
            },
        };
        Ok(match &self.source {
            Source::Inline(original) => Posting {
                positions: original.positions.clone(),
                ..posting
            },
            Source::Blocks { .. } => posting,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn open(format: PostingFormat, postings: &[Posting], block_size: usize) -> PostingMatcher {
        let data = encode_postings(format, postings, block_size).unwrap();
        let len = data.len();
        PostingMatcher::from_blocks(Arc::from(data), 0, len, format, postings.len() as u32).unwrap()
    }

    fn random_postings(rng: &mut StdRng, count: usize, format: PostingFormat) -> Vec<Posting> {
        let mut doc = 0u32;
        (0..count)
            .map(|i| {
                doc += if i == 0 { rng.random_range(0..3) } else { rng.random_range(1..20) };
                let mut posting = Posting::new(doc).with_weight(rng.random_range(1..5) as f32 * 0.5);
                let mut position = 0;
                let positions = (0..rng.random_range(1..4))
                    .map(|_| {
                        position += rng.random_range(0..10);
                        position
                    })
                    .collect();
                posting = posting.with_positions(positions);
                if rng.random_bool(0.5) {
                    posting = posting.with_value(vec![rng.random(), rng.random()]);
                }
                posting.conform(format)
            })
            .collect()
    }

    #[test]
    fn test_roundtrip_every_format() {
        let mut rng = StdRng::seed_from_u64(17);
        for format in [
            PostingFormat::Existence,
            PostingFormat::Frequency,
            PostingFormat::Positions,
            PostingFormat::PositionsWithPayload,
        ] {
            for count in [1, 2, 127, 128, 129, 600] {
                let postings = random_postings(&mut rng, count, format);
                let data = encode_postings(format, &postings, DEFAULT_BLOCK_SIZE).unwrap();
                assert_eq!(decode_postings(format, &data).unwrap(), postings, "{format:?} x {count}");
            }
        }
    }

    #[test]
    fn test_skip_to_never_goes_backwards() {
        let postings: Vec<Posting> = (0..1000).map(|i| Posting::new(i * 3)).collect();
        let mut matcher = open(PostingFormat::Existence, &postings, 16);

        matcher.skip_to(10).unwrap();
        assert_eq!(matcher.id().unwrap(), 12);
        matcher.skip_to(5).unwrap();
        assert_eq!(matcher.id().unwrap(), 12);
        matcher.skip_to(2000).unwrap();
        assert_eq!(matcher.id().unwrap(), 2001);
        matcher.skip_to(2001).unwrap();
        assert_eq!(matcher.id().unwrap(), 2001);
        matcher.next().unwrap();
        assert_eq!(matcher.id().unwrap(), 2004);

        matcher.skip_to(2997).unwrap();
        assert_eq!(matcher.id().unwrap(), 2997);
        matcher.skip_to(2998).unwrap();
        assert!(!matcher.is_active());
        // No-op once inactive.
        matcher.skip_to(3).unwrap();
        assert!(!matcher.is_active());
    }

    #[test]
    fn test_inactive_access_is_an_error() {
        let mut matcher = PostingMatcher::inline(Posting::new(4).with_weight(2.0), PostingFormat::Frequency);
        assert_eq!(matcher.id().unwrap(), 4);
        assert_eq!(matcher.weight().unwrap(), 2.0);
        matcher.next().unwrap();

        assert!(!matcher.is_active());
        assert!(matches!(matcher.id(), Err(StrataError::InvalidState(_))));
        assert!(matches!(matcher.weight(), Err(StrataError::InvalidState(_))));
        assert!(matches!(matcher.value(), Err(StrataError::InvalidState(_))));
        assert!(matches!(matcher.positions(), Err(StrataError::InvalidState(_))));
        assert!(matches!(matcher.next(), Err(StrataError::InvalidState(_))));
    }

    #[test]
    fn test_inline_skip_past() {
        let mut matcher = PostingMatcher::inline(Posting::new(4), PostingFormat::Existence);
        matcher.skip_to(4).unwrap();
        assert!(matcher.is_active());
        matcher.skip_to(5).unwrap();
        assert!(!matcher.is_active());
    }

    #[test]
    fn test_inline_roundtrip() {
        let posting = Posting::new(42)
            .with_weight(1.5)
            .with_positions(vec![1, 5, 9])
            .with_value(b"\x01\x02".to_vec());
        let mut buf = Vec::new();
        encode_inline(&posting, &mut buf);
        let decoded = decode_inline(&mut SliceReader::new(&buf)).unwrap();
        assert_eq!(decoded, posting);
    }

    #[test]
    fn test_positions_and_values_accessors() {
        let postings = vec![
            Posting::new(1).with_weight(2.0).with_positions(vec![0, 4]).with_value(b"a".to_vec()),
            Posting::new(7).with_positions(vec![3]),
        ];
        let mut matcher = open(PostingFormat::PositionsWithPayload, &postings, 1);
        assert_eq!(matcher.positions().unwrap(), &[0, 4]);
        assert_eq!(matcher.value().unwrap(), Some(&b"a"[..]));
        matcher.next().unwrap();
        assert_eq!(matcher.id().unwrap(), 7);
        assert_eq!(matcher.positions().unwrap(), &[3]);
        assert_eq!(matcher.value().unwrap(), None);
        assert_eq!(matcher.weight().unwrap(), 1.0);
    }

    #[test]
    fn test_encode_rejects_bad_input() {
        assert!(encode_postings(PostingFormat::Existence, &[], 8).is_err());
        let unsorted = vec![Posting::new(5), Posting::new(5)];
        assert!(encode_postings(PostingFormat::Existence, &unsorted, 8).is_err());
    }

    #[test]
    fn test_corrupt_block_detected() {
        let postings: Vec<Posting> = (0..40).map(|i| Posting::new(i).with_weight(i as f32)).collect();
        let mut data = encode_postings(PostingFormat::Frequency, &postings, 8).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x10;
        let len = data.len();
        let data: Arc<[u8]> = Arc::from(data);

        let mut matcher = PostingMatcher::from_blocks(data, 0, len, PostingFormat::Frequency, 40).unwrap();
        let err = matcher.skip_to(39).unwrap_err();
        assert!(err.is_corruption());
    }
}
