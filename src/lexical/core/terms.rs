//! Block-indexed term dictionary.
//!
//! Keys are `field ++ 0x00 ++ term`, written in ascending order and grouped
//! into blocks of prefix-compressed entries. A sparse index (first key,
//! offset, length and CRC of every block) plus the list of fields sits after
//! the blocks and is located through a fixed-size footer:
//!
//! ```text
//! magic "TERM" u32 | version u32
//! block*          : count varint, (prefix-coded key, TermInfo)*
//! index           : block_count * (first key, offset u64, length u32, crc u32)
//!                   field_count varint, (field name, term count u64)*
//! footer          : index_offset u64 | index_crc u32 | term_count u64 | block_count u32
//! file crc u32
//! ```
//!
//! Opening a dictionary reads the footer and the index only. Blocks are
//! decoded on demand and their checksum is verified every time.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::ops::Bound;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::lexical::core::posting::{Posting, decode_inline, encode_inline};
use crate::storage::structured::{CHECKSUM_LEN, SliceReader, StructWriter, verify_checksum};
use crate::storage::{Storage, StorageOutput};
use crate::util::prefix::{PrefixDecoder, PrefixEncoder};
use crate::util::varint::{put_u32, put_u64};

const TERMS_MAGIC: u32 = 0x5445_524D; // "TERM"
const TERMS_VERSION: u32 = 1;
const FOOTER_LEN: usize = 24;
const HEADER_LEN: usize = 8;

/// Default number of entries per dictionary block.
pub const DEFAULT_DICTIONARY_BLOCK_SIZE: usize = 64;

const FLAG_INLINE: u8 = 1;

/// Build the dictionary key of a term.
pub fn term_key(field: &str, term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(field.len() + 1 + term.len());
    key.extend_from_slice(field.as_bytes());
    key.push(0);
    key.extend_from_slice(term);
    key
}

/// Split a dictionary key back into field name and term.
pub fn split_key(key: &[u8]) -> Result<(&str, &[u8])> {
    let sep = key
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| StrataError::corrupt("dictionary key without field separator"))?;
    let field = std::str::from_utf8(&key[..sep])
        .map_err(|_| StrataError::corrupt("dictionary key with a non UTF-8 field name"))?;
    Ok((field, &key[sep + 1..]))
}

fn field_prefix(field: &str) -> Vec<u8> {
    term_key(field, &[])
}

/// Where a term's postings live.
#[derive(Debug, Clone, PartialEq)]
pub enum PostingsRef {
    /// The term occurs in exactly one document; its posting is kept here.
    Inline(Posting),
    /// Byte range inside the segment's postings file.
    Block { offset: u64, length: u64 },
}

/// Per-segment statistics and postings pointer of one term.
#[derive(Debug, Clone, PartialEq)]
pub struct TermInfo {
    pub doc_frequency: u32,
    pub total_weight: f32,
    pub min_length: u32,
    pub max_length: u32,
    pub min_weight: f32,
    pub max_weight: f32,
    pub postings: PostingsRef,
}

impl TermInfo {
    /// Summarize a postings list. `length_of` yields the field length of a
    /// document.
    pub fn summarize<F>(postings: &[Posting], length_of: F, pointer: PostingsRef) -> Self
    where
        F: Fn(u32) -> u32,
    {
        let mut info = TermInfo {
            doc_frequency: postings.len() as u32,
            total_weight: 0.0,
            min_length: u32::MAX,
            max_length: 0,
            min_weight: f32::MAX,
            max_weight: 0.0,
            postings: pointer,
        };
        for posting in postings {
            let length = length_of(posting.doc_id);
            info.total_weight += posting.weight;
            info.min_length = info.min_length.min(length);
            info.max_length = info.max_length.max(length);
            info.min_weight = info.min_weight.min(posting.weight);
            info.max_weight = info.max_weight.max(posting.weight);
        }
        if postings.is_empty() {
            info.min_length = 0;
            info.min_weight = 0.0;
        }
        info
    }

    /// Total weight of the term in the segment.
    pub fn weight(&self) -> f32 {
        self.total_weight
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.postings, PostingsRef::Inline(_))
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        let flags = if self.is_inline() { FLAG_INLINE } else { 0 };
        buf.push(flags);
        put_u32(buf, self.doc_frequency);
        buf.extend_from_slice(&self.total_weight.to_le_bytes());
        put_u32(buf, self.min_length);
        put_u32(buf, self.max_length);
        buf.extend_from_slice(&self.min_weight.to_le_bytes());
        buf.extend_from_slice(&self.max_weight.to_le_bytes());
        match &self.postings {
            PostingsRef::Inline(posting) => encode_inline(posting, buf),
            PostingsRef::Block { offset, length } => {
                put_u64(buf, *offset);
                put_u64(buf, *length);
            }
        }
    }

    fn decode(reader: &mut SliceReader<'_>) -> Result<Self> {
        let flags = reader.read_u8()?;
        let doc_frequency = reader.read_varint_u32()?;
        let total_weight = reader.read_f32()?;
        let min_length = reader.read_varint_u32()?;
        let max_length = reader.read_varint_u32()?;
        let min_weight = reader.read_f32()?;
        let max_weight = reader.read_f32()?;
        let postings = if flags & FLAG_INLINE != 0 {
            PostingsRef::Inline(decode_inline(reader)?)
        } else {
            PostingsRef::Block {
                offset: reader.read_varint()?,
                length: reader.read_varint()?,
            }
        };
        Ok(TermInfo {
            doc_frequency,
            total_weight,
            min_length,
            max_length,
            min_weight,
            max_weight,
            postings,
        })
    }
}

#[derive(Debug, Clone)]
struct BlockMeta {
    first_key: Vec<u8>,
    offset: u64,
    length: u32,
    crc: u32,
}

/// Writes a dictionary from keys in strictly ascending order.
pub struct TermDictionaryWriter {
    writer: StructWriter<Box<dyn StorageOutput>>,
    block_size: usize,
    encoder: PrefixEncoder,
    block: Vec<u8>,
    block_entries: usize,
    block_first_key: Vec<u8>,
    last_key: Option<Vec<u8>>,
    index: Vec<BlockMeta>,
    fields: Vec<(String, u64)>,
    term_count: u64,
}

impl TermDictionaryWriter {
    pub fn create(storage: &dyn Storage, name: &str, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(StrataError::invalid_argument("dictionary block size must be positive"));
        }
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_u32(TERMS_MAGIC)?;
        writer.write_u32(TERMS_VERSION)?;
        Ok(TermDictionaryWriter {
            writer,
            block_size,
            encoder: PrefixEncoder::new(),
            block: Vec::new(),
            block_entries: 0,
            block_first_key: Vec::new(),
            last_key: None,
            index: Vec::new(),
            fields: Vec::new(),
            term_count: 0,
        })
    }

    /// Add the entry for `(field, term)`.
    pub fn add(&mut self, field: &str, term: &[u8], info: &TermInfo) -> Result<()> {
        if field.is_empty() || field.as_bytes().contains(&0) {
            return Err(StrataError::invalid_argument(format!("invalid field name {field:?}")));
        }
        if info.doc_frequency == 0 {
            return Err(StrataError::invalid_argument("terms without postings are not written"));
        }
        let key = term_key(field, term);
        if let Some(last) = &self.last_key {
            if key.as_slice() <= last.as_slice() {
                return Err(StrataError::invalid_argument(format!(
                    "dictionary keys out of order: {key:?} after {last:?}"
                )));
            }
        }

        if self.block_entries == 0 {
            self.block_first_key = key.clone();
        }
        self.encoder.encode(&key, &mut self.block);
        info.encode(&mut self.block);
        self.block_entries += 1;
        self.term_count += 1;

        match self.fields.last_mut() {
            Some((name, count)) if name == field => *count += 1,
            _ => self.fields.push((field.to_string(), 1)),
        }

        self.last_key = Some(key);
        if self.block_entries >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block_entries == 0 {
            return Ok(());
        }
        let mut body = Vec::with_capacity(self.block.len() + 5);
        put_u64(&mut body, self.block_entries as u64);
        body.extend_from_slice(&self.block);

        let offset = self.writer.position();
        self.writer.write_raw(&body)?;
        self.index.push(BlockMeta {
            first_key: std::mem::take(&mut self.block_first_key),
            offset,
            length: body.len() as u32,
            crc: crc32fast::hash(&body),
        });

        self.block.clear();
        self.block_entries = 0;
        self.encoder.reset();
        Ok(())
    }

    pub fn term_count(&self) -> u64 {
        self.term_count
    }

    /// Flush the last block, write index and footer, and close the file.
    pub fn finish(mut self) -> Result<u64> {
        self.flush_block()?;

        let mut index = Vec::new();
        for block in &self.index {
            put_u64(&mut index, block.first_key.len() as u64);
            index.extend_from_slice(&block.first_key);
            index.extend_from_slice(&block.offset.to_le_bytes());
            index.extend_from_slice(&block.length.to_le_bytes());
            index.extend_from_slice(&block.crc.to_le_bytes());
        }
        put_u64(&mut index, self.fields.len() as u64);
        for (name, count) in &self.fields {
            put_u64(&mut index, name.len() as u64);
            index.extend_from_slice(name.as_bytes());
            index.extend_from_slice(&count.to_le_bytes());
        }

        let index_offset = self.writer.position();
        self.writer.write_raw(&index)?;
        self.writer.write_u64(index_offset)?;
        self.writer.write_u32(crc32fast::hash(&index))?;
        self.writer.write_u64(self.term_count)?;
        self.writer.write_u32(self.index.len() as u32)?;
        self.writer.close()
    }
}

#[derive(Debug)]
struct DictionaryInner {
    name: String,
    data: Arc<[u8]>,
    blocks: Vec<BlockMeta>,
    fields: Vec<(String, u64)>,
    term_count: u64,
}

/// Read access to one segment's dictionary. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TermDictionary {
    inner: Arc<DictionaryInner>,
}

type Entries = Vec<(Vec<u8>, TermInfo)>;

impl TermDictionary {
    pub fn open(data: Arc<[u8]>, name: &str) -> Result<Self> {
        if data.len() < HEADER_LEN + FOOTER_LEN + CHECKSUM_LEN {
            return Err(StrataError::corrupt(format!("{name}: dictionary too short")));
        }
        let body = verify_checksum(&data, name)?;

        let mut header = SliceReader::new(body);
        if header.read_u32()? != TERMS_MAGIC {
            return Err(StrataError::corrupt(format!("{name}: not a term dictionary")));
        }
        let version = header.read_u32()?;
        if version != TERMS_VERSION {
            return Err(StrataError::corrupt(format!(
                "{name}: unsupported dictionary version {version}"
            )));
        }

        let footer_at = body.len() - FOOTER_LEN;
        let mut footer = SliceReader::at(body, footer_at)?;
        let index_offset = footer.read_u64()? as usize;
        let index_crc = footer.read_u32()?;
        let term_count = footer.read_u64()?;
        let block_count = footer.read_u32()? as usize;

        if index_offset < HEADER_LEN || index_offset > footer_at {
            return Err(StrataError::corrupt(format!("{name}: bad dictionary index offset")));
        }
        let index = &body[index_offset..footer_at];
        if crc32fast::hash(index) != index_crc {
            return Err(StrataError::corrupt(format!("{name}: dictionary index checksum mismatch")));
        }

        let mut reader = SliceReader::new(index);
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let first_key = reader.read_bytes()?.to_vec();
            let offset = reader.read_u64()?;
            let length = reader.read_u32()?;
            let crc = reader.read_u32()?;
            if offset as usize + length as usize > index_offset {
                return Err(StrataError::corrupt(format!("{name}: block extends into index")));
            }
            blocks.push(BlockMeta {
                first_key,
                offset,
                length,
                crc,
            });
        }
        let field_count = reader.read_varint()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let name = reader.read_string()?.to_string();
            let count = reader.read_u64()?;
            fields.push((name, count));
        }

        Ok(TermDictionary {
            inner: Arc::new(DictionaryInner {
                name: name.to_string(),
                data,
                blocks,
                fields,
                term_count,
            }),
        })
    }

    /// Total number of terms over all fields.
    pub fn term_count(&self) -> u64 {
        self.inner.term_count
    }

    /// Fields that have at least one term, in key order.
    pub fn fields(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Number of terms of `field`.
    pub fn field_term_count(&self, field: &str) -> u64 {
        self.inner
            .fields
            .iter()
            .find(|(name, _)| name == field)
            .map_or(0, |(_, count)| *count)
    }

    fn decode_block(&self, index: usize) -> Result<Entries> {
        let meta = &self.inner.blocks[index];
        let start = meta.offset as usize;
        let body = &self.inner.data[start..start + meta.length as usize];
        if crc32fast::hash(body) != meta.crc {
            return Err(StrataError::corrupt(format!(
                "{}: dictionary block {index} checksum mismatch",
                self.inner.name
            )));
        }

        let mut reader = SliceReader::new(body);
        let count = reader.read_varint()? as usize;
        let mut decoder = PrefixDecoder::new();
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let mut pos = reader.position();
            let key = decoder.decode(body, &mut pos)?.to_vec();
            reader = SliceReader::at(body, pos)?;
            let info = TermInfo::decode(&mut reader)?;
            entries.push((key, info));
        }
        if entries.first().map(|(key, _)| key) != Some(&meta.first_key) {
            return Err(StrataError::corrupt(format!(
                "{}: dictionary block {index} disagrees with index",
                self.inner.name
            )));
        }
        Ok(entries)
    }

    /// Index of the block that would contain `key`, if any.
    fn block_for(&self, key: &[u8]) -> Option<usize> {
        let after = self
            .inner
            .blocks
            .partition_point(|block| block.first_key.as_slice() <= key);
        after.checked_sub(1)
    }

    /// Look up one term.
    pub fn get(&self, field: &str, term: &[u8]) -> Result<Option<TermInfo>> {
        let key = term_key(field, term);
        let Some(block) = self.block_for(&key) else {
            return Ok(None);
        };
        let entries = self.decode_block(block)?;
        Ok(entries
            .binary_search_by(|(k, _)| k.as_slice().cmp(key.as_slice()))
            .ok()
            .map(|at| entries[at].1.clone()))
    }

    /// Entries of `field` with `start <= term <= end` (per the bounds), in
    /// ascending order.
    pub fn range(&self, field: &str, start: Bound<&[u8]>, end: Bound<&[u8]>) -> TermIter {
        let prefix = field_prefix(field);
        let to_key = |bound: Bound<&[u8]>| match bound {
            Bound::Included(term) => Bound::Included(term_key(field, term)),
            Bound::Excluded(term) => Bound::Excluded(term_key(field, term)),
            Bound::Unbounded => Bound::Unbounded,
        };
        let start = match to_key(start) {
            Bound::Unbounded => Bound::Included(prefix.clone()),
            bound => bound,
        };
        let end = match to_key(end) {
            Bound::Unbounded => {
                let mut upper = field.as_bytes().to_vec();
                upper.push(1);
                Bound::Excluded(upper)
            }
            bound => bound,
        };
        TermIter {
            keys: KeyIter::new(self.clone(), start, end, None),
            strip: prefix.len(),
        }
    }

    /// Entries of `field` whose term starts with `prefix`.
    pub fn prefix(&self, field: &str, prefix: &[u8]) -> TermIter {
        let key = term_key(field, prefix);
        let strip = field.len() + 1;
        TermIter {
            keys: KeyIter::new(self.clone(), Bound::Included(key.clone()), Bound::Unbounded, Some(key)),
            strip,
        }
    }

    /// Every entry of `field`.
    pub fn terms(&self, field: &str) -> TermIter {
        self.range(field, Bound::Unbounded, Bound::Unbounded)
    }

    /// Every entry of every field as `(key, info)`.
    pub fn entries(&self) -> KeyIter {
        KeyIter::new(self.clone(), Bound::Unbounded, Bound::Unbounded, None)
    }

    /// Cursor over the terms of one field.
    pub fn cursor(&self, field: &str) -> TermCursor {
        TermCursor {
            dictionary: self.clone(),
            field: field.to_string(),
            iter: None,
            current: None,
        }
    }
}

/// Ascending iterator over full dictionary keys.
pub struct KeyIter {
    dictionary: TermDictionary,
    next_block: usize,
    pending: std::vec::IntoIter<(Vec<u8>, TermInfo)>,
    start: Bound<Vec<u8>>,
    end: Bound<Vec<u8>>,
    required_prefix: Option<Vec<u8>>,
    done: bool,
}

impl KeyIter {
    fn new(
        dictionary: TermDictionary,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        required_prefix: Option<Vec<u8>>,
    ) -> Self {
        let next_block = match &start {
            Bound::Included(key) | Bound::Excluded(key) => dictionary.block_for(key).unwrap_or(0),
            Bound::Unbounded => 0,
        };
        KeyIter {
            dictionary,
            next_block,
            pending: Vec::new().into_iter(),
            start,
            end,
            required_prefix,
            done: false,
        }
    }

    fn before_start(&self, key: &[u8]) -> bool {
        match &self.start {
            Bound::Included(start) => key < start.as_slice(),
            Bound::Excluded(start) => key <= start.as_slice(),
            Bound::Unbounded => false,
        }
    }

    fn past_end(&self, key: &[u8]) -> bool {
        let beyond = match &self.end {
            Bound::Included(end) => key.cmp(end.as_slice()) == Ordering::Greater,
            Bound::Excluded(end) => key >= end.as_slice(),
            Bound::Unbounded => false,
        };
        beyond
            || self
                .required_prefix
                .as_ref()
                .is_some_and(|prefix| !key.starts_with(prefix))
    }
}

impl Iterator for KeyIter {
    type Item = Result<(Vec<u8>, TermInfo)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some((key, info)) = self.pending.next() {
                if self.before_start(&key) {
                    continue;
                }
                if self.past_end(&key) {
                    self.done = true;
                    return None;
                }
                return Some(Ok((key, info)));
            }

            if self.next_block >= self.dictionary.inner.blocks.len() {
                self.done = true;
                return None;
            }
            match self.dictionary.decode_block(self.next_block) {
                Ok(entries) => {
                    self.next_block += 1;
                    self.pending = entries.into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Ascending iterator over `(term, info)` of one field.
pub struct TermIter {
    keys: KeyIter,
    strip: usize,
}

impl Iterator for TermIter {
    type Item = Result<(Vec<u8>, TermInfo)>;

    fn next(&mut self) -> Option<Self::Item> {
        let strip = self.strip;
        self.keys
            .next()
            .map(|entry| entry.map(|(key, info)| (key[strip..].to_vec(), info)))
    }
}

/// K-way merge of several ascending `(key, info)` streams. Each step yields
/// the smallest key with every stream holding it, by stream index.
pub struct TermMerge<I> {
    iters: Vec<I>,
    heads: Vec<Option<TermInfo>>,
    heap: BinaryHeap<Reverse<(Vec<u8>, usize)>>,
}

impl<I> TermMerge<I>
where
    I: Iterator<Item = Result<(Vec<u8>, TermInfo)>>,
{
    pub fn new(mut iters: Vec<I>) -> Result<Self> {
        let mut heads = Vec::with_capacity(iters.len());
        let mut heap = BinaryHeap::new();
        for (i, iter) in iters.iter_mut().enumerate() {
            match iter.next().transpose()? {
                Some((key, info)) => {
                    heap.push(Reverse((key, i)));
                    heads.push(Some(info));
                }
                None => heads.push(None),
            }
        }
        Ok(TermMerge { iters, heads, heap })
    }

    fn advance(&mut self, i: usize) -> Result<()> {
        self.heads[i] = match self.iters[i].next().transpose()? {
            Some((key, info)) => {
                self.heap.push(Reverse((key, i)));
                Some(info)
            }
            None => None,
        };
        Ok(())
    }

    pub fn next_group(&mut self) -> Result<Option<(Vec<u8>, Vec<(usize, TermInfo)>)>> {
        let Some(Reverse((key, first))) = self.heap.pop() else {
            return Ok(None);
        };
        let mut holders = vec![first];
        while self.heap.peek().is_some_and(|Reverse((next, _))| *next == key) {
            if let Some(Reverse((_, i))) = self.heap.pop() {
                holders.push(i);
            }
        }
        holders.sort_unstable();

        let mut sources = Vec::with_capacity(holders.len());
        for i in holders {
            if let Some(info) = self.heads[i].take() {
                sources.push((i, info));
            }
            self.advance(i)?;
        }
        Ok(Some((key, sources)))
    }
}

/// Positionable cursor over the terms of one field.
///
/// A fresh cursor is unpositioned; call [`TermCursor::first`] or
/// [`TermCursor::find`] before reading.
pub struct TermCursor {
    dictionary: TermDictionary,
    field: String,
    iter: Option<TermIter>,
    current: Option<(Vec<u8>, TermInfo)>,
}

impl TermCursor {
    fn advance(&mut self) -> Result<()> {
        self.current = match self.iter.as_mut().and_then(|iter| iter.next()) {
            Some(entry) => Some(entry?),
            None => None,
        };
        Ok(())
    }

    /// Move to the first term of the field.
    pub fn first(&mut self) -> Result<()> {
        self.iter = Some(self.dictionary.terms(&self.field));
        self.advance()
    }

    /// Move to the next term. Does nothing once the cursor is exhausted.
    pub fn next(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.advance()
    }

    /// Move to the first term `>= term`.
    pub fn find(&mut self, term: &[u8]) -> Result<()> {
        self.iter = Some(
            self.dictionary
                .range(&self.field, Bound::Included(term), Bound::Unbounded),
        );
        self.advance()
    }

    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn term(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(term, _)| term.as_slice())
    }

    pub fn term_info(&self) -> Option<&TermInfo> {
        self.current.as_ref().map(|(_, info)| info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn info(df: u32) -> TermInfo {
        let postings: Vec<Posting> = (0..df).map(|d| Posting::new(d).with_weight(2.0)).collect();
        let pointer = if df == 1 {
            PostingsRef::Inline(postings[0].clone())
        } else {
            PostingsRef::Block {
                offset: df as u64 * 10,
                length: 7,
            }
        };
        TermInfo::summarize(&postings, |d| d + 1, pointer)
    }

    fn build(storage: &MemoryStorage, block_size: usize) -> TermDictionary {
        let mut writer = TermDictionaryWriter::create(storage, "t.trm", block_size).unwrap();
        for (field, term, df) in [
            ("body", &b"alfa"[..], 3),
            ("body", b"bravo", 1),
            ("body", b"charlie", 2),
            ("body", b"charming", 1),
            ("body", b"delta", 4),
            ("id", b"1", 1),
            ("id", b"2", 1),
            ("title", b"zulu", 2),
        ] {
            writer.add(field, term, &info(df)).unwrap();
        }
        assert_eq!(writer.term_count(), 8);
        writer.finish().unwrap();
        TermDictionary::open(storage.read_all("t.trm").unwrap(), "t.trm").unwrap()
    }

    fn terms(iter: TermIter) -> Vec<Vec<u8>> {
        iter.map(|entry| entry.unwrap().0).collect()
    }

    #[test]
    fn test_get() {
        let storage = MemoryStorage::new();
        for block_size in [1, 3, 64] {
            let dict = build(&storage, block_size);
            assert_eq!(dict.term_count(), 8);
            assert_eq!(dict.get("body", b"charlie").unwrap(), Some(info(2)));
            assert_eq!(dict.get("id", b"2").unwrap(), Some(info(1)));
            assert_eq!(dict.get("body", b"echo").unwrap(), None);
            assert_eq!(dict.get("aaa", b"alfa").unwrap(), None);
            assert_eq!(dict.get("zzz", b"x").unwrap(), None);
        }
    }

    #[test]
    fn test_summarize() {
        let info = info(3);
        assert_eq!(info.doc_frequency, 3);
        assert_eq!(info.weight(), 6.0);
        assert_eq!((info.min_length, info.max_length), (1, 3));
        assert_eq!((info.min_weight, info.max_weight), (2.0, 2.0));
    }

    #[test]
    fn test_range_and_prefix() {
        let storage = MemoryStorage::new();
        let dict = build(&storage, 2);

        assert_eq!(
            terms(dict.range("body", Bound::Included(b"bravo"), Bound::Excluded(b"delta"))),
            vec![b"bravo".to_vec(), b"charlie".to_vec(), b"charming".to_vec()]
        );
        assert_eq!(
            terms(dict.range("body", Bound::Excluded(b"charming"), Bound::Unbounded)),
            vec![b"delta".to_vec()]
        );
        assert!(terms(dict.range("body", Bound::Included(b"x"), Bound::Unbounded)).is_empty());
        assert!(terms(dict.range("nope", Bound::Unbounded, Bound::Unbounded)).is_empty());

        assert_eq!(
            terms(dict.prefix("body", b"char")),
            vec![b"charlie".to_vec(), b"charming".to_vec()]
        );
        assert_eq!(terms(dict.terms("id")), vec![b"1".to_vec(), b"2".to_vec()]);
        assert_eq!(dict.fields().collect::<Vec<_>>(), vec!["body", "id", "title"]);
        assert_eq!(dict.field_term_count("body"), 5);
        assert_eq!(dict.entries().count(), 8);
    }

    #[test]
    fn test_cursor() {
        let storage = MemoryStorage::new();
        let dict = build(&storage, 2);
        let mut cursor = dict.cursor("body");
        assert!(!cursor.is_valid());

        cursor.first().unwrap();
        assert_eq!(cursor.term(), Some(&b"alfa"[..]));
        cursor.next().unwrap();
        assert_eq!(cursor.term(), Some(&b"bravo"[..]));

        cursor.find(b"charm").unwrap();
        assert_eq!(cursor.term(), Some(&b"charming"[..]));
        assert_eq!(cursor.term_info().map(|i| i.doc_frequency), Some(1));

        cursor.find(b"zzz").unwrap();
        assert!(!cursor.is_valid());
        assert_eq!(cursor.term(), None);
        assert!(cursor.term_info().is_none());
        cursor.next().unwrap();
        assert!(!cursor.is_valid());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let storage = MemoryStorage::new();
        let mut writer = TermDictionaryWriter::create(&storage, "o.trm", 4).unwrap();
        writer.add("f", b"b", &info(2)).unwrap();
        let err = writer.add("f", b"a", &info(2)).unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument(_)));
        assert!(writer.add("f", b"b", &info(2)).is_err());
    }

    #[test]
    fn test_damage_detected_on_open() {
        let storage = MemoryStorage::new();
        build(&storage, 2);
        let data = storage.read_all("t.trm").unwrap().to_vec();
        let footer_at = data.len() - CHECKSUM_LEN - FOOTER_LEN;
        let index_offset = u64::from_le_bytes(data[footer_at..footer_at + 8].try_into().unwrap()) as usize;

        // A term block, the sparse block index, and the term count in the footer.
        for at in [HEADER_LEN + 3, index_offset + 1, footer_at + 12] {
            let mut damaged = data.clone();
            damaged[at] ^= 0x40;
            let err = TermDictionary::open(Arc::from(damaged), "t.trm").unwrap_err();
            assert!(err.is_corruption(), "byte {at}: {err}");
        }
        assert!(TermDictionary::open(Arc::from(data), "t.trm").is_ok());
    }

    #[test]
    fn test_term_merge() {
        let storage = MemoryStorage::new();
        let mut writer = TermDictionaryWriter::create(&storage, "m.trm", 2).unwrap();
        writer.add("body", b"alfa", &info(2)).unwrap();
        writer.add("body", b"delta", &info(1)).unwrap();
        writer.finish().unwrap();
        let other = TermDictionary::open(storage.read_all("m.trm").unwrap(), "m.trm").unwrap();
        let dict = build(&storage, 3);

        let mut merge = TermMerge::new(vec![dict.terms("body"), other.terms("body")]).unwrap();
        let mut groups = Vec::new();
        while let Some((term, sources)) = merge.next_group().unwrap() {
            let holders: Vec<usize> = sources.iter().map(|(i, _)| *i).collect();
            groups.push((term, holders));
        }
        assert_eq!(
            groups,
            vec![
                (b"alfa".to_vec(), vec![0, 1]),
                (b"bravo".to_vec(), vec![0]),
                (b"charlie".to_vec(), vec![0]),
                (b"charming".to_vec(), vec![0]),
                (b"delta".to_vec(), vec![0, 1]),
            ]
        );
    }

    #[test]
    fn test_split_key() {
        let key = term_key("title", b"a\x00b");
        assert_eq!(split_key(&key).unwrap(), ("title", &b"a\x00b"[..]));
        assert!(split_key(b"nofield").is_err());
    }
}
