//! Restricting a search to a set of documents.

use bit_vec::BitVec;

use crate::error::Result;
use crate::lexical::query::collector::{Collector, SegmentContext};

/// A set of global document ids of one snapshot.
///
/// ```
/// use strata::lexical::query::DocSet;
///
/// let set: DocSet = [7, 2, 7].into_iter().collect();
/// assert_eq!(set.len(), 2);
/// assert!(set.contains(2) && !set.contains(3));
/// assert_eq!(set.iter().collect::<Vec<_>>(), vec![2, 7]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DocSet {
    bits: BitVec,
    len: usize,
}

impl DocSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `doc_id`. Returns `true` when it was not present.
    pub fn insert(&mut self, doc_id: u64) -> bool {
        let slot = doc_id as usize;
        if slot >= self.bits.len() {
            self.bits.grow(slot + 1 - self.bits.len(), false);
        }
        if self.bits.get(slot).unwrap_or(false) {
            return false;
        }
        self.bits.set(slot, true);
        self.len += 1;
        true
    }

    #[inline]
    pub fn contains(&self, doc_id: u64) -> bool {
        self.bits.get(doc_id as usize).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, set)| *set)
            .map(|(id, _)| id as u64)
    }
}

impl FromIterator<u64> for DocSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = DocSet::new();
        for doc_id in iter {
            set.insert(doc_id);
        }
        set
    }
}

impl PartialEq for DocSet {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

/// Passes to the inner collector only the matches that are in `allow`
/// (when set) and not in `deny` (when set).
#[derive(Debug)]
pub struct FilterCollector<'a, C> {
    inner: C,
    allow: Option<&'a DocSet>,
    deny: Option<&'a DocSet>,
    rejected: u64,
}

impl<'a, C: Collector> FilterCollector<'a, C> {
    pub fn new(inner: C) -> Self {
        FilterCollector {
            inner,
            allow: None,
            deny: None,
            rejected: 0,
        }
    }

    pub fn allow(mut self, allow: Option<&'a DocSet>) -> Self {
        self.allow = allow;
        self
    }

    pub fn deny(mut self, deny: Option<&'a DocSet>) -> Self {
        self.deny = deny;
        self
    }

    /// Matches withheld from the inner collector.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn admits(&self, doc_id: u64) -> bool {
        self.allow.is_none_or(|allow| allow.contains(doc_id)) && !self.deny.is_some_and(|deny| deny.contains(doc_id))
    }
}

impl<C: Collector> Collector for FilterCollector<'_, C> {
    fn set_segment(&mut self, context: &SegmentContext) -> Result<()> {
        self.inner.set_segment(context)
    }

    fn needs_scores(&self) -> bool {
        self.inner.needs_scores()
    }

    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        if self.admits(doc_id) {
            self.inner.collect(doc_id, score)
        } else {
            self.rejected += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::query::collector::AllCollector;

    #[test]
    fn test_doc_set_insert_and_iter() {
        let mut set = DocSet::new();
        assert!(set.is_empty());
        assert!(set.insert(9));
        assert!(set.insert(0));
        assert!(!set.insert(9));
        assert_eq!(set.len(), 2);
        assert!(!set.contains(1_000));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 9]);
        assert_eq!(set, DocSet::from_iter([9, 0]));
    }

    #[test]
    fn test_filter_and_mask() {
        let allow: DocSet = [1, 2, 3].into_iter().collect();
        let deny: DocSet = [2].into_iter().collect();
        let mut collector = FilterCollector::new(AllCollector::new())
            .allow(Some(&allow))
            .deny(Some(&deny));
        for doc_id in 0..5 {
            collector.collect(doc_id, 1.0).unwrap();
        }
        assert_eq!(collector.rejected(), 3);
        assert_eq!(collector.into_inner().doc_ids(), vec![1, 3]);
    }

    #[test]
    fn test_empty_allow_set_rejects_everything() {
        let allow = DocSet::new();
        let mut collector = FilterCollector::new(AllCollector::new()).allow(Some(&allow));
        collector.collect(0, 1.0).unwrap();
        assert!(collector.into_inner().doc_ids().is_empty());
    }
}
