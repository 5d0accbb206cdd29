//! Collectors receive the matching documents of a search.
//!
//! The searcher walks the segments of a snapshot in order, announces each
//! one through [`Collector::set_segment`] and then hands every live match
//! to [`Collector::collect`] with its global id. Wrappers such as
//! [`TimeLimitCollector`] stop a search by returning
//! [`StrataError::SearchTerminated`], which the searcher turns into a
//! partial result.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;

use crate::error::{Result, StrataError, Termination};
use crate::lexical::core::column::ColumnValue;
use crate::lexical::core::posting::DocId;
use crate::lexical::index::segment::SegmentReader;

/// The segment about to be searched.
#[derive(Debug, Clone)]
pub struct SegmentContext {
    /// Position of the segment in the snapshot.
    pub ord: usize,
    /// Global id of the segment's first document.
    pub offset: u64,
    pub segment: Arc<SegmentReader>,
}

impl SegmentContext {
    pub fn local(&self, doc_id: u64) -> DocId {
        (doc_id - self.offset) as DocId
    }
}

/// Receives search matches.
pub trait Collector: Debug {
    /// Called before the matches of a segment are collected.
    fn set_segment(&mut self, _context: &SegmentContext) -> Result<()> {
        Ok(())
    }

    /// Whether `collect` uses the score. When false the searcher passes 0.
    fn needs_scores(&self) -> bool {
        true
    }

    /// Collect one live document.
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()>;
}

impl<C: Collector + ?Sized> Collector for &mut C {
    fn set_segment(&mut self, context: &SegmentContext) -> Result<()> {
        (**self).set_segment(context)
    }

    fn needs_scores(&self) -> bool {
        (**self).needs_scores()
    }

    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        (**self).collect(doc_id, score)
    }
}

/// A scored search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub doc_id: u64,
    pub score: f32,
}

/// Ranking order of hits: higher score first, then lower id.
fn rank(a: &Hit, b: &Hit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

/// Heap entry whose greatest element is the worst ranked hit.
#[derive(Debug, Clone, Copy)]
struct Ranked(Hit);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        rank(&self.0, &other.0)
    }
}

/// Keeps the `limit` best hits by score, ties broken by ascending id.
#[derive(Debug)]
pub struct TopDocsCollector {
    limit: usize,
    heap: BinaryHeap<Ranked>,
    total_hits: u64,
}

impl TopDocsCollector {
    pub fn new(limit: usize) -> Self {
        TopDocsCollector {
            limit,
            heap: BinaryHeap::with_capacity(limit.min(1024)),
            total_hits: 0,
        }
    }

    /// Matches seen, kept or not.
    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    /// The kept hits, best first.
    pub fn into_hits(self) -> Vec<Hit> {
        let mut hits: Vec<Hit> = self.heap.into_iter().map(|r| r.0).collect();
        hits.sort_by(rank);
        hits
    }
}

impl Collector for TopDocsCollector {
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        self.total_hits += 1;
        if self.limit == 0 {
            return Ok(());
        }
        let hit = Ranked(Hit { doc_id, score });
        if self.heap.len() < self.limit {
            self.heap.push(hit);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if hit < *worst {
                *worst = hit;
            }
        }
        Ok(())
    }
}

/// Every match, in ascending id order.
#[derive(Debug, Default)]
pub struct AllCollector {
    hits: Vec<Hit>,
}

impl AllCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn doc_ids(&self) -> Vec<u64> {
        self.hits.iter().map(|h| h.doc_id).collect()
    }

    pub fn into_hits(self) -> Vec<Hit> {
        self.hits
    }
}

impl Collector for AllCollector {
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        self.hits.push(Hit { doc_id, score });
        Ok(())
    }
}

/// Counts matches.
#[derive(Debug, Default)]
pub struct CountCollector {
    count: u64,
}

impl CountCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Collector for CountCollector {
    fn needs_scores(&self) -> bool {
        false
    }

    fn collect(&mut self, _doc_id: u64, _score: f32) -> Result<()> {
        self.count += 1;
        Ok(())
    }
}

/// One sort criterion: the column of `field`, ascending unless `reverse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub reverse: bool,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        SortKey {
            field: field.to_string(),
            reverse: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        SortKey {
            field: field.to_string(),
            reverse: true,
        }
    }

    /// Order two column values under this key. A missing value sorts
    /// after any present one in both directions.
    pub fn compare(&self, a: &Option<ColumnValue>, b: &Option<ColumnValue>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) if self.reverse => b.compare(a),
            (Some(a), Some(b)) => a.compare(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    fn value(&self, context: &SegmentContext, doc_id: u64) -> Result<Option<ColumnValue>> {
        column_value(context, &self.field, doc_id)
    }
}

fn column_value(context: &SegmentContext, field: &str, doc_id: u64) -> Result<Option<ColumnValue>> {
    match context.segment.column(field) {
        Some(column) => column.get(context.local(doc_id)),
        None => Ok(None),
    }
}

/// Orders matches by the column values of one or more keys, the first key
/// deciding first. Documents without a value come last for that key
/// whatever its direction; full ties keep id order.
#[derive(Debug)]
pub struct SortingCollector {
    keys: Vec<SortKey>,
    limit: Option<usize>,
    context: Option<SegmentContext>,
    entries: Vec<(Vec<Option<ColumnValue>>, Hit)>,
}

impl SortingCollector {
    pub fn new(field: &str) -> Self {
        Self::by(vec![SortKey::asc(field)])
    }

    pub fn by(keys: Vec<SortKey>) -> Self {
        SortingCollector {
            keys,
            limit: None,
            context: None,
            entries: Vec::new(),
        }
    }

    /// Set the direction of the first key.
    pub fn reverse(mut self, reverse: bool) -> Self {
        if let Some(first) = self.keys.first_mut() {
            first.reverse = reverse;
        }
        self
    }

    /// Break ties of the keys so far by `field`.
    pub fn then_by(mut self, field: &str, reverse: bool) -> Self {
        self.keys.push(SortKey {
            field: field.to_string(),
            reverse,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Matches collected, kept or not.
    pub fn total_hits(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn into_hits(self) -> Vec<Hit> {
        let keys = self.keys;
        let mut entries = self.entries;
        entries.sort_by(|(a, x), (b, y)| {
            keys.iter()
                .zip(a.iter().zip(b))
                .map(|(key, (a, b))| key.compare(a, b))
                .find(|order| order.is_ne())
                .unwrap_or(Ordering::Equal)
                .then_with(|| x.doc_id.cmp(&y.doc_id))
        });
        let mut hits: Vec<Hit> = entries.into_iter().map(|(_, hit)| hit).collect();
        if let Some(limit) = self.limit {
            hits.truncate(limit);
        }
        hits
    }
}

impl Collector for SortingCollector {
    fn set_segment(&mut self, context: &SegmentContext) -> Result<()> {
        self.context = Some(context.clone());
        Ok(())
    }

    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| StrataError::invalid_state("collect() called before set_segment()"))?;
        let values = self
            .keys
            .iter()
            .map(|key| key.value(context, doc_id))
            .collect::<Result<Vec<_>>>()?;
        self.entries.push((values, Hit { doc_id, score }));
        Ok(())
    }
}

/// How matches are collapsed: at most `limit` documents per value of the
/// column of `field`, preferring the best by `order` or, without one, by
/// rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collapse {
    pub field: String,
    pub limit: usize,
    pub order: Option<SortKey>,
}

impl Collapse {
    pub fn new(field: &str) -> Self {
        Collapse {
            field: field.to_string(),
            limit: 1,
            order: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn order(mut self, order: SortKey) -> Self {
        self.order = Some(order);
        self
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    segment: usize,
    hit: Hit,
    order: Option<ColumnValue>,
}

/// Keeps the best documents of each collapse key and hands the survivors
/// to the inner collector once the search is over, see
/// [`CollapseCollector::finish`]. Documents without a key are never
/// collapsed.
#[derive(Debug)]
pub struct CollapseCollector<C> {
    inner: C,
    collapse: Collapse,
    contexts: Vec<SegmentContext>,
    groups: AHashMap<Vec<u8>, Vec<Candidate>>,
    loose: Vec<Candidate>,
    collapsed: u64,
}

impl<C: Collector> CollapseCollector<C> {
    pub fn new(inner: C, collapse: Collapse) -> Self {
        CollapseCollector {
            inner,
            collapse,
            contexts: Vec::new(),
            groups: AHashMap::new(),
            loose: Vec::new(),
            collapsed: 0,
        }
    }

    /// Documents dropped so far because their key was full.
    pub fn collapsed(&self) -> u64 {
        self.collapsed
    }

    fn prefer(order: Option<&SortKey>, a: &Candidate, b: &Candidate) -> Ordering {
        match order {
            Some(key) => key
                .compare(&a.order, &b.order)
                .then_with(|| a.hit.doc_id.cmp(&b.hit.doc_id)),
            None => rank(&a.hit, &b.hit),
        }
    }

    /// Replay the surviving documents into the inner collector in id
    /// order, segment by segment, and return it.
    pub fn finish(self) -> Result<C> {
        let mut inner = self.inner;
        let mut survivors = self.loose;
        survivors.extend(self.groups.into_iter().flat_map(|(_, group)| group));
        survivors.sort_by_key(|c| c.hit.doc_id);
        let mut current = None;
        for candidate in survivors {
            if current != Some(candidate.segment) {
                inner.set_segment(&self.contexts[candidate.segment])?;
                current = Some(candidate.segment);
            }
            inner.collect(candidate.hit.doc_id, candidate.hit.score)?;
        }
        Ok(inner)
    }
}

impl<C: Collector> Collector for CollapseCollector<C> {
    fn set_segment(&mut self, context: &SegmentContext) -> Result<()> {
        self.contexts.push(context.clone());
        Ok(())
    }

    fn needs_scores(&self) -> bool {
        self.inner.needs_scores() || self.collapse.order.is_none()
    }

    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        let context = self
            .contexts
            .last()
            .ok_or_else(|| StrataError::invalid_state("collect() called before set_segment()"))?;
        let key = column_value(context, &self.collapse.field, doc_id)?;
        let order = match &self.collapse.order {
            Some(order) => order.value(context, doc_id)?,
            None => None,
        };
        let candidate = Candidate {
            segment: self.contexts.len() - 1,
            hit: Hit { doc_id, score },
            order,
        };
        let Some(key) = key else {
            self.loose.push(candidate);
            return Ok(());
        };
        let group = self.groups.entry(key.to_key()).or_default();
        group.push(candidate);
        if group.len() > self.collapse.limit {
            let order = self.collapse.order.as_ref();
            group.sort_by(|a, b| Self::prefer(order, a, b));
            let dropped = group.len() - self.collapse.limit;
            group.truncate(self.collapse.limit);
            self.collapsed += dropped as u64;
        }
        Ok(())
    }
}

/// Groups matching ids by the column value of a field.
#[derive(Debug)]
pub struct FacetCollector {
    field: String,
    context: Option<SegmentContext>,
    groups: Vec<(ColumnValue, Vec<u64>)>,
    index: AHashMap<Vec<u8>, usize>,
    missing: Vec<u64>,
}

impl FacetCollector {
    pub fn new(field: &str) -> Self {
        FacetCollector {
            field: field.to_string(),
            context: None,
            groups: Vec::new(),
            index: AHashMap::new(),
            missing: Vec::new(),
        }
    }

    /// Groups in value order, each with its ids ascending. Documents
    /// without a value form a final `None` group.
    pub fn into_groups(self) -> Vec<(Option<ColumnValue>, Vec<u64>)> {
        let mut groups = self.groups;
        groups.sort_by(|a, b| a.0.compare(&b.0));
        let mut out: Vec<(Option<ColumnValue>, Vec<u64>)> =
            groups.into_iter().map(|(value, ids)| (Some(value), ids)).collect();
        if !self.missing.is_empty() {
            out.push((None, self.missing));
        }
        out
    }
}

impl Collector for FacetCollector {
    fn set_segment(&mut self, context: &SegmentContext) -> Result<()> {
        self.context = Some(context.clone());
        Ok(())
    }

    fn needs_scores(&self) -> bool {
        false
    }

    fn collect(&mut self, doc_id: u64, _score: f32) -> Result<()> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| StrataError::invalid_state("collect() called before set_segment()"))?;
        match column_value(context, &self.field, doc_id)? {
            Some(value) => {
                let key = value.to_key();
                match self.index.get(&key) {
                    Some(slot) => self.groups[*slot].1.push(doc_id),
                    None => {
                        self.index.insert(key, self.groups.len());
                        self.groups.push((value, vec![doc_id]));
                    }
                }
            }
            None => self.missing.push(doc_id),
        }
        Ok(())
    }
}

/// Stops the search once a deadline has passed.
#[derive(Debug)]
pub struct TimeLimitCollector<C> {
    inner: C,
    deadline: Instant,
}

impl<C: Collector> TimeLimitCollector<C> {
    pub fn new(inner: C, limit: Duration) -> Self {
        TimeLimitCollector {
            inner,
            deadline: Instant::now() + limit,
        }
    }

    pub fn with_deadline(inner: C, deadline: Instant) -> Self {
        TimeLimitCollector { inner, deadline }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn check(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            Err(StrataError::SearchTerminated(Termination::TimeLimit))
        } else {
            Ok(())
        }
    }
}

impl<C: Collector> Collector for TimeLimitCollector<C> {
    fn set_segment(&mut self, context: &SegmentContext) -> Result<()> {
        self.check()?;
        self.inner.set_segment(context)
    }

    fn needs_scores(&self) -> bool {
        self.inner.needs_scores()
    }

    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        self.check()?;
        self.inner.collect(doc_id, score)
    }
}

/// Forwards at most `limit` matches, then stops the search.
#[derive(Debug)]
pub struct CountLimitCollector<C> {
    inner: C,
    limit: u64,
    seen: u64,
}

impl<C: Collector> CountLimitCollector<C> {
    pub fn new(inner: C, limit: u64) -> Self {
        CountLimitCollector {
            inner,
            limit,
            seen: 0,
        }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: Collector> Collector for CountLimitCollector<C> {
    fn set_segment(&mut self, context: &SegmentContext) -> Result<()> {
        self.inner.set_segment(context)
    }

    fn needs_scores(&self) -> bool {
        self.inner.needs_scores()
    }

    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        if self.seen >= self.limit {
            return Err(StrataError::SearchTerminated(Termination::CountLimit));
        }
        self.seen += 1;
        self.inner.collect(doc_id, score)
    }
}
