//! Matcher tree evaluated over one segment.
//!
//! Every matcher walks the local document ids of its segment in ascending
//! order. The contract is the same for all variants: `id` is only valid
//! while `is_active`, `next` on an exhausted matcher is an error, and
//! `skip_to` never moves backwards.

use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::lexical::core::posting::{DocId, PostingMatcher};
use crate::lexical::index::segment::SegmentReader;
use crate::lexical::search::scoring::{CollectionStatistics, TermStatistics, Weighting};

fn exhausted(op: &str) -> StrataError {
    StrataError::invalid_state(format!("{op}() called on an exhausted matcher"))
}

/// Scores one term (or phrase) in documents of one segment.
#[derive(Debug, Clone)]
pub struct TermScorer {
    weighting: Arc<dyn Weighting>,
    term: TermStatistics,
    collection: CollectionStatistics,
    segment: Arc<SegmentReader>,
    field: String,
    boost: f32,
}

impl TermScorer {
    pub fn new(
        weighting: Arc<dyn Weighting>,
        term: TermStatistics,
        collection: CollectionStatistics,
        segment: Arc<SegmentReader>,
        field: &str,
        boost: f32,
    ) -> Self {
        TermScorer {
            weighting,
            term,
            collection,
            segment,
            field: field.to_string(),
            boost,
        }
    }

    pub fn score(&self, doc: DocId, weight: f32) -> f32 {
        let length = self.segment.field_length(&self.field, doc);
        self.boost * self.weighting.score(&self.term, weight, length, &self.collection)
    }
}

/// Every live document of the segment with a constant score.
#[derive(Debug)]
pub struct EveryMatcher {
    segment: Arc<SegmentReader>,
    current: DocId,
    end: DocId,
    boost: f32,
}

impl EveryMatcher {
    pub fn new(segment: Arc<SegmentReader>, boost: f32) -> Self {
        let end = segment.doc_count_all();
        let mut matcher = EveryMatcher {
            segment,
            current: 0,
            end,
            boost,
        };
        matcher.settle();
        matcher
    }

    fn settle(&mut self) {
        while self.current < self.end && self.segment.is_deleted(self.current) {
            self.current += 1;
        }
    }

    fn is_active(&self) -> bool {
        self.current < self.end
    }

    fn id(&self) -> Result<DocId> {
        if self.is_active() {
            Ok(self.current)
        } else {
            Err(exhausted("id"))
        }
    }

    fn next(&mut self) -> Result<()> {
        if !self.is_active() {
            return Err(exhausted("next"));
        }
        self.current += 1;
        self.settle();
        Ok(())
    }

    fn skip_to(&mut self, target: DocId) {
        if self.is_active() && target > self.current {
            self.current = target.min(self.end);
            self.settle();
        }
    }
}

/// Postings of one term.
#[derive(Debug)]
pub struct TermMatcher {
    postings: PostingMatcher,
    scorer: TermScorer,
}

impl TermMatcher {
    pub fn new(postings: PostingMatcher, scorer: TermScorer) -> Self {
        TermMatcher { postings, scorer }
    }

    fn score(&self) -> Result<f32> {
        Ok(self.scorer.score(self.postings.id()?, self.postings.weight()?))
    }
}

/// Documents matching any child; scores are summed over the children on
/// the current document. Exhausted children are dropped.
#[derive(Debug)]
pub struct UnionMatcher {
    children: Vec<Matcher>,
}

impl UnionMatcher {
    fn id(&self) -> Result<DocId> {
        let mut min: Option<DocId> = None;
        for child in &self.children {
            let id = child.id()?;
            min = Some(min.map_or(id, |m| m.min(id)));
        }
        min.ok_or_else(|| exhausted("id"))
    }

    fn next(&mut self) -> Result<()> {
        let current = self.id()?;
        for child in &mut self.children {
            if child.id()? == current {
                child.next()?;
            }
        }
        self.children.retain(Matcher::is_active);
        Ok(())
    }

    fn skip_to(&mut self, target: DocId) -> Result<()> {
        for child in &mut self.children {
            child.skip_to(target)?;
        }
        self.children.retain(Matcher::is_active);
        Ok(())
    }

    fn score(&self) -> Result<f32> {
        let current = self.id()?;
        let mut score = 0.0;
        for child in &self.children {
            if child.id()? == current {
                score += child.score()?;
            }
        }
        Ok(score)
    }
}

/// Documents matching every child, found by leapfrogging to the largest
/// current id until all children agree.
#[derive(Debug)]
pub struct IntersectionMatcher {
    children: Vec<Matcher>,
    active: bool,
}

impl IntersectionMatcher {
    fn new(children: Vec<Matcher>) -> Result<Self> {
        let active = !children.is_empty() && children.iter().all(Matcher::is_active);
        let mut matcher = IntersectionMatcher { children, active };
        matcher.align()?;
        Ok(matcher)
    }

    fn align(&mut self) -> Result<()> {
        while self.active {
            let mut target = 0;
            for child in &self.children {
                target = target.max(child.id()?);
            }
            let mut agreed = true;
            for child in &mut self.children {
                child.skip_to(target)?;
                if !child.is_active() {
                    self.active = false;
                    return Ok(());
                }
                if child.id()? != target {
                    agreed = false;
                }
            }
            if agreed {
                break;
            }
        }
        Ok(())
    }

    fn id(&self) -> Result<DocId> {
        match self.children.first() {
            Some(child) if self.active => child.id(),
            _ => Err(exhausted("id")),
        }
    }

    fn next(&mut self) -> Result<()> {
        if !self.active {
            return Err(exhausted("next"));
        }
        self.children[0].next()?;
        self.active = self.children[0].is_active();
        self.align()
    }

    fn skip_to(&mut self, target: DocId) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        for child in &mut self.children {
            child.skip_to(target)?;
            if !child.is_active() {
                self.active = false;
                return Ok(());
            }
        }
        self.align()
    }

    fn score(&self) -> Result<f32> {
        if !self.active {
            return Err(exhausted("score"));
        }
        let mut score = 0.0;
        for child in &self.children {
            score += child.score()?;
        }
        Ok(score)
    }
}

/// Documents of `positive` that `negative` does not match. Scores come
/// from `positive` only.
#[derive(Debug)]
pub struct AndNotMatcher {
    positive: Box<Matcher>,
    negative: Box<Matcher>,
}

impl AndNotMatcher {
    fn new(positive: Matcher, negative: Matcher) -> Result<Self> {
        let mut matcher = AndNotMatcher {
            positive: Box::new(positive),
            negative: Box::new(negative),
        };
        matcher.settle()?;
        Ok(matcher)
    }

    fn settle(&mut self) -> Result<()> {
        while self.positive.is_active() {
            let id = self.positive.id()?;
            self.negative.skip_to(id)?;
            if self.negative.is_active() && self.negative.id()? == id {
                self.positive.next()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.positive.next()?;
        self.settle()
    }

    fn skip_to(&mut self, target: DocId) -> Result<()> {
        self.positive.skip_to(target)?;
        self.settle()
    }
}

/// Documents where the terms occur in order, each within `slop` positions
/// of the previous one (1 = adjacent). The phrase frequency in a document
/// is the number of complete occurrences.
#[derive(Debug)]
pub struct PhraseMatcher {
    parts: Vec<PostingMatcher>,
    scorer: TermScorer,
    slop: u32,
    frequency: u32,
    active: bool,
}

impl PhraseMatcher {
    pub fn new(parts: Vec<PostingMatcher>, scorer: TermScorer, slop: u32) -> Result<Self> {
        let active = !parts.is_empty() && parts.iter().all(PostingMatcher::is_active);
        let mut matcher = PhraseMatcher {
            parts,
            scorer,
            slop: slop.max(1),
            frequency: 0,
            active,
        };
        matcher.align()?;
        Ok(matcher)
    }

    /// Advance until every part sits on the same document and the phrase
    /// occurs in it.
    fn align(&mut self) -> Result<()> {
        while self.active {
            if !self.align_docs()? {
                return Ok(());
            }
            self.frequency = phrase_frequency(&self.parts, self.slop)?;
            if self.frequency > 0 {
                return Ok(());
            }
            self.parts[0].next()?;
            self.active = self.parts[0].is_active();
        }
        Ok(())
    }

    fn align_docs(&mut self) -> Result<bool> {
        loop {
            let mut target = 0;
            for part in &self.parts {
                target = target.max(part.id()?);
            }
            let mut agreed = true;
            for part in &mut self.parts {
                part.skip_to(target)?;
                match part.current() {
                    None => {
                        self.active = false;
                        return Ok(false);
                    }
                    Some(id) if id != target => agreed = false,
                    Some(_) => {}
                }
            }
            if agreed {
                return Ok(true);
            }
        }
    }

    fn id(&self) -> Result<DocId> {
        if !self.active {
            return Err(exhausted("id"));
        }
        self.parts[0].id()
    }

    fn next(&mut self) -> Result<()> {
        if !self.active {
            return Err(exhausted("next"));
        }
        self.parts[0].next()?;
        self.active = self.parts[0].is_active();
        self.align()
    }

    fn skip_to(&mut self, target: DocId) -> Result<()> {
        if !self.active || self.id()? >= target {
            return Ok(());
        }
        self.parts[0].skip_to(target)?;
        self.active = self.parts[0].is_active();
        self.align()
    }

    fn score(&self) -> Result<f32> {
        Ok(self.scorer.score(self.id()?, self.frequency as f32))
    }
}

/// Number of phrase occurrences in the document all parts are on.
fn phrase_frequency(parts: &[PostingMatcher], slop: u32) -> Result<u32> {
    let Some((first, rest)) = parts.split_first() else {
        return Ok(0);
    };
    let mut current: Vec<u32> = first.positions()?.to_vec();
    for part in rest {
        if current.is_empty() {
            break;
        }
        let positions = part.positions()?;
        current = positions
            .iter()
            .copied()
            .filter(|p| current.iter().any(|c| *p > *c && p - c <= slop))
            .collect();
    }
    Ok(current.len() as u32)
}

/// A compiled query over one segment.
#[derive(Debug)]
pub enum Matcher {
    Empty,
    Every(EveryMatcher),
    Term(TermMatcher),
    Union(UnionMatcher),
    Intersection(IntersectionMatcher),
    AndNot(AndNotMatcher),
    Phrase(PhraseMatcher),
}

impl Matcher {
    /// Union of `children`, dropping the ones that match nothing.
    pub fn union(children: Vec<Matcher>) -> Matcher {
        let mut children: Vec<Matcher> = children.into_iter().filter(Matcher::is_active).collect();
        match children.len() {
            0 => Matcher::Empty,
            1 => children.pop().unwrap_or(Matcher::Empty),
            _ => Matcher::Union(UnionMatcher { children }),
        }
    }

    /// Intersection of `children`; empty when any child is.
    pub fn intersection(mut children: Vec<Matcher>) -> Result<Matcher> {
        if children.is_empty() || !children.iter().all(Matcher::is_active) {
            return Ok(Matcher::Empty);
        }
        if children.len() == 1 {
            return Ok(children.pop().unwrap_or(Matcher::Empty));
        }
        Ok(Matcher::Intersection(IntersectionMatcher::new(children)?))
    }

    pub fn and_not(positive: Matcher, negative: Matcher) -> Result<Matcher> {
        if !positive.is_active() {
            return Ok(Matcher::Empty);
        }
        if !negative.is_active() {
            return Ok(positive);
        }
        Ok(Matcher::AndNot(AndNotMatcher::new(positive, negative)?))
    }

    pub fn is_active(&self) -> bool {
        match self {
            Matcher::Empty => false,
            Matcher::Every(m) => m.is_active(),
            Matcher::Term(m) => m.postings.is_active(),
            Matcher::Union(m) => !m.children.is_empty(),
            Matcher::Intersection(m) => m.active,
            Matcher::AndNot(m) => m.positive.is_active(),
            Matcher::Phrase(m) => m.active,
        }
    }

    /// Current local document id.
    pub fn id(&self) -> Result<DocId> {
        match self {
            Matcher::Empty => Err(exhausted("id")),
            Matcher::Every(m) => m.id(),
            Matcher::Term(m) => m.postings.id(),
            Matcher::Union(m) => m.id(),
            Matcher::Intersection(m) => m.id(),
            Matcher::AndNot(m) => m.positive.id(),
            Matcher::Phrase(m) => m.id(),
        }
    }

    /// Move to the next matching document.
    pub fn next(&mut self) -> Result<()> {
        match self {
            Matcher::Empty => Err(exhausted("next")),
            Matcher::Every(m) => m.next(),
            Matcher::Term(m) => m.postings.next(),
            Matcher::Union(m) => m.next(),
            Matcher::Intersection(m) => m.next(),
            Matcher::AndNot(m) => m.next(),
            Matcher::Phrase(m) => m.next(),
        }
    }

    /// Move to the first matching document `>= target`. Does nothing when
    /// exhausted or already there.
    pub fn skip_to(&mut self, target: DocId) -> Result<()> {
        match self {
            Matcher::Empty => Ok(()),
            Matcher::Every(m) => {
                m.skip_to(target);
                Ok(())
            }
            Matcher::Term(m) => m.postings.skip_to(target),
            Matcher::Union(m) => m.skip_to(target),
            Matcher::Intersection(m) => m.skip_to(target),
            Matcher::AndNot(m) => m.skip_to(target),
            Matcher::Phrase(m) => m.skip_to(target),
        }
    }

    /// Score of the current document.
    pub fn score(&self) -> Result<f32> {
        match self {
            Matcher::Empty => Err(exhausted("score")),
            Matcher::Every(m) => m.id().map(|_| m.boost),
            Matcher::Term(m) => m.score(),
            Matcher::Union(m) => m.score(),
            Matcher::Intersection(m) => m.score(),
            Matcher::AndNot(m) => m.positive.score(),
            Matcher::Phrase(m) => m.score(),
        }
    }

    /// Remaining local ids, consuming the matcher.
    pub fn collect_ids(mut self) -> Result<Vec<DocId>> {
        let mut ids = Vec::new();
        while self.is_active() {
            ids.push(self.id()?);
            self.next()?;
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::search::scoring::Frequency;
    use crate::schema::{FieldConfig, Schema};
    use crate::storage::MemoryStorage;
    use crate::config::WriterConfig;
    use crate::document::DocumentBuilder;
    use crate::lexical::index::buffer::SegmentBuffer;

    fn segment(docs: &[&str]) -> Arc<SegmentReader> {
        let schema = Arc::new(
            Schema::new()
                .with_field("body", FieldConfig::text())
                .unwrap(),
        );
        let storage = MemoryStorage::new();
        let mut buffer = SegmentBuffer::new();
        for text in docs {
            let doc = DocumentBuilder::new().add_text("body", text).build();
            let staged = buffer.stage(&schema, doc).unwrap();
            buffer.append(staged);
        }
        let (info, _) = buffer
            .flush(&storage, "seg_test", &schema, &WriterConfig::default())
            .unwrap();
        Arc::new(SegmentReader::open(&storage, info, schema).unwrap())
    }

    fn scorer(segment: &Arc<SegmentReader>) -> TermScorer {
        TermScorer::new(
            Arc::new(Frequency),
            TermStatistics::default(),
            CollectionStatistics::default(),
            Arc::clone(segment),
            "body",
            1.0,
        )
    }

    fn term(segment: &Arc<SegmentReader>, text: &str) -> Matcher {
        match segment.postings("body", text.as_bytes()).unwrap() {
            Some(postings) => Matcher::Term(TermMatcher::new(postings, scorer(segment))),
            None => Matcher::Empty,
        }
    }

    #[test]
    fn test_union_and_intersection_ascend() {
        let segment = segment(&["a b", "b", "a c", "c", "a b c"]);
        let or = Matcher::union(vec![term(&segment, "b"), term(&segment, "c")]);
        assert_eq!(or.collect_ids().unwrap(), vec![0, 1, 2, 3, 4]);

        let and = Matcher::intersection(vec![term(&segment, "a"), term(&segment, "b")]).unwrap();
        assert_eq!(and.collect_ids().unwrap(), vec![0, 4]);

        let and = Matcher::intersection(vec![term(&segment, "a"), term(&segment, "zz")]).unwrap();
        assert!(!and.is_active());
    }

    #[test]
    fn test_union_sums_scores() {
        let segment = segment(&["a b", "b"]);
        let or = Matcher::union(vec![term(&segment, "a"), term(&segment, "b")]);
        assert_eq!(or.id().unwrap(), 0);
        assert_eq!(or.score().unwrap(), 2.0);
    }

    #[test]
    fn test_and_not_excludes() {
        let segment = segment(&["a b", "a", "a b", "a"]);
        let matcher = Matcher::and_not(term(&segment, "a"), term(&segment, "b")).unwrap();
        assert_eq!(matcher.collect_ids().unwrap(), vec![1, 3]);

        let every = Matcher::Every(EveryMatcher::new(Arc::clone(&segment), 1.0));
        let not = Matcher::and_not(every, term(&segment, "b")).unwrap();
        assert_eq!(not.collect_ids().unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_skip_to_is_monotonic() {
        let segment = segment(&["a", "b", "a", "b", "a", "a b"]);
        let mut matcher = Matcher::union(vec![term(&segment, "a"), term(&segment, "b")]);
        matcher.skip_to(3).unwrap();
        assert_eq!(matcher.id().unwrap(), 3);
        matcher.skip_to(1).unwrap();
        assert_eq!(matcher.id().unwrap(), 3);
        matcher.skip_to(6).unwrap();
        assert!(!matcher.is_active());
        assert!(matcher.next().is_err());
        assert!(matcher.id().is_err());
    }

    #[test]
    fn test_phrase_positions() {
        let segment = segment(&["a b c", "b a c", "a x b", "a b a b"]);
        let parts = |words: &[&str]| -> Vec<PostingMatcher> {
            words
                .iter()
                .map(|w| segment.postings("body", w.as_bytes()).unwrap().unwrap())
                .collect()
        };

        let phrase = PhraseMatcher::new(parts(&["a", "b"]), scorer(&segment), 1).unwrap();
        let mut matcher = Matcher::Phrase(phrase);
        assert_eq!(matcher.id().unwrap(), 0);
        matcher.next().unwrap();
        assert_eq!(matcher.id().unwrap(), 3);
        assert_eq!(matcher.score().unwrap(), 2.0);
        matcher.next().unwrap();
        assert!(!matcher.is_active());

        let sloppy = PhraseMatcher::new(parts(&["a", "b"]), scorer(&segment), 2).unwrap();
        assert_eq!(Matcher::Phrase(sloppy).collect_ids().unwrap(), vec![0, 2, 3]);

        let zero = PhraseMatcher::new(parts(&["a", "b"]), scorer(&segment), 0).unwrap();
        assert_eq!(Matcher::Phrase(zero).collect_ids().unwrap(), vec![0, 3]);
    }

    #[test]
    fn test_every_matcher() {
        let segment = segment(&["a", "b", "c"]);
        let mut every = Matcher::Every(EveryMatcher::new(segment, 2.0));
        assert_eq!(every.score().unwrap(), 2.0);
        every.skip_to(2).unwrap();
        assert_eq!(every.id().unwrap(), 2);
        every.next().unwrap();
        assert!(!every.is_active());
    }

    #[test]
    fn test_empty_matcher() {
        let mut empty = Matcher::Empty;
        assert!(!empty.is_active());
        assert!(empty.skip_to(3).is_ok());
        assert!(matches!(empty.next(), Err(StrataError::InvalidState(_))));
    }
}
