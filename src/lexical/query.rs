//! Query trees and their compilation into matchers.
//!
//! A [`Query`] is built by the caller (there is no query parser) and
//! compiled once per segment into a [`Matcher`]. Term statistics used for
//! scoring are taken from the whole snapshot, not the segment.
//!
//! ```
//! use strata::lexical::query::Query;
//!
//! let query = Query::and(vec![
//!     Query::term("body", "rust"),
//!     Query::not(Query::term("body", "python")),
//! ]);
//! assert_eq!(query.terms(), vec![
//!     ("body".to_string(), b"rust".to_vec()),
//!     ("body".to_string(), b"python".to_vec()),
//! ]);
//! ```

pub mod collector;
pub mod filter;
pub mod matcher;

use std::ops::Bound;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::lexical::core::terms::TermInfo;
use crate::lexical::index::segment::SegmentReader;
use crate::lexical::reader::IndexReader;
use crate::lexical::search::scoring::{CollectionStatistics, TermStatistics, Weighting};
use crate::util::numeric::encode_i64;

pub use collector::{
    AllCollector, Collapse, CollapseCollector, Collector, CountCollector, CountLimitCollector, FacetCollector, Hit,
    SegmentContext, SortKey, SortingCollector, TimeLimitCollector, TopDocsCollector,
};
pub use filter::{DocSet, FilterCollector};
pub use matcher::{
    AndNotMatcher, EveryMatcher, IntersectionMatcher, Matcher, PhraseMatcher, TermMatcher, TermScorer,
    UnionMatcher,
};

/// A query over the terms of an index.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Documents containing `term` in `field`.
    Term { field: String, term: Vec<u8>, boost: f32 },
    /// Documents containing any term of `field` starting with `prefix`.
    Prefix { field: String, prefix: Vec<u8>, boost: f32 },
    /// Documents containing any term of `field` within the byte range.
    TermRange {
        field: String,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        boost: f32,
    },
    /// Documents whose numeric term of `field` lies within the range.
    NumericRange {
        field: String,
        start: Bound<i64>,
        end: Bound<i64>,
        boost: f32,
    },
    /// Documents containing `terms` in order, each at most `slop` positions
    /// after the previous one.
    Phrase {
        field: String,
        terms: Vec<Vec<u8>>,
        slop: u32,
        boost: f32,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
    AndNot { positive: Box<Query>, negative: Box<Query> },
    /// Every document the child does not match.
    Not(Box<Query>),
    Every { boost: f32 },
    Empty,
}

impl Query {
    pub fn term(field: &str, term: impl Into<Vec<u8>>) -> Self {
        Query::Term {
            field: field.to_string(),
            term: term.into(),
            boost: 1.0,
        }
    }

    pub fn prefix(field: &str, prefix: impl Into<Vec<u8>>) -> Self {
        Query::Prefix {
            field: field.to_string(),
            prefix: prefix.into(),
            boost: 1.0,
        }
    }

    pub fn term_range(field: &str, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Self {
        Query::TermRange {
            field: field.to_string(),
            start,
            end,
            boost: 1.0,
        }
    }

    pub fn numeric_range(field: &str, start: Bound<i64>, end: Bound<i64>) -> Self {
        Query::NumericRange {
            field: field.to_string(),
            start,
            end,
            boost: 1.0,
        }
    }

    /// Adjacent phrase.
    pub fn phrase<T: Into<Vec<u8>>>(field: &str, terms: impl IntoIterator<Item = T>) -> Self {
        Query::Phrase {
            field: field.to_string(),
            terms: terms.into_iter().map(Into::into).collect(),
            slop: 1,
            boost: 1.0,
        }
    }

    /// Set the slop of a phrase; other queries are returned unchanged.
    pub fn with_slop(self, slop: u32) -> Self {
        match self {
            Query::Phrase {
                field, terms, boost, ..
            } => Query::Phrase {
                field,
                terms,
                slop,
                boost,
            },
            other => other,
        }
    }

    pub fn and(children: Vec<Query>) -> Self {
        Query::And(children)
    }

    pub fn or(children: Vec<Query>) -> Self {
        Query::Or(children)
    }

    pub fn and_not(positive: Query, negative: Query) -> Self {
        Query::AndNot {
            positive: Box::new(positive),
            negative: Box::new(negative),
        }
    }

    pub fn not(child: Query) -> Self {
        Query::Not(Box::new(child))
    }

    pub fn every() -> Self {
        Query::Every { boost: 1.0 }
    }

    pub fn empty() -> Self {
        Query::Empty
    }

    /// Multiply the boost of every leaf by `factor`.
    pub fn with_boost(self, factor: f32) -> Self {
        match self {
            Query::Term { field, term, boost } => Query::Term {
                field,
                term,
                boost: boost * factor,
            },
            Query::Prefix { field, prefix, boost } => Query::Prefix {
                field,
                prefix,
                boost: boost * factor,
            },
            Query::TermRange {
                field,
                start,
                end,
                boost,
            } => Query::TermRange {
                field,
                start,
                end,
                boost: boost * factor,
            },
            Query::NumericRange {
                field,
                start,
                end,
                boost,
            } => Query::NumericRange {
                field,
                start,
                end,
                boost: boost * factor,
            },
            Query::Phrase {
                field,
                terms,
                slop,
                boost,
            } => Query::Phrase {
                field,
                terms,
                slop,
                boost: boost * factor,
            },
            Query::And(children) => Query::And(children.into_iter().map(|q| q.with_boost(factor)).collect()),
            Query::Or(children) => Query::Or(children.into_iter().map(|q| q.with_boost(factor)).collect()),
            Query::AndNot { positive, negative } => Query::AndNot {
                positive: Box::new(positive.with_boost(factor)),
                negative,
            },
            Query::Not(child) => Query::Not(child),
            Query::Every { boost } => Query::Every { boost: boost * factor },
            Query::Empty => Query::Empty,
        }
    }

    /// The literal `(field, term)` pairs of the tree, in tree order.
    /// Prefixes and ranges contribute nothing.
    pub fn terms(&self) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        self.collect_terms(&mut out);
        out
    }

    fn collect_terms(&self, out: &mut Vec<(String, Vec<u8>)>) {
        match self {
            Query::Term { field, term, .. } => out.push((field.clone(), term.clone())),
            Query::Phrase { field, terms, .. } => {
                out.extend(terms.iter().map(|t| (field.clone(), t.clone())));
            }
            Query::And(children) | Query::Or(children) => {
                for child in children {
                    child.collect_terms(out);
                }
            }
            Query::AndNot { positive, negative } => {
                positive.collect_terms(out);
                negative.collect_terms(out);
            }
            Query::Not(child) => child.collect_terms(out),
            Query::Prefix { .. }
            | Query::TermRange { .. }
            | Query::NumericRange { .. }
            | Query::Every { .. }
            | Query::Empty => {}
        }
    }

    /// Compile the query for one segment.
    pub(crate) fn matcher(&self, ctx: &CompileContext<'_>) -> Result<Matcher> {
        match self {
            Query::Term { field, term, boost } => match ctx.segment.term_info(field, term)? {
                Some(info) => ctx.term_matcher(field, term, &info, *boost),
                None => Ok(Matcher::Empty),
            },
            Query::Prefix { field, prefix, boost } => {
                let mut children = Vec::new();
                for entry in ctx.segment.terms().prefix(field, prefix) {
                    let (term, info) = entry?;
                    children.push(ctx.term_matcher(field, &term, &info, *boost)?);
                }
                Ok(Matcher::union(children))
            }
            Query::TermRange {
                field,
                start,
                end,
                boost,
            } => ctx.range_matcher(field, as_slice(start), as_slice(end), *boost),
            Query::NumericRange {
                field,
                start,
                end,
                boost,
            } => {
                let start = encode_bound(start);
                let end = encode_bound(end);
                ctx.range_matcher(field, as_slice(&start), as_slice(&end), *boost)
            }
            Query::Phrase {
                field,
                terms,
                slop,
                boost,
            } => ctx.phrase_matcher(field, terms, *slop, *boost),
            Query::And(children) => {
                let matchers = children
                    .iter()
                    .map(|child| child.matcher(ctx))
                    .collect::<Result<Vec<_>>>()?;
                Matcher::intersection(matchers)
            }
            Query::Or(children) => {
                let matchers = children
                    .iter()
                    .map(|child| child.matcher(ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Matcher::union(matchers))
            }
            Query::AndNot { positive, negative } => {
                Matcher::and_not(positive.matcher(ctx)?, negative.matcher(ctx)?)
            }
            Query::Not(child) => {
                let every = Matcher::Every(EveryMatcher::new(Arc::clone(ctx.segment), 1.0));
                Matcher::and_not(every, child.matcher(ctx)?)
            }
            Query::Every { boost } => Ok(Matcher::Every(EveryMatcher::new(Arc::clone(ctx.segment), *boost))),
            Query::Empty => Ok(Matcher::Empty),
        }
    }
}

fn as_slice(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn encode_bound(bound: &Bound<i64>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(v) => Bound::Included(encode_i64(*v).to_vec()),
        Bound::Excluded(v) => Bound::Excluded(encode_i64(*v).to_vec()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// What a query needs to compile against one segment of a snapshot.
pub(crate) struct CompileContext<'a> {
    pub reader: &'a IndexReader,
    pub segment: &'a Arc<SegmentReader>,
    pub weighting: &'a Arc<dyn Weighting>,
}

impl CompileContext<'_> {
    fn collection(&self, field: &str) -> CollectionStatistics {
        CollectionStatistics {
            doc_count: self.reader.doc_count(),
            doc_count_all: self.reader.doc_count_all(),
            avg_field_length: self.reader.avg_field_length(field),
        }
    }

    fn term_statistics(&self, field: &str, term: &[u8]) -> Result<TermStatistics> {
        Ok(match self.reader.term_info(field, term)? {
            Some(stats) => TermStatistics {
                doc_frequency: stats.doc_frequency,
                total_weight: stats.total_weight,
            },
            None => TermStatistics::default(),
        })
    }

    fn scorer(&self, field: &str, term: TermStatistics, boost: f32) -> TermScorer {
        TermScorer::new(
            Arc::clone(self.weighting),
            term,
            self.collection(field),
            Arc::clone(self.segment),
            field,
            boost,
        )
    }

    fn term_matcher(&self, field: &str, term: &[u8], info: &TermInfo, boost: f32) -> Result<Matcher> {
        let postings = self.segment.matcher(field, info)?;
        let stats = self.term_statistics(field, term)?;
        Ok(Matcher::Term(TermMatcher::new(postings, self.scorer(field, stats, boost))))
    }

    fn range_matcher(&self, field: &str, start: Bound<&[u8]>, end: Bound<&[u8]>, boost: f32) -> Result<Matcher> {
        let mut children = Vec::new();
        for entry in self.segment.terms().range(field, start, end) {
            let (term, info) = entry?;
            children.push(self.term_matcher(field, &term, &info, boost)?);
        }
        Ok(Matcher::union(children))
    }

    fn phrase_matcher(&self, field: &str, terms: &[Vec<u8>], slop: u32, boost: f32) -> Result<Matcher> {
        let Some(config) = self.reader.schema().get(field) else {
            return Ok(Matcher::Empty);
        };
        if !config.indexed.is_some_and(|format| format.has_positions()) {
            return Err(StrataError::query(format!(
                "phrase search needs positions, field '{field}' does not record them"
            )));
        }
        match terms {
            [] => return Ok(Matcher::Empty),
            [term] => {
                return match self.segment.term_info(field, term)? {
                    Some(info) => self.term_matcher(field, term, &info, boost),
                    None => Ok(Matcher::Empty),
                };
            }
            _ => {}
        }

        let mut parts = Vec::with_capacity(terms.len());
        // The phrase is scored with the statistics of its rarest term.
        let mut rarest: Option<TermStatistics> = None;
        for term in terms {
            let Some(info) = self.segment.term_info(field, term)? else {
                return Ok(Matcher::Empty);
            };
            parts.push(self.segment.matcher(field, &info)?);
            let stats = self.term_statistics(field, term)?;
            rarest = match rarest {
                Some(r) if r.doc_frequency <= stats.doc_frequency => Some(r),
                _ => Some(stats),
            };
        }
        let scorer = self.scorer(field, rarest.unwrap_or_default(), boost);
        Ok(Matcher::Phrase(PhraseMatcher::new(parts, scorer, slop)?))
    }
}
