//! Query execution over a reader snapshot.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, StrataError, Termination};
use crate::lexical::core::column::ColumnValue;
use crate::lexical::query::{
    AllCollector, CollapseCollector, CompileContext, Collector, CountCollector, DocSet, FacetCollector,
    FilterCollector, Hit, Query, SegmentContext, SortingCollector, TimeLimitCollector, TopDocsCollector,
};
use crate::lexical::reader::IndexReader;
use crate::lexical::search::request::{ResultsPage, SearchParams, SearchRequest};
use crate::lexical::search::scoring::{Bm25, Weighting};

/// How a collecting search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchOutcome {
    /// Set when a collector stopped the search early.
    pub terminated: Option<Termination>,
    /// Documents handed to the collector.
    pub matched: u64,
}

impl SearchOutcome {
    pub fn is_partial(&self) -> bool {
        self.terminated.is_some()
    }
}

/// Ranked hits of a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    /// Best hits first.
    pub hits: Vec<Hit>,
    /// Matching documents, including the ones beyond the limit.
    pub total: u64,
    /// True when the search stopped before visiting every match.
    pub partial: bool,
}

impl SearchResults {
    pub fn doc_ids(&self) -> Vec<u64> {
        self.hits.iter().map(|h| h.doc_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

/// Runs queries against one snapshot.
#[derive(Debug, Clone)]
pub struct Searcher {
    reader: IndexReader,
    weighting: Arc<dyn Weighting>,
    time_limit: Option<Duration>,
}

impl Searcher {
    pub fn new(reader: IndexReader) -> Self {
        Searcher {
            reader,
            weighting: Arc::new(Bm25::default()),
            time_limit: None,
        }
    }

    pub fn with_weighting(mut self, weighting: Arc<dyn Weighting>) -> Self {
        self.weighting = weighting;
        self
    }

    /// Bound the time of the ranked searches of this searcher.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn reader(&self) -> &IndexReader {
        &self.reader
    }

    pub fn weighting(&self) -> &Arc<dyn Weighting> {
        &self.weighting
    }

    /// The `limit` best matches of `query`.
    pub fn search(&self, query: &Query, limit: usize) -> Result<SearchResults> {
        self.execute(&SearchRequest::new(query.clone()).limit(limit))
    }

    /// Matches of `query` ordered by the column of `field`; documents
    /// without a value come last.
    pub fn search_sorted(&self, query: &Query, field: &str, reverse: bool, limit: usize) -> Result<SearchResults> {
        self.execute(&SearchRequest::new(query.clone()).sort_by(field, reverse).limit(limit))
    }

    /// Page `page` (from 1) of the ranked matches of `query`, `page_len`
    /// hits per page.
    pub fn search_page(&self, query: &Query, page: usize, page_len: usize) -> Result<ResultsPage> {
        self.execute_page(&SearchRequest::new(query.clone()), page, page_len)
    }

    /// Page `page` of the results of `request`; its limit is ignored. A
    /// page past the end yields the last page.
    pub fn execute_page(&self, request: &SearchRequest, page: usize, page_len: usize) -> Result<ResultsPage> {
        if page == 0 {
            return Err(StrataError::invalid_argument("page numbers start at 1"));
        }
        if page_len == 0 {
            return Err(StrataError::invalid_argument("page length must be positive"));
        }
        let mut request = request.clone();
        request.params.limit = Some(page.saturating_mul(page_len));
        let results = self.execute(&request)?;
        Ok(ResultsPage::new(results, page, page_len))
    }

    /// Run a request: restrict the matches to its filter and mask, collapse
    /// them, then rank or sort the rest. `total` counts the documents left
    /// after filtering and collapsing.
    pub fn execute(&self, request: &SearchRequest) -> Result<SearchResults> {
        let params = &request.params;
        let limit = params.limit.unwrap_or(usize::MAX);
        if params.sort_by.is_empty() {
            let (top, outcome) = self.run(&request.query, params, TopDocsCollector::new(limit))?;
            Ok(SearchResults {
                total: top.total_hits(),
                hits: top.into_hits(),
                partial: outcome.is_partial(),
            })
        } else {
            let sorting = SortingCollector::by(params.sort_by.clone()).limit(limit);
            let (sorting, outcome) = self.run(&request.query, params, sorting)?;
            Ok(SearchResults {
                total: sorting.total_hits(),
                hits: sorting.into_hits(),
                partial: outcome.is_partial(),
            })
        }
    }

    /// The matches of `query` as a set, for use as a filter or mask.
    pub fn doc_set(&self, query: &Query) -> Result<DocSet> {
        Ok(self.doc_ids(query)?.into_iter().collect())
    }

    fn run<C: Collector>(&self, query: &Query, params: &SearchParams, inner: C) -> Result<(C, SearchOutcome)> {
        match &params.collapse {
            Some(collapse) => {
                let collapsing = CollapseCollector::new(inner, collapse.clone());
                let mut filtered = FilterCollector::new(collapsing)
                    .allow(params.filter.as_ref())
                    .deny(params.mask.as_ref());
                let outcome = self.search_timed(query, &mut filtered)?;
                let collapsing = filtered.into_inner();
                debug!(collapsed = collapsing.collapsed(), "collapsed matches");
                Ok((collapsing.finish()?, outcome))
            }
            None => {
                let mut filtered = FilterCollector::new(inner)
                    .allow(params.filter.as_ref())
                    .deny(params.mask.as_ref());
                let outcome = self.search_timed(query, &mut filtered)?;
                Ok((filtered.into_inner(), outcome))
            }
        }
    }

    fn search_timed<C: Collector>(&self, query: &Query, collector: &mut C) -> Result<SearchOutcome> {
        match self.time_limit {
            Some(time_limit) => self.search_with(query, &mut TimeLimitCollector::new(collector, time_limit)),
            None => self.search_with(query, collector),
        }
    }

    /// Number of live documents matching `query`.
    pub fn count(&self, query: &Query) -> Result<u64> {
        let mut counter = CountCollector::new();
        self.search_with(query, &mut counter)?;
        Ok(counter.count())
    }

    /// Global ids of every match, ascending.
    pub fn doc_ids(&self, query: &Query) -> Result<Vec<u64>> {
        let mut all = AllCollector::new();
        self.search_with(query, &mut all)?;
        Ok(all.doc_ids())
    }

    /// Matches of `query` grouped by the column value of `field`.
    pub fn facets(&self, query: &Query, field: &str) -> Result<Vec<(Option<ColumnValue>, Vec<u64>)>> {
        let mut facets = FacetCollector::new(field);
        self.search_with(query, &mut facets)?;
        Ok(facets.into_groups())
    }

    /// Feed every live match of `query` to `collector`, segment by segment
    /// in id order. A collector ending the search early yields an outcome
    /// with `terminated` set rather than an error.
    pub fn search_with<C: Collector + ?Sized>(&self, query: &Query, collector: &mut C) -> Result<SearchOutcome> {
        let mut matched = 0;
        match self.collect_segments(query, collector, &mut matched) {
            Ok(()) => Ok(SearchOutcome {
                terminated: None,
                matched,
            }),
            Err(StrataError::SearchTerminated(reason)) => {
                debug!(%reason, matched, "search terminated early");
                Ok(SearchOutcome {
                    terminated: Some(reason),
                    matched,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn collect_segments<C: Collector + ?Sized>(&self, query: &Query, collector: &mut C, matched: &mut u64) -> Result<()> {
        let needs_scores = collector.needs_scores();
        for (ord, segment) in self.reader.segments().iter().enumerate() {
            let ctx = CompileContext {
                reader: &self.reader,
                segment,
                weighting: &self.weighting,
            };
            let mut matcher = query.matcher(&ctx)?;
            if !matcher.is_active() {
                continue;
            }
            let offset = self.reader.segment_offset(ord);
            collector.set_segment(&SegmentContext {
                ord,
                offset,
                segment: Arc::clone(segment),
            })?;
            while matcher.is_active() {
                let local = matcher.id()?;
                if !segment.is_deleted(local) {
                    let score = if needs_scores { matcher.score()? } else { 0.0 };
                    collector.collect(offset + local as u64, score)?;
                    *matched += 1;
                }
                matcher.next()?;
            }
        }
        Ok(())
    }
}
