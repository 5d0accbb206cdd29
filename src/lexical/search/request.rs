//! Search requests and result pages.

use crate::lexical::query::{Collapse, DocSet, Hit, Query, SortKey};
use crate::lexical::search::searcher::SearchResults;

/// How a request is executed.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Maximum number of hits to return; `None` returns every match.
    pub limit: Option<usize>,
    /// Sort keys, most significant first. Empty means by relevance.
    pub sort_by: Vec<SortKey>,
    /// Only these documents may match.
    pub filter: Option<DocSet>,
    /// These documents never match.
    pub mask: Option<DocSet>,
    pub collapse: Option<Collapse>,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            limit: Some(10),
            sort_by: Vec::new(),
            filter: None,
            mask: None,
            collapse: None,
        }
    }
}

/// A query together with its [`SearchParams`].
///
/// ```
/// use strata::lexical::query::{DocSet, Query};
/// use strata::lexical::search::SearchRequest;
///
/// let request = SearchRequest::new(Query::term("body", "alfa"))
///     .limit(5)
///     .sort_by("price", false)
///     .sort_by("rating", true)
///     .mask(DocSet::from_iter([3]));
/// assert_eq!(request.params.sort_by.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: Query,
    pub params: SearchParams,
}

impl SearchRequest {
    pub fn new(query: Query) -> Self {
        SearchRequest {
            query,
            params: SearchParams::default(),
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.params.limit = Some(limit);
        self
    }

    /// Return every match.
    pub fn unlimited(mut self) -> Self {
        self.params.limit = None;
        self
    }

    /// Add a sort key after the existing ones.
    pub fn sort_by(mut self, field: &str, reverse: bool) -> Self {
        self.params.sort_by.push(SortKey {
            field: field.to_string(),
            reverse,
        });
        self
    }

    pub fn sort_by_keys(mut self, keys: Vec<SortKey>) -> Self {
        self.params.sort_by = keys;
        self
    }

    pub fn filter(mut self, filter: DocSet) -> Self {
        self.params.filter = Some(filter);
        self
    }

    pub fn mask(mut self, mask: DocSet) -> Self {
        self.params.mask = Some(mask);
        self
    }

    pub fn collapse(mut self, collapse: Collapse) -> Self {
        self.params.collapse = Some(collapse);
        self
    }
}

/// One page of the ranked or sorted hits of a search.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsPage {
    /// The hits of this page, in result order.
    pub hits: Vec<Hit>,
    /// Matching documents over all pages.
    pub total: u64,
    /// Page number, starting at 1, after clamping to the last page.
    pub page: usize,
    /// Number of pages; 0 when nothing matched.
    pub page_count: usize,
    /// Requested hits per page.
    pub per_page: usize,
    /// Position of the first hit of the page among all hits.
    pub offset: usize,
    pub partial: bool,
}

impl ResultsPage {
    /// Cut page `page` out of `results`, which must hold at least the hits
    /// up to the end of that page.
    pub(crate) fn new(results: SearchResults, page: usize, per_page: usize) -> Self {
        let page_count = results.total.div_ceil(per_page as u64) as usize;
        let page = page.clamp(1, page_count.max(1));
        let offset = (page - 1) * per_page;
        let hits = results.hits.into_iter().skip(offset).take(per_page).collect();
        ResultsPage {
            hits,
            total: results.total,
            page,
            page_count,
            per_page,
            offset,
            partial: results.partial,
        }
    }

    /// Hits on this page; less than `per_page` on the last one.
    pub fn page_len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn is_last_page(&self) -> bool {
        self.page_count == 0 || self.page == self.page_count
    }

    pub fn doc_ids(&self) -> Vec<u64> {
        self.hits.iter().map(|h| h.doc_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(total: u64) -> SearchResults {
        SearchResults {
            hits: (0..total).map(|doc_id| Hit { doc_id, score: 1.0 }).collect(),
            total,
            partial: false,
        }
    }

    #[test]
    fn test_pages_of_uneven_results() {
        let page = ResultsPage::new(results(54), 6, 10);
        assert_eq!(page.page_count, 6);
        assert_eq!(page.page_len(), 4);
        assert_eq!(page.offset, 50);
        assert!(page.is_last_page());

        let page = ResultsPage::new(results(54), 2, 10);
        assert_eq!(page.doc_ids(), (10..20).collect::<Vec<_>>());
        assert!(!page.is_last_page());
    }

    #[test]
    fn test_page_beyond_end_clamps_to_last() {
        let page = ResultsPage::new(results(54), 10, 10);
        assert_eq!(page.page, 6);
        assert_eq!(page.page_len(), 4);
    }

    #[test]
    fn test_empty_results_are_the_last_page() {
        let page = ResultsPage::new(results(0), 3, 10);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_count, 0);
        assert!(page.is_empty());
        assert!(page.is_last_page());
    }

    #[test]
    fn test_request_defaults() {
        let request = SearchRequest::new(Query::every());
        assert_eq!(request.params.limit, Some(10));
        assert!(request.params.sort_by.is_empty());
        assert_eq!(request.unlimited().params.limit, None);
    }
}
