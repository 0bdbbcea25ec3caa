//! Search request/response object.
//!
//! A [`SearchContext`] is created by the facade, which pre-fills the
//! index's metric, kind, data type, dimension, and vector byte size. The
//! caller sets the query, `top_k`, and options through the builder methods,
//! hands the context to `search`, and reads `results` (and `raw_vectors`
//! when requested) back out.

use crate::arena::AlignedBytes;
use crate::condition::SearchCondition;
use crate::config::{DataType, IndexKind, MetricType};
use crate::{DistanceType, LabelType, LocationType};
use std::sync::Arc;
use std::time::Instant;

/// One search hit. `location` is 0 unless the context asked for locations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub distance: DistanceType,
    pub label: LabelType,
    pub location: LocationType,
}

/// Request/response carrier for one search.
pub struct SearchContext {
    // Index metadata, set by the facade.
    pub(crate) metric: MetricType,
    pub(crate) index_kind: IndexKind,
    pub(crate) data_type: DataType,
    pub(crate) dimension: u32,
    pub(crate) data_size: usize,
    pub(crate) worker_num: u32,

    // Request.
    pub(crate) query: AlignedBytes,
    pub(crate) top_k: u32,
    /// Beam width override; 0 means the engine default.
    pub(crate) search_list_size: u32,
    pub(crate) with_location: bool,
    pub(crate) with_raw_vector: bool,
    pub(crate) reverse_result: bool,
    pub(crate) condition: Option<Arc<dyn SearchCondition>>,

    /// Set when the context is created.
    pub start_time: Instant,
    /// Stamped when the engine picks the query up.
    pub schedule_time: Option<Instant>,
    /// Stamped when the engine finishes.
    pub end_time: Option<Instant>,

    /// Hits ordered ascending by distance (descending with
    /// `reverse_result`).
    pub results: Vec<SearchResult>,
    /// Row bytes of each hit, parallel to `results`, filled only when
    /// requested.
    pub raw_vectors: Vec<Vec<u8>>,
}

impl SearchContext {
    pub(crate) fn new(
        metric: MetricType,
        index_kind: IndexKind,
        data_type: DataType,
        dimension: u32,
        worker_num: u32,
    ) -> Self {
        Self {
            metric,
            index_kind,
            data_type,
            dimension,
            data_size: dimension as usize * data_type.size(),
            worker_num,
            query: AlignedBytes::new(),
            top_k: 0,
            search_list_size: 0,
            with_location: false,
            with_raw_vector: false,
            reverse_result: false,
            condition: None,
            start_time: Instant::now(),
            schedule_time: None,
            end_time: None,
            results: Vec::new(),
            raw_vectors: Vec::new(),
        }
    }

    /// Copy the query bytes into the context's aligned buffer.
    pub fn with_query(&mut self, query: &[u8]) -> &mut Self {
        self.query.assign(query);
        self
    }

    pub fn with_top_k(&mut self, top_k: u32) -> &mut Self {
        self.top_k = top_k;
        self
    }

    pub fn with_search_list_size(&mut self, search_list_size: u32) -> &mut Self {
        self.search_list_size = search_list_size;
        self
    }

    pub fn with_location(&mut self, with_location: bool) -> &mut Self {
        self.with_location = with_location;
        self
    }

    pub fn with_raw_vector(&mut self, with_raw_vector: bool) -> &mut Self {
        self.with_raw_vector = with_raw_vector;
        self
    }

    pub fn with_reverse_result(&mut self, reverse_result: bool) -> &mut Self {
        self.reverse_result = reverse_result;
        self
    }

    pub fn with_worker_num(&mut self, worker_num: u32) -> &mut Self {
        self.worker_num = worker_num;
        self
    }

    pub fn with_condition(&mut self, condition: Arc<dyn SearchCondition>) -> &mut Self {
        self.condition = Some(condition);
        self
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    pub fn index_kind(&self) -> IndexKind {
        self.index_kind
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// Advisory fan-out width for callers running an external worker pool.
    pub fn worker_num(&self) -> u32 {
        self.worker_num
    }

    /// Expected query byte length: `dimension * scalar size`.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn top_k(&self) -> u32 {
        self.top_k
    }

    pub fn query_bytes(&self) -> &[u8] {
        self.query.as_slice()
    }

    pub fn has_condition(&self) -> bool {
        self.condition.is_some()
    }

    #[inline]
    pub fn is_exclude(&self, label: LabelType) -> bool {
        match &self.condition {
            Some(c) => c.is_exclude(label),
            None => false,
        }
    }

    #[inline]
    pub fn is_whitelist(&self, label: LabelType) -> bool {
        match &self.condition {
            Some(c) => c.is_whitelist(label),
            None => false,
        }
    }

    #[inline]
    pub fn should_stop_search(&self, distance: DistanceType) -> bool {
        match &self.condition {
            Some(c) => c.should_stop_search(distance),
            None => false,
        }
    }

    pub fn should_explain(&self) -> bool {
        match &self.condition {
            Some(c) => c.should_explain(),
            None => false,
        }
    }
}

impl std::fmt::Debug for SearchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchContext")
            .field("metric", &self.metric)
            .field("index_kind", &self.index_kind)
            .field("data_type", &self.data_type)
            .field("dimension", &self.dimension)
            .field("top_k", &self.top_k)
            .field("search_list_size", &self.search_list_size)
            .field("has_condition", &self.has_condition())
            .field("results", &self.results.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> SearchContext {
        SearchContext::new(MetricType::L2, IndexKind::Hnsw, DataType::Float32, 4, 0)
    }

    #[test]
    fn test_prefilled_metadata() {
        let ctx = context();
        assert_eq!(ctx.metric(), MetricType::L2);
        assert_eq!(ctx.dimension(), 4);
        assert_eq!(ctx.data_size(), 16);
        assert!(!ctx.has_condition());
    }

    #[test]
    fn test_builder_chain() {
        let mut ctx = context();
        let query = [0u8; 16];
        ctx.with_query(&query)
            .with_top_k(5)
            .with_search_list_size(32)
            .with_location(true)
            .with_reverse_result(true);
        assert_eq!(ctx.top_k(), 5);
        assert_eq!(ctx.search_list_size, 32);
        assert!(ctx.with_location);
        assert!(ctx.reverse_result);
        assert_eq!(ctx.query_bytes().len(), 16);
    }

    #[test]
    fn test_predicates_default_open_without_condition() {
        let ctx = context();
        assert!(!ctx.is_exclude(1));
        assert!(!ctx.is_whitelist(1));
        assert!(!ctx.should_stop_search(f32::MAX));
        assert!(!ctx.should_explain());
    }

    #[test]
    fn test_condition_is_consulted() {
        struct Odd;
        impl SearchCondition for Odd {
            fn is_exclude(&self, label: LabelType) -> bool {
                label % 2 == 1
            }
        }
        let mut ctx = context();
        ctx.with_condition(Arc::new(Odd));
        assert!(ctx.has_condition());
        assert!(ctx.is_exclude(3));
        assert!(!ctx.is_exclude(4));
    }
}
