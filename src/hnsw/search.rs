//! HNSW search procedures.
//!
//! Three walks share the graph: the greedy single-candidate descent through
//! the upper levels, the construction-time base-layer beam search, and the
//! query-time beam search that honors deletion marks and the context's
//! condition. Upper-level adjacency is read under the owning node's mutex;
//! level-0 adjacency is read lock-free.

use crate::context::{SearchContext, SearchResult};
use crate::error::{IndexError, Result};
use crate::hnsw::graph::HnswIndex;
use crate::{DistanceType, LabelType, LocationType};
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;
use std::sync::atomic::Ordering;
use std::time::Instant;

/// Result-heap entry: worst candidate on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GraphCandidate {
    pub distance: OrderedFloat<DistanceType>,
    pub location: LocationType,
}

impl Ord for GraphCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.location.cmp(&other.location))
    }
}

impl PartialOrd for GraphCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Frontier entry keyed by negated distance, so the most promising
/// expansion sits on top of the max-heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrontierEntry {
    neg_distance: OrderedFloat<DistanceType>,
    location: LocationType,
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance
            .cmp(&other.neg_distance)
            .then_with(|| self.location.cmp(&other.location))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Query result-heap entry; carries the label so exclusion is checked once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueryCandidate {
    pub distance: OrderedFloat<DistanceType>,
    pub label: LabelType,
    pub location: LocationType,
}

impl Ord for QueryCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.location.cmp(&other.location))
    }
}

impl PartialOrd for QueryCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl HnswIndex {
    /// Greedy single-candidate walk from `start` through levels
    /// `hi ..= lo` (descending, `lo >= 1`): at each level, hop to the
    /// neighbor closest to `query` until no neighbor improves.
    pub(crate) fn greedy_descent(
        &self,
        query: &[u8],
        start: LocationType,
        hi: i32,
        lo: i32,
    ) -> Result<LocationType> {
        let mut curr = start;
        let mut curdist = self.dist_to_query(query, curr);
        for level in (lo..=hi).rev() {
            let mut changed = true;
            while changed {
                changed = false;
                let _guard = self.node_locks[curr as usize].lock();
                let list = self.linklist_at_level(curr, level as usize)?;
                self.metric_hops.fetch_add(1, Ordering::Relaxed);
                self.metric_distance_computations
                    .fetch_add(list.len() as u64, Ordering::Relaxed);
                for cand in list.iter() {
                    if cand as usize >= self.max_elements() {
                        return Err(IndexError::Internal(format!(
                            "neighbor {cand} is outside the index"
                        )));
                    }
                    let d = self.dist_to_query(query, cand);
                    if d < curdist {
                        curdist = d;
                        curr = cand;
                        changed = true;
                    }
                }
            }
        }
        Ok(curr)
    }

    /// Construction-time beam search on one layer.
    ///
    /// Returns up to `ef_construction` candidates closest to `query`,
    /// excluding deletion-marked nodes from the results while still
    /// walking through them.
    pub(crate) fn search_base_layer(
        &self,
        ep_id: LocationType,
        query: &[u8],
        level: usize,
    ) -> Result<BinaryHeap<GraphCandidate>> {
        let mut visited = self.visited_pool.acquire();
        let mut top_candidates: BinaryHeap<GraphCandidate> = BinaryHeap::new();
        let mut frontier: BinaryHeap<FrontierEntry> = BinaryHeap::new();

        let mut lower_bound;
        if !self.is_marked_deleted(ep_id) {
            let dist = self.dist_to_query(query, ep_id);
            top_candidates.push(GraphCandidate {
                distance: OrderedFloat(dist),
                location: ep_id,
            });
            lower_bound = dist;
            frontier.push(FrontierEntry {
                neg_distance: OrderedFloat(-dist),
                location: ep_id,
            });
        } else {
            lower_bound = DistanceType::MAX;
            frontier.push(FrontierEntry {
                neg_distance: OrderedFloat(-lower_bound),
                location: ep_id,
            });
        }
        visited.mark(ep_id);

        while let Some(entry) = frontier.pop() {
            let cand_dist = -entry.neg_distance.0;
            if cand_dist > lower_bound && top_candidates.len() == self.ef_construction {
                break;
            }
            let curr = entry.location;

            // Level 0 is read lock-free; upper lists under the node lock.
            let guard = (level > 0).then(|| self.node_locks[curr as usize].lock());
            let list = self.linklist_at_level(curr, level)?;
            for neighbor in list.iter() {
                if !visited.mark(neighbor) {
                    continue;
                }
                let dist = self.dist_to_query(query, neighbor);
                if top_candidates.len() < self.ef_construction || lower_bound > dist {
                    frontier.push(FrontierEntry {
                        neg_distance: OrderedFloat(-dist),
                        location: neighbor,
                    });
                    if !self.is_marked_deleted(neighbor) {
                        top_candidates.push(GraphCandidate {
                            distance: OrderedFloat(dist),
                            location: neighbor,
                        });
                    }
                    if top_candidates.len() > self.ef_construction {
                        top_candidates.pop();
                    }
                    if let Some(worst) = top_candidates.peek() {
                        lower_bound = worst.distance.0;
                    }
                }
            }
            drop(guard);
        }
        Ok(top_candidates)
    }

    /// Query-time beam search on the base layer.
    ///
    /// `HAS_DELETIONS` specializes away the deletion checks when nothing is
    /// marked. A candidate enters the result heap only if it is not
    /// deletion-marked and not excluded by the context's condition;
    /// excluded and deleted nodes still feed the frontier.
    fn search_level0_query<const HAS_DELETIONS: bool>(
        &self,
        ep_id: LocationType,
        context: &SearchContext,
        ef: usize,
    ) -> Result<BinaryHeap<QueryCandidate>> {
        let query = context.query_bytes();
        let mut visited = self.visited_pool.acquire();
        let mut results: BinaryHeap<QueryCandidate> = BinaryHeap::with_capacity(ef + 1);
        let mut frontier: BinaryHeap<FrontierEntry> = BinaryHeap::new();

        let bare_walk = !HAS_DELETIONS && !context.has_condition();
        let ep_label = self.label(ep_id);
        let mut lower_bound;
        if (!HAS_DELETIONS || !self.is_marked_deleted(ep_id)) && !context.is_exclude(ep_label) {
            let dist = self.dist_to_query(query, ep_id);
            lower_bound = dist;
            results.push(QueryCandidate {
                distance: OrderedFloat(dist),
                label: ep_label,
                location: ep_id,
            });
            frontier.push(FrontierEntry {
                neg_distance: OrderedFloat(-dist),
                location: ep_id,
            });
        } else {
            lower_bound = DistanceType::MAX;
            frontier.push(FrontierEntry {
                neg_distance: OrderedFloat(-lower_bound),
                location: ep_id,
            });
        }
        visited.mark(ep_id);

        while let Some(entry) = frontier.pop() {
            let cand_dist = -entry.neg_distance.0;
            if cand_dist > lower_bound && (results.len() == ef || bare_walk) {
                break;
            }
            if context.should_stop_search(cand_dist) {
                break;
            }

            let list = self.linklist_at_level(entry.location, 0)?;
            self.metric_hops.fetch_add(1, Ordering::Relaxed);
            self.metric_distance_computations
                .fetch_add(list.len() as u64, Ordering::Relaxed);

            for neighbor in list.iter() {
                if !visited.mark(neighbor) {
                    continue;
                }
                let dist = self.dist_to_query(query, neighbor);
                if results.len() < ef || lower_bound > dist {
                    frontier.push(FrontierEntry {
                        neg_distance: OrderedFloat(-dist),
                        location: neighbor,
                    });
                    let label = self.label(neighbor);
                    if (!HAS_DELETIONS || !self.is_marked_deleted(neighbor))
                        && !context.is_exclude(label)
                    {
                        results.push(QueryCandidate {
                            distance: OrderedFloat(dist),
                            label,
                            location: neighbor,
                        });
                    }
                    if results.len() > ef {
                        results.pop();
                    }
                    if let Some(worst) = results.peek() {
                        lower_bound = worst.distance.0;
                    }
                }
            }
        }
        Ok(results)
    }

    /// Answer `context`: greedy descent through the upper levels, then a
    /// base-layer beam search of width `max(ef, top_k)`, then trim to
    /// `top_k`.
    pub fn search(&self, context: &mut SearchContext) -> Result<()> {
        context.schedule_time = Some(Instant::now());
        context.results.clear();
        context.raw_vectors.clear();

        let Some((entry, max_level)) = self.entry_point() else {
            context.end_time = Some(Instant::now());
            return Ok(());
        };
        let query_len = context.query_bytes().len();
        if query_len != self.space.data_size() {
            context.end_time = Some(Instant::now());
            return Err(IndexError::InvalidArgument(format!(
                "query must be {} bytes, got {query_len}",
                self.space.data_size()
            )));
        }

        let query = context.query_bytes();
        let curr = if max_level > 0 {
            self.greedy_descent(query, entry, max_level, 1)?
        } else {
            entry
        };

        let base_ef = if context.search_list_size > 0 {
            context.search_list_size as usize
        } else {
            self.default_ef()
        };
        let ef = base_ef.max(context.top_k as usize);
        let mut top = if self.deleted_count() > 0 {
            self.search_level0_query::<true>(curr, context, ef)?
        } else {
            self.search_level0_query::<false>(curr, context, ef)?
        };

        while top.len() > context.top_k as usize {
            top.pop();
        }

        let with_location = context.with_location;
        let mut results = Vec::with_capacity(top.len());
        let mut locations = Vec::with_capacity(top.len());
        while let Some(cand) = top.pop() {
            results.push(SearchResult {
                distance: cand.distance.0,
                label: cand.label,
                location: if with_location { cand.location } else { 0 },
            });
            locations.push(cand.location);
        }
        if !context.reverse_result {
            // The heap drains worst-first.
            results.reverse();
            locations.reverse();
        }
        if context.with_raw_vector {
            for &loc in &locations {
                context.raw_vectors.push(self.vector(loc).to_vec());
            }
        }
        context.results = results;
        context.end_time = Some(Instant::now());
        Ok(())
    }
}
