//! HNSW insertion, update, and slot reuse.
//!
//! A fresh insert draws an exponential level, descends the upper levels
//! greedily, runs the base-layer beam search per level, and connects the
//! node to up to `m` diverse neighbors under the pruning heuristic. The
//! node's own lists are written first, for every level, before any
//! back-edge is published, so the node only becomes reachable once its
//! outgoing adjacency is complete; at most one node lock is held at a
//! time. Inserting an existing label rewrites the vector in place and
//! repairs the adjacency around the node. With replace-deleted enabled, an
//! insert can reclaim a lazily-deleted slot instead of consuming a new one.

use crate::config::WriteConfig;
use crate::error::{IndexError, Result};
use crate::hnsw::graph::{link_count, HnswIndex};
use crate::hnsw::search::GraphCandidate;
use crate::{LabelType, LocationType};
use ordered_float::OrderedFloat;
use rand::Rng;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::Ordering;

impl HnswIndex {
    /// Insert `data` under `label`, or update the existing node.
    ///
    /// With `write_conf.replace_deleted` set (and replacement enabled at
    /// construction), a lazily-deleted slot is reclaimed when one exists.
    pub fn add_point(&self, data: &[u8], label: LabelType, write_conf: WriteConfig) -> Result<()> {
        if data.len() != self.space.data_size() {
            return Err(IndexError::InvalidArgument(format!(
                "vector must be {} bytes, got {}",
                self.space.data_size(),
                data.len()
            )));
        }
        if write_conf.replace_deleted && !self.allow_replace_deleted() {
            return Err(IndexError::InvalidArgument(
                "replacement of deleted elements is disabled in the constructor".into(),
            ));
        }

        let _label_guard = self.label_op_lock(label).lock();
        if !write_conf.replace_deleted {
            return self.add_point_inner(data, label).map(|_| ());
        }

        // A label that already exists is an update even in replace mode.
        let known = self.label_lookup.lock().contains_key(&label);
        if known {
            return self.add_point_inner(data, label).map(|_| ());
        }

        // Reclaim a deleted slot when one is vacant.
        let reclaimed = {
            let mut deleted = self.deleted_elements.lock();
            deleted.iter().next().copied().map(|loc| {
                deleted.remove(&loc);
                loc
            })
        };
        let Some(loc) = reclaimed else {
            return self.add_point_inner(data, label).map(|_| ());
        };

        // No concurrent operation touches a deleted slot: it is unreachable
        // through the lookup map and was just removed from the reuse set.
        let replaced_label = self.label(loc);
        self.set_label(loc, label);
        {
            let mut lookup = self.label_lookup.lock();
            lookup.remove(&replaced_label);
            lookup.insert(label, loc);
        }
        self.unmark_deleted_internal(loc, label)?;
        self.update_point(data, loc, self.update_neighbor_probability())
    }

    /// The non-reclaiming insert/update path. Caller holds the label-op
    /// lock.
    fn add_point_inner(&self, data: &[u8], label: LabelType) -> Result<LocationType> {
        let cur_c: LocationType;
        {
            let mut lookup = self.label_lookup.lock();
            if let Some(&existing) = lookup.get(&label) {
                if self.allow_replace_deleted() && self.is_marked_deleted(existing) {
                    return Err(IndexError::InvalidArgument(
                        "cannot update a deleted element while replace-deleted is enabled".into(),
                    ));
                }
                drop(lookup);
                if self.is_marked_deleted(existing) {
                    self.unmark_deleted_internal(existing, label)?;
                }
                self.update_point(data, existing, self.update_neighbor_probability())?;
                return Ok(existing);
            }

            let count = self.element_count();
            if count >= self.max_elements() {
                return Err(IndexError::OutOfRange(format!(
                    "element count {count} is at the configured limit"
                )));
            }
            cur_c = count as LocationType;
            self.set_element_count(count as u32 + 1);
            lookup.insert(label, cur_c);
        }

        let level = self.random_level();
        self.set_element_level(cur_c, level);

        // Hold the global lock through publication when this node raises
        // the maximum level.
        let mut publish_guard = Some(self.global.lock());
        let max_level_copy = self.max_level_snapshot();
        if level <= max_level_copy {
            publish_guard = None;
        }

        self.write_vector(cur_c, data);
        self.set_label(cur_c, label);
        if level > 0 && !self.has_upper_block(cur_c) {
            self.allocate_upper_block(cur_c, level as usize)?;
        }

        let Some((enterpoint, _)) = self.entry_point() else {
            // First node becomes the entry point.
            self.publish_entry_point(cur_c, level);
            return Ok(cur_c);
        };

        let mut curr = enterpoint;
        if level < max_level_copy {
            curr = self.greedy_descent(data, curr, max_level_copy, level + 1)?;
        }

        // Phase 1: per level, pick neighbors and write the node's own
        // list. No back-edge exists yet, so the node stays unreachable and
        // its lists cannot be touched by concurrent inserters.
        let ep_deleted = self.is_marked_deleted(enterpoint);
        let top_level = level.min(max_level_copy) as usize;
        let mut selected_per_level: Vec<Vec<LocationType>> = vec![Vec::new(); top_level + 1];
        for l in (0..=top_level).rev() {
            let mut top_candidates = self.search_base_layer(curr, data, l)?;
            if ep_deleted {
                // Keep the deleted entry point as a candidate so a fully
                // deleted neighborhood still connects.
                top_candidates.push(GraphCandidate {
                    distance: OrderedFloat(self.dist_to_query(data, enterpoint)),
                    location: enterpoint,
                });
                if top_candidates.len() > self.ef_construction {
                    top_candidates.pop();
                }
            }
            let selected = self.select_for_connection(top_candidates)?;
            self.write_own_links(cur_c, &selected, l, false)?;
            curr = *selected.last().expect("selection is never empty");
            selected_per_level[l] = selected;
        }

        // Phase 2: publish the back-edges; the node becomes reachable.
        for l in (0..=top_level).rev() {
            self.connect_backlinks(data, cur_c, &selected_per_level[l], l, false)?;
        }

        if level > max_level_copy {
            debug_assert!(publish_guard.is_some());
            self.publish_entry_point(cur_c, level);
        }
        drop(publish_guard);
        Ok(cur_c)
    }

    fn max_level_snapshot(&self) -> i32 {
        self.entry_point().map_or(-1, |(_, level)| level)
    }

    /// Rewrite a live node's vector and repair the adjacency around it.
    ///
    /// For each level the node carries: gather its one-hop neighbors and,
    /// with `update_neighbor_probability` per neighbor, their two-hop
    /// neighborhoods; re-select each affected neighbor's list from those
    /// candidates under the pruning heuristic. Finally re-run the descent
    /// and per-level connection for the node itself, excluding it from its
    /// own candidate sets.
    pub(crate) fn update_point(
        &self,
        data: &[u8],
        loc: LocationType,
        update_neighbor_probability: f32,
    ) -> Result<()> {
        self.write_vector(loc, data);

        let Some((entry_copy, max_level_copy)) = self.entry_point() else {
            return Err(IndexError::Internal("update on an empty index".into()));
        };
        if entry_copy == loc && self.element_count() == 1 {
            return Ok(());
        }

        let elem_level = self.element_level(loc);
        for layer in 0..=elem_level as usize {
            let mut candidates: HashSet<LocationType> = HashSet::new();
            let mut affected: HashSet<LocationType> = HashSet::new();

            let one_hop = self.connections_with_lock(loc, layer)?;
            if one_hop.is_empty() {
                continue;
            }
            candidates.insert(loc);

            for neighbor in one_hop {
                candidates.insert(neighbor);
                let draw: f32 = self.update_rng.lock().gen();
                if draw > update_neighbor_probability {
                    continue;
                }
                affected.insert(neighbor);
                for two_hop in self.connections_with_lock(neighbor, layer)? {
                    candidates.insert(two_hop);
                }
            }

            for neighbor in affected {
                let pool_size = if candidates.contains(&neighbor) {
                    candidates.len() - 1
                } else {
                    candidates.len()
                };
                if pool_size == 0 {
                    continue;
                }
                let keep = self.ef_construction.min(pool_size);

                // Top `keep` candidates by distance to the neighbor.
                let mut closest: BinaryHeap<GraphCandidate> = BinaryHeap::with_capacity(keep + 1);
                for &cand in &candidates {
                    if cand == neighbor {
                        continue;
                    }
                    let dist = self.dist_between(neighbor, cand);
                    if closest.len() < keep {
                        closest.push(GraphCandidate {
                            distance: OrderedFloat(dist),
                            location: cand,
                        });
                    } else if dist < closest.peek().expect("non-empty").distance.0 {
                        closest.pop();
                        closest.push(GraphCandidate {
                            distance: OrderedFloat(dist),
                            location: cand,
                        });
                    }
                }

                let cap = if layer == 0 { self.max_m0 } else { self.max_m };
                self.select_neighbors_by_heuristic(&mut closest, cap)?;

                let _guard = self.node_locks[neighbor as usize].lock();
                let block = self.block_at_level(neighbor, layer)?;
                let new_len = closest.len();
                let mut slot = 0;
                while let Some(cand) = closest.pop() {
                    block[1 + slot].store(cand.location, Ordering::Relaxed);
                    slot += 1;
                }
                self.set_link_count(&block[0], new_len)?;
            }
        }

        self.repair_connections_for_update(data, entry_copy, loc, elem_level, max_level_copy)
    }

    /// Re-run the insert-time descent and per-level connection for an
    /// updated node, keeping it out of its own neighbor lists.
    fn repair_connections_for_update(
        &self,
        data: &[u8],
        entry_point: LocationType,
        loc: LocationType,
        elem_level: i32,
        max_level: i32,
    ) -> Result<()> {
        if elem_level > max_level {
            return Err(IndexError::Internal(
                "updated node sits above the maximum level".into(),
            ));
        }
        let mut curr = entry_point;
        if elem_level < max_level {
            curr = self.greedy_descent(data, curr, max_level, elem_level + 1)?;
        }

        for level in (0..=elem_level.max(0) as usize).rev() {
            let top_candidates = self.search_base_layer(curr, data, level)?;
            let mut filtered: BinaryHeap<GraphCandidate> = BinaryHeap::new();
            for cand in top_candidates.into_iter() {
                if cand.location != loc {
                    filtered.push(cand);
                }
            }

            // The search may return only the node itself; nothing to
            // connect on this level then.
            if filtered.is_empty() {
                continue;
            }
            if self.is_marked_deleted(entry_point) {
                filtered.push(GraphCandidate {
                    distance: OrderedFloat(self.dist_to_query(data, entry_point)),
                    location: entry_point,
                });
                if filtered.len() > self.ef_construction {
                    filtered.pop();
                }
            }

            let selected = self.select_for_connection(filtered)?;
            self.write_own_links(loc, &selected, level, true)?;
            self.connect_backlinks(data, loc, &selected, level, true)?;
            curr = *selected.last().expect("selection is never empty");
        }
        Ok(())
    }

    /// Run the pruning heuristic at width `m` and drain the survivors,
    /// farthest first. The last entry is the closest neighbor, used as the
    /// entry point for the next lower level.
    fn select_for_connection(
        &self,
        mut top_candidates: BinaryHeap<GraphCandidate>,
    ) -> Result<Vec<LocationType>> {
        self.select_neighbors_by_heuristic(&mut top_candidates, self.m)?;
        if top_candidates.len() > self.m {
            return Err(IndexError::Internal(
                "the heuristic returned more than M candidates".into(),
            ));
        }
        let mut selected = Vec::with_capacity(top_candidates.len());
        while let Some(cand) = top_candidates.pop() {
            selected.push(cand.location);
        }
        if selected.is_empty() {
            return Err(IndexError::Internal("empty candidate set after pruning".into()));
        }
        Ok(selected)
    }

    /// Write `cur_c`'s own adjacency at `level` under its node lock.
    fn write_own_links(
        &self,
        cur_c: LocationType,
        selected: &[LocationType],
        level: usize,
        is_update: bool,
    ) -> Result<()> {
        for &neighbor in selected {
            if neighbor == cur_c {
                return Err(IndexError::Internal(
                    "attempted to connect an element to itself".into(),
                ));
            }
            if level as i32 > self.element_level(neighbor) {
                return Err(IndexError::Internal(
                    "attempted to link on a level the neighbor does not carry".into(),
                ));
            }
        }

        let _guard = self.node_locks[cur_c as usize].lock();
        let block = self.block_at_level(cur_c, level)?;
        if link_count(block[0].load(Ordering::Acquire)) != 0 && !is_update {
            return Err(IndexError::Internal(
                "a newly inserted element must start with a blank link list".into(),
            ));
        }
        for (idx, &neighbor) in selected.iter().enumerate() {
            block[1 + idx].store(neighbor, Ordering::Relaxed);
        }
        self.set_link_count(&block[0], selected.len())
    }

    /// Back-connect each selected neighbor to `cur_c` at `level`, pruning
    /// any list that would overflow its cap.
    fn connect_backlinks(
        &self,
        data: &[u8],
        cur_c: LocationType,
        selected: &[LocationType],
        level: usize,
        is_update: bool,
    ) -> Result<()> {
        let cap = if level == 0 { self.max_m0 } else { self.max_m };
        for &neighbor in selected {
            let _guard = self.node_locks[neighbor as usize].lock();
            let list = self.linklist_at_level(neighbor, level)?;
            let existing_len = list.len();
            if existing_len > cap {
                return Err(IndexError::Internal(
                    "neighbor list exceeds its cap before connection".into(),
                ));
            }
            if level as i32 > self.element_level(neighbor) {
                return Err(IndexError::Internal(
                    "attempted to link on a level the neighbor does not carry".into(),
                ));
            }

            // An update may find the edge already present.
            if is_update && list.iter().any(|other| other == cur_c) {
                continue;
            }

            let block = self.block_at_level(neighbor, level)?;
            if existing_len < cap {
                // Publish the slot, then raise the count.
                block[1 + existing_len].store(cur_c, Ordering::Relaxed);
                self.set_link_count(&block[0], existing_len + 1)?;
                continue;
            }

            // Overflow: re-select the neighbor's list from its current
            // edges plus the new node.
            let d_new = self.space.dist(data, self.vector(neighbor));
            let mut candidates: BinaryHeap<GraphCandidate> = BinaryHeap::new();
            candidates.push(GraphCandidate {
                distance: OrderedFloat(d_new),
                location: cur_c,
            });
            for other in list.iter() {
                candidates.push(GraphCandidate {
                    distance: OrderedFloat(self.dist_between(other, neighbor)),
                    location: other,
                });
            }
            self.select_neighbors_by_heuristic(&mut candidates, cap)?;

            // Replace the slots, then re-set the count.
            let new_len = candidates.len();
            let mut slot = 0;
            while let Some(cand) = candidates.pop() {
                block[1 + slot].store(cand.location, Ordering::Relaxed);
                slot += 1;
            }
            self.set_link_count(&block[0], new_len)?;
        }
        Ok(())
    }

    /// Select up to `m` diverse candidates: closest-first, a candidate is
    /// kept only if it is closer to the base point than to every neighbor
    /// already kept.
    pub(crate) fn select_neighbors_by_heuristic(
        &self,
        top_candidates: &mut BinaryHeap<GraphCandidate>,
        m: usize,
    ) -> Result<()> {
        if top_candidates.len() < m {
            return Ok(());
        }

        let mut closest_first: BinaryHeap<GraphCandidate> = BinaryHeap::new();
        while let Some(cand) = top_candidates.pop() {
            closest_first.push(GraphCandidate {
                distance: OrderedFloat(-cand.distance.0),
                location: cand.location,
            });
        }

        let mut selected: Vec<GraphCandidate> = Vec::with_capacity(m);
        while let Some(cand) = closest_first.pop() {
            if selected.len() >= m {
                break;
            }
            let dist_to_query = -cand.distance.0;
            let mut keep = true;
            for chosen in &selected {
                let dist_to_chosen = self.dist_between(chosen.location, cand.location);
                if dist_to_chosen < dist_to_query {
                    keep = false;
                    break;
                }
            }
            if keep {
                selected.push(cand);
            }
        }

        for cand in selected {
            top_candidates.push(GraphCandidate {
                distance: OrderedFloat(-cand.distance.0),
                location: cand.location,
            });
        }
        Ok(())
    }
}
