//! Search-time predicates.
//!
//! A [`SearchCondition`] filters candidates by label during a walk and can
//! optionally stop a search early. Predicates must be cheap, pure, and safe
//! to call from concurrent searches. Filtering acts after deletion: a
//! candidate enters the result heap only if it is neither deletion-marked
//! nor excluded.

use crate::{DistanceType, LabelType};
use std::sync::Arc;

/// Predicate set consulted during a search.
pub trait SearchCondition: Send + Sync {
    /// Exclude this label from the result set. Excluded nodes are still
    /// traversed for navigation.
    fn is_exclude(&self, label: LabelType) -> bool;

    /// Positive preselection, for conditions that whitelist rather than
    /// blacklist.
    fn is_whitelist(&self, _label: LabelType) -> bool {
        false
    }

    /// Stop expanding the frontier once a candidate at this distance comes
    /// up.
    fn should_stop_search(&self, _distance: DistanceType) -> bool {
        false
    }

    /// Request walk diagnostics from the engine.
    fn should_explain(&self) -> bool {
        false
    }
}

/// ORs every predicate over a list of conditions.
#[derive(Default)]
pub struct CompositeCondition {
    conditions: Vec<Arc<dyn SearchCondition>>,
}

impl CompositeCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_condition(&mut self, condition: Arc<dyn SearchCondition>) {
        self.conditions.push(condition);
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl SearchCondition for CompositeCondition {
    fn is_exclude(&self, label: LabelType) -> bool {
        self.conditions.iter().any(|c| c.is_exclude(label))
    }

    fn is_whitelist(&self, label: LabelType) -> bool {
        self.conditions.iter().any(|c| c.is_whitelist(label))
    }

    fn should_stop_search(&self, distance: DistanceType) -> bool {
        self.conditions.iter().any(|c| c.should_stop_search(distance))
    }

    fn should_explain(&self) -> bool {
        self.conditions.iter().any(|c| c.should_explain())
    }
}
