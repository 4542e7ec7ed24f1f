//! Mutable state of one fusion run: the shared output volume and the
//! per-object statistics.
//!
//! The orchestrator owns a [`FusionContext`] and lends it by `&mut` to each
//! component call; components keep no copy of it between calls.

use std::collections::{BTreeSet, HashMap};

use ndarray::{ArrayD, IxDyn};
use serde::Serialize;

use crate::voxel::Label;

/// Voxel counts of one inserted object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObjectVolume {
    /// Voxels also claimed by another object.
    pub colliding: usize,
    /// Voxels claimed by this object alone.
    pub non_colliding: usize,
}

impl ObjectVolume {
    #[inline]
    pub fn total(&self) -> usize {
        self.colliding + self.non_colliding
    }

    /// Fraction of colliding voxels, 0 for an empty object.
    pub fn collision_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.colliding as f64 / total as f64
    }
}

/// Final verdict on a discovered object. Every object has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Classification {
    /// No candidate matched, or the consensus was empty.
    Unmatched,
    /// Touches the image border and border removal is on.
    Bordering,
    /// Collision ratio above the threshold; removed from the output.
    Colliding,
    /// Kept in the output.
    Secured,
}

/// Run-wide per-object bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct FusionStats<L: Label> {
    discovered: Vec<L>,
    volumes: HashMap<L, ObjectVolume>,
    unmatched: BTreeSet<L>,
    bordering: BTreeSet<L>,
    colliding: BTreeSet<L>,
}

impl<L: Label> FusionStats<L> {
    pub fn new() -> Self {
        Self {
            discovered: Vec::new(),
            volumes: HashMap::new(),
            unmatched: BTreeSet::new(),
            bordering: BTreeSet::new(),
            colliding: BTreeSet::new(),
        }
    }

    pub fn record_discovered(&mut self, id: L) {
        self.discovered.push(id);
    }

    /// Object ids in marker encounter order.
    pub fn discovered(&self) -> &[L] {
        &self.discovered
    }

    /// True once the object's insertion has been recorded.
    pub fn was_inserted(&self, id: L) -> bool {
        self.volumes.contains_key(&id)
    }

    pub fn record_volume(&mut self, id: L, volume: ObjectVolume) {
        let previous = self.volumes.insert(id, volume);
        debug_assert!(previous.is_none(), "volume of object {id} recorded twice");
    }

    /// Re-books one voxel of an already inserted object as colliding.
    pub fn move_to_colliding(&mut self, id: L) {
        let volume = self.volumes.entry(id).or_default();
        debug_assert!(volume.non_colliding > 0, "object {id} has no voxel to move");
        volume.non_colliding = volume.non_colliding.saturating_sub(1);
        volume.colliding += 1;
    }

    pub fn volume(&self, id: L) -> ObjectVolume {
        self.volumes.get(&id).copied().unwrap_or_default()
    }

    pub fn mark_unmatched(&mut self, id: L) {
        debug_assert!(!self.bordering.contains(&id) && !self.colliding.contains(&id));
        self.unmatched.insert(id);
    }

    pub fn mark_bordering(&mut self, id: L) {
        debug_assert!(!self.unmatched.contains(&id) && !self.colliding.contains(&id));
        self.bordering.insert(id);
    }

    pub fn mark_colliding(&mut self, id: L) {
        debug_assert!(!self.unmatched.contains(&id) && !self.bordering.contains(&id));
        self.colliding.insert(id);
    }

    pub fn is_unmatched(&self, id: L) -> bool {
        self.unmatched.contains(&id)
    }

    pub fn is_bordering(&self, id: L) -> bool {
        self.bordering.contains(&id)
    }

    pub fn is_colliding(&self, id: L) -> bool {
        self.colliding.contains(&id)
    }

    pub fn unmatched(&self) -> &BTreeSet<L> {
        &self.unmatched
    }

    pub fn bordering(&self) -> &BTreeSet<L> {
        &self.bordering
    }

    pub fn colliding(&self) -> &BTreeSet<L> {
        &self.colliding
    }

    pub fn classification(&self, id: L) -> Classification {
        if self.unmatched.contains(&id) {
            Classification::Unmatched
        } else if self.bordering.contains(&id) {
            Classification::Bordering
        } else if self.colliding.contains(&id) {
            Classification::Colliding
        } else {
            Classification::Secured
        }
    }

    /// Discovered ids that are neither unmatched, bordering nor colliding.
    pub fn secured(&self) -> Vec<L> {
        self.discovered
            .iter()
            .copied()
            .filter(|&id| self.classification(id) == Classification::Secured)
            .collect()
    }
}

/// Output volume plus statistics, threaded through every component call.
#[derive(Debug, Clone)]
pub struct FusionContext<L: Label> {
    pub output: ArrayD<L>,
    pub stats: FusionStats<L>,
}

impl<L: Label> FusionContext<L> {
    /// An all-background output of `shape` and empty statistics.
    pub fn new(shape: &[usize]) -> Self {
        Self {
            output: ArrayD::from_elem(IxDyn(shape), L::BACKGROUND),
            stats: FusionStats::new(),
        }
    }

    pub fn into_parts(self) -> (ArrayD<L>, FusionStats<L>) {
        (self.output, self.stats)
    }
}
