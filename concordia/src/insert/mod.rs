//! Insertion of consensus masks into the shared output volume.
//!
//! Objects are inserted one after another. A voxel claimed by a second object
//! becomes [`Label::INTERSECTION`] and both claimants are charged a colliding
//! voxel. [`LabelInsertor::finalize`] then removes the sentinel and every
//! object whose colliding share is too large.

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashSet};
use std::fmt::Debug;

use ndarray::{ArrayViewD, Dimension};
use serde::Serialize;

use crate::context::{FusionContext, ObjectVolume};
use crate::voxel::{BoundingBox, Label, touches_border};

/// Number of collision histogram buckets: ratio tenths 0..=9 plus exactly 100%.
pub const HISTOGRAM_BUCKETS: usize = 11;

// ============================================================================
// InsertionStatus
// ============================================================================

/// Outcome of inserting one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionStatus<L: Label> {
    /// At least one voxel was written without collision.
    pub found: bool,
    /// Some voxel of the mask lies on the image border.
    pub at_border: bool,
    /// Some voxel of the mask was already claimed.
    pub in_collision: bool,
    /// Earlier objects this one collided with.
    pub local_colliders: BTreeSet<L>,
    pub colliding: usize,
    pub non_colliding: usize,
}

impl<L: Label> Default for InsertionStatus<L> {
    fn default() -> Self {
        Self {
            found: false,
            at_border: false,
            in_collision: false,
            local_colliders: BTreeSet::new(),
            colliding: 0,
            non_colliding: 0,
        }
    }
}

impl<L: Label> InsertionStatus<L> {
    pub fn clear(&mut self) {
        self.found = false;
        self.at_border = false;
        self.in_collision = false;
        self.local_colliders.clear();
        self.colliding = 0;
        self.non_colliding = 0;
    }

    /// Voxels claimed by the mask, colliding or not.
    pub fn voxels(&self) -> usize {
        self.colliding + self.non_colliding
    }
}

// ============================================================================
// CollisionHistogram
// ============================================================================

/// Distribution of per-object collision ratios in tenths.
///
/// Bucket `b < 10` holds ratios in `[b/10, (b+1)/10)`, bucket 10 holds
/// objects that collided entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollisionHistogram {
    buckets: [usize; HISTOGRAM_BUCKETS],
}

impl CollisionHistogram {
    /// Counts one object. Empty objects are ignored.
    pub fn record(&mut self, volume: ObjectVolume) {
        let total = volume.total();
        if total == 0 {
            return;
        }
        let bucket = (volume.colliding * 10 / total).min(HISTOGRAM_BUCKETS - 1);
        self.buckets[bucket] += 1;
    }

    #[inline]
    pub fn buckets(&self) -> &[usize; HISTOGRAM_BUCKETS] {
        &self.buckets
    }

    /// Number of objects counted.
    pub fn total(&self) -> usize {
        self.buckets.iter().sum()
    }
}

// ============================================================================
// LabelInsertor
// ============================================================================

/// Writes consensus masks into the output and resolves collisions.
pub trait LabelInsertor<L: Label>: Send + Sync + Debug {
    /// Inserts the mask of `object_id`. `consensus` covers `region` of the
    /// output; voxels with a positive value belong to the mask.
    ///
    /// `status` is reset first. Inserting the same object twice is a caller
    /// error.
    fn insert(
        &self,
        consensus: ArrayViewD<'_, f32>,
        ctx: &mut FusionContext<L>,
        region: &BoundingBox,
        object_id: L,
        status: &mut InsertionStatus<L>,
    );

    /// Classifies colliding objects and clears them, the intersection
    /// sentinel and (with `remove_bordering`) bordering objects from the
    /// output. Returns the histogram of collision ratios over every object
    /// that claimed at least one voxel.
    fn finalize(
        &self,
        ctx: &mut FusionContext<L>,
        collision_threshold: f64,
        remove_bordering: bool,
    ) -> CollisionHistogram;
}

/// Default insertor: first writer owns background voxels, any later claim
/// turns the voxel into the intersection sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollisionInsertor;

impl<L: Label> LabelInsertor<L> for CollisionInsertor {
    fn insert(
        &self,
        consensus: ArrayViewD<'_, f32>,
        ctx: &mut FusionContext<L>,
        region: &BoundingBox,
        object_id: L,
        status: &mut InsertionStatus<L>,
    ) {
        assert!(object_id.is_object(), "cannot insert label {object_id}");
        assert!(
            !ctx.stats.was_inserted(object_id),
            "object {object_id} inserted twice"
        );
        status.clear();

        let FusionContext { output, stats } = ctx;
        let shape = output.shape().to_vec();
        let mut global = vec![0usize; shape.len()];
        let mut target = region.restrict_mut(output.view_mut());

        assert_eq!(
            target.shape(),
            consensus.shape(),
            "consensus does not match the insertion region"
        );

        for ((local, voxel), &mask) in target.indexed_iter_mut().zip(consensus.iter()) {
            if mask <= 0.0 {
                continue;
            }

            region.to_global(local.slice(), &mut global);
            if touches_border(&global, &shape) {
                status.at_border = true;
            }

            let occupant = *voxel;
            if occupant == L::BACKGROUND {
                *voxel = object_id;
                status.non_colliding += 1;
                status.found = true;
                continue;
            }

            *voxel = L::INTERSECTION;
            status.colliding += 1;
            status.in_collision = true;
            if occupant != L::INTERSECTION {
                stats.move_to_colliding(occupant);
                status.local_colliders.insert(occupant);
            }
        }

        stats.record_volume(
            object_id,
            ObjectVolume {
                colliding: status.colliding,
                non_colliding: status.non_colliding,
            },
        );
    }

    fn finalize(
        &self,
        ctx: &mut FusionContext<L>,
        collision_threshold: f64,
        remove_bordering: bool,
    ) -> CollisionHistogram {
        let FusionContext { output, stats } = ctx;
        let mut histogram = CollisionHistogram::default();

        let ids = stats.discovered().to_vec();
        for id in ids {
            if stats.is_unmatched(id) {
                continue;
            }
            let volume = stats.volume(id);
            if volume.total() == 0 {
                continue;
            }
            histogram.record(volume);

            if volume.colliding > 0
                && volume.collision_ratio() > collision_threshold
                && !stats.is_bordering(id)
            {
                stats.mark_colliding(id);
            }
        }

        let mut removed: HashSet<L> = stats.colliding().iter().copied().collect();
        if remove_bordering {
            removed.extend(stats.bordering().iter().copied());
        }

        let mut cleared = 0usize;
        output.mapv_inplace(|v| {
            if v == L::INTERSECTION || (v != L::BACKGROUND && removed.contains(&v)) {
                cleared += 1;
                L::BACKGROUND
            } else {
                v
            }
        });

        tracing::debug!(
            "Finalize: {} colliding, {} bordering, {} voxels cleared",
            stats.colliding().len(),
            stats.bordering().len(),
            cleared
        );

        histogram
    }
}
