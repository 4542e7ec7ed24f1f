//! Majority-overlap lookup of the candidate label that matches a marker object.

use std::collections::HashMap;
use std::fmt::Debug;

use ndarray::{ArrayViewD, ArrayViewMutD, Zip};

use crate::config::DEFAULT_MIN_OVERLAP;
use crate::voxel::{Label, Voxel};

/// Finds and isolates, in one candidate image, the label that corresponds to
/// a marker object.
///
/// All views passed to one call must have the same shape; callers restrict
/// them to the object's bounding box beforehand.
pub trait LabelExtractor<C: Voxel, L: Label>: Send + Sync + Debug {
    /// Returns the candidate label matching `object_id`, `None` if no label
    /// overlaps the object enough.
    fn find_matching_label(
        &self,
        candidate: ArrayViewD<'_, C>,
        marker: ArrayViewD<'_, L>,
        object_id: L,
    ) -> Option<u64>;

    /// Writes `value` wherever `candidate` holds `label`; other voxels are left as is.
    fn isolate(
        &self,
        candidate: ArrayViewD<'_, C>,
        label: u64,
        out: ArrayViewMutD<'_, f32>,
        value: f32,
    ) {
        Zip::from(out).and(&candidate).for_each(|o, &c| {
            if c.to_label() == label {
                *o = value;
            }
        });
    }

    /// Adds `value` wherever `candidate` holds `label`.
    fn accumulate(
        &self,
        candidate: ArrayViewD<'_, C>,
        label: u64,
        out: ArrayViewMutD<'_, f32>,
        value: f32,
    ) {
        Zip::from(out).and(&candidate).for_each(|o, &c| {
            if c.to_label() == label {
                *o += value;
            }
        });
    }
}

/// Best-overlapping candidate label of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    pub label: u64,
    /// Object voxels covered by `label`.
    pub count: usize,
    /// All object voxels, background-covered ones included.
    pub total: usize,
}

impl Overlap {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.count as f64 / self.total as f64
    }
}

/// Tallies candidate labels under the object and returns the most frequent
/// non-background one. Equal counts resolve to the smaller label.
pub fn best_overlap<C: Voxel, L: Label>(
    candidate: &ArrayViewD<'_, C>,
    marker: &ArrayViewD<'_, L>,
    object_id: L,
) -> Option<Overlap> {
    let mut total = 0usize;
    let mut histogram: HashMap<u64, usize> = HashMap::new();

    Zip::from(candidate).and(marker).for_each(|&c, &m| {
        if m == object_id {
            total += 1;
            let label = c.to_label();
            if label != 0 {
                *histogram.entry(label).or_default() += 1;
            }
        }
    });

    histogram
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(label, count)| Overlap {
            label,
            count,
            total,
        })
}

/// Matches a candidate label when it covers strictly more than
/// `min_overlap` of the object's voxels.
#[derive(Debug, Clone, Copy)]
pub struct MajorityOverlapExtractor {
    min_overlap: f64,
}

impl Default for MajorityOverlapExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_OVERLAP)
    }
}

impl MajorityOverlapExtractor {
    pub fn new(min_overlap: f64) -> Self {
        assert!(
            (0.0..1.0).contains(&min_overlap),
            "min_overlap must be in [0, 1), got {min_overlap}"
        );
        Self { min_overlap }
    }

    pub fn min_overlap(&self) -> f64 {
        self.min_overlap
    }
}

impl<C: Voxel, L: Label> LabelExtractor<C, L> for MajorityOverlapExtractor {
    fn find_matching_label(
        &self,
        candidate: ArrayViewD<'_, C>,
        marker: ArrayViewD<'_, L>,
        object_id: L,
    ) -> Option<u64> {
        let overlap = best_overlap(&candidate, &marker, object_id)?;
        (overlap.count as f64 > self.min_overlap * overlap.total as f64).then_some(overlap.label)
    }
}
