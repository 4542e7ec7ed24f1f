//! Per-object cleanup of the finalized output.

use std::fmt::Debug;

use ndarray::{ArrayViewMutD, Zip};

use crate::labeling::{Connectivity, label_components};
use crate::voxel::{BoundingBox, Label};

/// Cleans one surviving object in place.
pub trait LabelPostprocessor<L: Label>: Send + Sync + Debug {
    /// `output` is the whole output image; `region` bounds every voxel of
    /// `object_id`. Voxels of other labels must not change.
    fn clean(&self, output: ArrayViewMutD<'_, L>, object_id: L, region: &BoundingBox);
}

/// Keeps only the largest connected component of an object.
///
/// Equal sizes resolve to the component met first in raster order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestComponentCleaner {
    connectivity: Connectivity,
}

impl LargestComponentCleaner {
    pub fn new(connectivity: Connectivity) -> Self {
        Self { connectivity }
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }
}

impl<L: Label> LabelPostprocessor<L> for LargestComponentCleaner {
    fn clean(&self, output: ArrayViewMutD<'_, L>, object_id: L, region: &BoundingBox) {
        if region.is_empty() {
            return;
        }
        let mut view = region.restrict_mut(output);
        let mask = view.map(|&v| v == object_id);
        let components = label_components(&mask.view(), self.connectivity);
        if components.num_labels() <= 1 {
            return;
        }

        let sizes = components.component_sizes();
        let mut keep = 1u32;
        let mut keep_size = 0usize;
        for (i, &size) in sizes.iter().enumerate() {
            if size > keep_size {
                keep = i as u32 + 1;
                keep_size = size;
            }
        }

        let mut removed = 0usize;
        Zip::from(&mut view)
            .and(components.labels())
            .for_each(|voxel, &component| {
                if component != 0 && component != keep {
                    *voxel = L::BACKGROUND;
                    removed += 1;
                }
            });

        tracing::trace!(
            "Object {}: kept component of {} voxels out of {}, removed {}",
            object_id,
            keep_size,
            components.num_labels(),
            removed
        );
    }
}
