//! Consensus construction from the matched labels of several candidates.
//!
//! Every fuser writes a binary mask (`1.0` inside, `0.0` outside) into the
//! consensus buffer it is given. Two rules are provided:
//! - [`ThresholdFuser`]: one weighted vote against a fixed threshold (BIC).
//! - [`SimpleFuser`]: repeated votes that drop candidates disagreeing with the
//!   running consensus (SIMPLE).

mod simple;
mod threshold;

use std::fmt::Debug;

use ndarray::{ArrayViewD, ArrayViewMutD};

use crate::extract::LabelExtractor;
use crate::voxel::{Label, Voxel};

pub use simple::SimpleFuser;
pub use threshold::ThresholdFuser;

/// One candidate's contribution to an object's consensus.
#[derive(Debug, Clone)]
pub struct MatchedCandidate<'a, C> {
    /// Position of the candidate in the caller's list.
    pub index: usize,
    /// Candidate image restricted to the fusion region.
    pub image: ArrayViewD<'a, C>,
    /// Candidate label matched to the object.
    pub label: u64,
    pub weight: f32,
}

/// Combines the matched labels of several candidates into one binary mask.
pub trait LabelFuser<C: Voxel, L: Label>: Send + Sync + Debug {
    /// Overwrites `consensus` (same shape as every `matches[i].image`) with the
    /// binary consensus of `matches`.
    fn fuse(
        &self,
        extractor: &dyn LabelExtractor<C, L>,
        matches: &[MatchedCandidate<'_, C>],
        threshold: f32,
        consensus: ArrayViewMutD<'_, f32>,
    );
}

/// Weighted vote: a voxel is inside when the summed weight of the candidates
/// covering it is positive and reaches `threshold`.
///
/// `weights[i]` replaces `matches[i].weight`; zero weights skip the candidate.
pub(crate) fn weighted_vote<C: Voxel, L: Label>(
    extractor: &dyn LabelExtractor<C, L>,
    matches: &[MatchedCandidate<'_, C>],
    weights: &[f32],
    threshold: f32,
    mut consensus: ArrayViewMutD<'_, f32>,
) {
    debug_assert_eq!(matches.len(), weights.len());

    consensus.fill(0.0);
    for (candidate, &weight) in matches.iter().zip(weights) {
        if weight > 0.0 {
            extractor.accumulate(
                candidate.image.view(),
                candidate.label,
                consensus.view_mut(),
                weight,
            );
        }
    }
    consensus.mapv_inplace(|votes| {
        if votes > 0.0 && votes >= threshold {
            1.0
        } else {
            0.0
        }
    });
}
