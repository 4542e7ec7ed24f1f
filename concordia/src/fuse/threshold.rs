use ndarray::ArrayViewMutD;

use super::{LabelFuser, MatchedCandidate, weighted_vote};
use crate::extract::LabelExtractor;
use crate::voxel::{Label, Voxel};

/// Single weighted vote against the caller's threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdFuser;

impl<C: Voxel, L: Label> LabelFuser<C, L> for ThresholdFuser {
    fn fuse(
        &self,
        extractor: &dyn LabelExtractor<C, L>,
        matches: &[MatchedCandidate<'_, C>],
        threshold: f32,
        consensus: ArrayViewMutD<'_, f32>,
    ) {
        let weights: Vec<f32> = matches.iter().map(|m| m.weight).collect();
        weighted_vote(extractor, matches, &weights, threshold, consensus);
    }
}
