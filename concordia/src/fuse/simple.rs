use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};

use super::{LabelFuser, MatchedCandidate, weighted_vote};
use crate::config::SimpleConfig;
use crate::extract::LabelExtractor;
use crate::voxel::{Label, Voxel};

/// Iterative vote that drops candidates disagreeing with the running consensus.
///
/// Round one is the plain weighted vote. Every later round scores each
/// remaining candidate by its Dice agreement `q` with the previous consensus,
/// drops candidates with `q` below the current quality threshold and re-votes
/// with weights `w * q` against the threshold scaled by `Σ(w*q) / Σw` of the
/// survivors. The quality threshold steps down after every round. Iteration
/// stops after `no_update_iters` rounds without change, after `max_iters`
/// rounds, or when no candidate would survive (the last consensus is kept).
#[derive(Debug, Clone, Default)]
pub struct SimpleFuser {
    config: SimpleConfig,
}

impl SimpleFuser {
    pub fn new(config: SimpleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimpleConfig {
        &self.config
    }
}

impl SimpleFuser {
    /// Runs the vote rounds and returns how many rounds produced a consensus.
    fn vote_rounds<C: Voxel, L: Label>(
        &self,
        extractor: &dyn LabelExtractor<C, L>,
        matches: &[MatchedCandidate<'_, C>],
        threshold: f32,
        mut consensus: ArrayViewMutD<'_, f32>,
    ) -> usize {
        let mut weights: Vec<f32> = matches.iter().map(|m| m.weight).collect();
        weighted_vote(extractor, matches, &weights, threshold, consensus.view_mut());
        if matches.is_empty() {
            return 1;
        }

        let mut previous: ArrayD<f32> = consensus.to_owned();
        let mut unchanged = 0usize;
        let mut rounds = 1usize;

        for round in 1..self.config.max_iters {
            let quality_threshold = self.config.quality_threshold(round);

            let mut next_weights = vec![0.0f32; matches.len()];
            let mut weighted_quality = 0.0f32;
            let mut base_weight = 0.0f32;
            for (i, candidate) in matches.iter().enumerate() {
                if weights[i] <= 0.0 {
                    continue;
                }
                let quality = dice(&candidate.image, candidate.label, &previous.view());
                if quality >= quality_threshold {
                    next_weights[i] = candidate.weight * quality as f32;
                    weighted_quality += next_weights[i];
                    base_weight += candidate.weight;
                } else {
                    tracing::trace!(
                        "SIMPLE round {}: dropping candidate {} (quality {:.2} < {:.2})",
                        round,
                        candidate.index,
                        quality,
                        quality_threshold
                    );
                }
            }

            if weighted_quality <= 0.0 {
                tracing::trace!(
                    "SIMPLE round {}: no candidate reaches quality {:.2}, keeping consensus",
                    round,
                    quality_threshold
                );
                consensus.assign(&previous);
                break;
            }

            let scaled_threshold = threshold * weighted_quality / base_weight;
            weighted_vote(
                extractor,
                matches,
                &next_weights,
                scaled_threshold,
                consensus.view_mut(),
            );
            weights = next_weights;
            rounds += 1;

            if consensus.view() == previous.view() {
                unchanged += 1;
                if unchanged >= self.config.no_update_iters {
                    break;
                }
            } else {
                unchanged = 0;
                previous.assign(&consensus);
            }
        }

        rounds
    }
}

impl<C: Voxel, L: Label> LabelFuser<C, L> for SimpleFuser {
    fn fuse(
        &self,
        extractor: &dyn LabelExtractor<C, L>,
        matches: &[MatchedCandidate<'_, C>],
        threshold: f32,
        consensus: ArrayViewMutD<'_, f32>,
    ) {
        let rounds = self.vote_rounds(extractor, matches, threshold, consensus);
        tracing::trace!("SIMPLE finished after {} rounds", rounds);
    }
}

/// Dice coefficient between the voxels of `image` holding `label` and the
/// inside of a binary `mask`.
fn dice<C: Voxel>(image: &ArrayViewD<'_, C>, label: u64, mask: &ArrayViewD<'_, f32>) -> f64 {
    let mut segment = 0usize;
    let mut fused = 0usize;
    let mut both = 0usize;

    Zip::from(image).and(mask).for_each(|&c, &m| {
        let in_segment = c.to_label() == label;
        let in_mask = m > 0.0;
        segment += usize::from(in_segment);
        fused += usize::from(in_mask);
        both += usize::from(in_segment && in_mask);
    });

    if segment + fused == 0 {
        return 0.0;
    }
    2.0 * both as f64 / (segment + fused) as f64
}
