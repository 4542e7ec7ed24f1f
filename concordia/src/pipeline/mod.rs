//! The fusion algorithm: drives extraction, fusion, insertion and cleanup
//! over every object of the marker image.
//!
//! Objects are processed strictly one after another in marker encounter
//! order, since each insertion must see every earlier one. Work inside a
//! single object (candidate extraction) runs on the rayon pool.

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use ndarray::{ArrayD, ArrayViewD, IxDyn, Zip};
use rayon::prelude::*;

use crate::config::{FusionConfig, Policy, SimpleConfig};
use crate::context::{FusionContext, FusionStats};
use crate::error::{Component, Error, Result};
use crate::extract::{LabelExtractor, MajorityOverlapExtractor};
use crate::fuse::{LabelFuser, MatchedCandidate, SimpleFuser, ThresholdFuser};
use crate::insert::{CollisionInsertor, InsertionStatus, LabelInsertor};
use crate::postprocess::{LabelPostprocessor, LargestComponentCleaner};
use crate::report::FusionReport;
use crate::voxel::{BoundingBox, Label, LabelIndex, Voxel};

/// Output of a fusion run.
#[derive(Debug, Clone)]
pub struct FusionResult<L: Label> {
    /// Fused label image, same shape as the marker.
    pub output: ArrayD<L>,
    pub stats: FusionStats<L>,
    pub report: FusionReport,
}

/// A fusion policy: one implementation per component role plus the shared
/// parameters.
///
/// Components are optional so that a bundle can be assembled piecewise;
/// [`fuse`](Self::fuse) fails with [`Error::MissingComponent`] if any is unset.
#[derive(Debug)]
pub struct FusionAlgorithm<C: Voxel, L: Label> {
    extractor: Option<Box<dyn LabelExtractor<C, L>>>,
    fuser: Option<Box<dyn LabelFuser<C, L>>>,
    insertor: Option<Box<dyn LabelInsertor<L>>>,
    postprocessor: Option<Box<dyn LabelPostprocessor<L>>>,
    config: FusionConfig,
}

/// Borrowed, fully configured component set of one run.
struct Components<'a, C: Voxel, L: Label> {
    extractor: &'a dyn LabelExtractor<C, L>,
    fuser: &'a dyn LabelFuser<C, L>,
    insertor: &'a dyn LabelInsertor<L>,
    postprocessor: &'a dyn LabelPostprocessor<L>,
}

impl<C: Voxel, L: Label> FusionAlgorithm<C, L> {
    /// An algorithm without components.
    pub fn new(config: FusionConfig) -> Self {
        Self {
            extractor: None,
            fuser: None,
            insertor: None,
            postprocessor: None,
            config,
        }
    }

    /// Fixed-threshold weighted voting (BIC).
    pub fn bic(config: FusionConfig) -> Result<Self> {
        Self::with_shared_components(config, ThresholdFuser)
    }

    /// Iterative voting with decaying candidate-quality threshold (SIMPLE).
    pub fn simple(config: FusionConfig, simple: SimpleConfig) -> Result<Self> {
        simple.validate()?;
        Self::with_shared_components(config, SimpleFuser::new(simple))
    }

    pub fn for_policy(policy: Policy, config: FusionConfig, simple: SimpleConfig) -> Result<Self> {
        match policy {
            Policy::Bic => Self::bic(config),
            Policy::Simple => Self::simple(config, simple),
        }
    }

    fn with_shared_components(
        config: FusionConfig,
        fuser: impl LabelFuser<C, L> + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let extractor = MajorityOverlapExtractor::new(config.min_overlap);
        Ok(Self::new(config)
            .with_extractor(extractor)
            .with_fuser(fuser)
            .with_insertor(CollisionInsertor)
            .with_postprocessor(LargestComponentCleaner::default()))
    }

    pub fn with_extractor(mut self, extractor: impl LabelExtractor<C, L> + 'static) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    pub fn with_fuser(mut self, fuser: impl LabelFuser<C, L> + 'static) -> Self {
        self.fuser = Some(Box::new(fuser));
        self
    }

    pub fn with_insertor(mut self, insertor: impl LabelInsertor<L> + 'static) -> Self {
        self.insertor = Some(Box::new(insertor));
        self
    }

    pub fn with_postprocessor(mut self, postprocessor: impl LabelPostprocessor<L> + 'static) -> Self {
        self.postprocessor = Some(Box::new(postprocessor));
        self
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn components(&self) -> Result<Components<'_, C, L>> {
        Ok(Components {
            extractor: self
                .extractor
                .as_deref()
                .ok_or(Error::MissingComponent(Component::Extractor))?,
            fuser: self
                .fuser
                .as_deref()
                .ok_or(Error::MissingComponent(Component::Fuser))?,
            insertor: self
                .insertor
                .as_deref()
                .ok_or(Error::MissingComponent(Component::Insertor))?,
            postprocessor: self
                .postprocessor
                .as_deref()
                .ok_or(Error::MissingComponent(Component::Postprocessor))?,
        })
    }

    /// Fuses `candidates` into one label image guided by `marker`.
    ///
    /// Every error is raised before the first output voxel is written.
    pub fn fuse(
        &self,
        candidates: &[ArrayViewD<'_, C>],
        weights: &[f32],
        marker: ArrayViewD<'_, L>,
        threshold: f32,
    ) -> Result<FusionResult<L>> {
        let components = self.components()?;
        self.config.validate()?;
        validate_inputs(candidates, weights, &marker, threshold)?;

        // Discover
        let objects = discover_objects(&marker)?;
        let candidate_indexes: Vec<LabelIndex<u64>> = candidates
            .par_iter()
            .map(|candidate| {
                LabelIndex::build(candidate, |v: C| {
                    let label = v.to_label();
                    (label != 0).then_some(label)
                })
            })
            .collect();

        tracing::debug!(
            "Fusing {} objects from {} candidates, image shape {:?}",
            objects.len(),
            candidates.len(),
            marker.shape()
        );

        let mut ctx = FusionContext::new(marker.shape());
        let mut consensus = ArrayD::<f32>::zeros(IxDyn(marker.shape()));
        let mut status = InsertionStatus::default();

        for (object_id, marker_box) in objects.iter() {
            ctx.stats.record_discovered(object_id);

            // Extract
            let marker_view = marker_box.restrict(marker.view());
            let labels: Vec<Option<u64>> = candidates
                .par_iter()
                .map(|candidate| {
                    components.extractor.find_matching_label(
                        marker_box.restrict(candidate.view()),
                        marker_view.view(),
                        object_id,
                    )
                })
                .collect();

            let mut region = marker_box.clone();
            let mut matched = Vec::new();
            for (index, label) in labels.into_iter().enumerate() {
                let Some(label) = label else {
                    continue;
                };
                if let Some(label_box) = candidate_indexes[index].bounding_box(label) {
                    region.union(label_box);
                }
                matched.push((index, label));
            }

            if matched.is_empty() {
                tracing::debug!("Object {}: no candidate matched", object_id);
                ctx.stats.mark_unmatched(object_id);
                continue;
            }

            // Fuse
            let matches: Vec<MatchedCandidate<'_, C>> = matched
                .iter()
                .map(|&(index, label)| MatchedCandidate {
                    index,
                    image: region.restrict(candidates[index].view()),
                    label,
                    weight: weights[index],
                })
                .collect();
            let mut scratch = region.restrict_mut(consensus.view_mut());
            components
                .fuser
                .fuse(components.extractor, &matches, threshold, scratch.view_mut());

            // Insert
            components
                .insertor
                .insert(scratch.view(), &mut ctx, &region, object_id, &mut status);

            if status.voxels() == 0 {
                tracing::debug!(
                    "Object {}: not found, consensus of {} matched candidates is empty",
                    object_id,
                    matches.len()
                );
                ctx.stats.mark_unmatched(object_id);
                continue;
            }
            if self.config.remove_bordering && status.at_border {
                ctx.stats.mark_bordering(object_id);
            }
            log_insertion(object_id, matches.len(), &status);
        }

        // Finalize
        let histogram = components.insertor.finalize(
            &mut ctx,
            self.config.collision_threshold,
            self.config.remove_bordering,
        );
        let recovered = if self.config.marker_fallback {
            restore_from_marker(&mut ctx, &marker)
        } else {
            Vec::new()
        };

        // Postprocess
        let survivors = LabelIndex::build(&ctx.output.view(), |v: L| v.is_object().then_some(v));
        for (object_id, bbox) in survivors.iter() {
            components
                .postprocessor
                .clean(ctx.output.view_mut(), object_id, bbox);
        }

        let (output, stats) = ctx.into_parts();
        let report = FusionReport::new(&stats, histogram, &recovered);
        report.log_summary();

        Ok(FusionResult {
            output,
            stats,
            report,
        })
    }
}

fn validate_inputs<C: Voxel, L: Label>(
    candidates: &[ArrayViewD<'_, C>],
    weights: &[f32],
    marker: &ArrayViewD<'_, L>,
    threshold: f32,
) -> Result<()> {
    if candidates.is_empty() {
        return Err(Error::NoCandidates);
    }
    if candidates.len() != weights.len() {
        return Err(Error::WeightCountMismatch {
            candidates: candidates.len(),
            weights: weights.len(),
        });
    }
    if let Some((index, &weight)) = weights
        .iter()
        .enumerate()
        .find(|&(_, w)| !w.is_finite() || *w < 0.0)
    {
        return Err(Error::InvalidWeight { index, weight });
    }
    if !threshold.is_finite() {
        return Err(Error::InvalidConfig(format!(
            "threshold must be finite, got {threshold}"
        )));
    }
    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.shape() != marker.shape() {
            return Err(Error::ShapeMismatch {
                what: format!("candidate {index}"),
                expected: marker.shape().to_vec(),
                actual: candidate.shape().to_vec(),
            });
        }
    }
    Ok(())
}

/// Object ids of the marker in encounter order with their bounding boxes.
fn discover_objects<L: Label>(marker: &ArrayViewD<'_, L>) -> Result<LabelIndex<L>> {
    if marker.iter().any(|&v| v == L::INTERSECTION) {
        return Err(Error::ReservedLabel(L::INTERSECTION.to_label()));
    }
    Ok(LabelIndex::build(marker, |v: L| {
        (v != L::BACKGROUND).then_some(v)
    }))
}

fn log_insertion<L: Label>(object_id: L, matched: usize, status: &InsertionStatus<L>) {
    let border = if status.at_border { ", at border" } else { "" };
    if status.in_collision {
        tracing::debug!(
            "Object {}: {} voxels from {} candidates{}, {} colliding with {:?}",
            object_id,
            status.voxels(),
            matched,
            border,
            status.colliding,
            status.local_colliders
        );
    } else {
        tracing::debug!(
            "Object {}: {} voxels from {} candidates{}",
            object_id,
            status.voxels(),
            matched,
            border
        );
    }
}

/// Writes the raw marker shape of unmatched and colliding objects into
/// background voxels. Returns the restored ids in encounter order.
fn restore_from_marker<L: Label>(ctx: &mut FusionContext<L>, marker: &ArrayViewD<'_, L>) -> Vec<L> {
    let FusionContext { output, stats } = ctx;
    let mut restored: HashSet<L> = HashSet::new();

    Zip::from(output).and(marker).for_each(|voxel, &id| {
        if *voxel == L::BACKGROUND
            && id.is_object()
            && (stats.is_unmatched(id) || stats.is_colliding(id))
        {
            *voxel = id;
            restored.insert(id);
        }
    });

    let recovered: Vec<L> = stats
        .discovered()
        .iter()
        .copied()
        .filter(|id| restored.contains(id))
        .collect();
    if !recovered.is_empty() {
        tracing::warn!(
            "Marker fallback restored {} objects from the raw marker: {:?}",
            recovered.len(),
            recovered
        );
    }
    recovered
}
