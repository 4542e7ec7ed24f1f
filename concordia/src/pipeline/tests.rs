use ndarray::{ArrayD, ArrayViewD, IxDyn, array};
use rand::prelude::*;

use super::*;
use crate::context::Classification;
use crate::labeling::{Connectivity, label_components};

fn array_1d<T: Clone>(values: &[T]) -> ArrayD<T> {
    ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap()
}

fn bic() -> FusionAlgorithm<u16, u16> {
    FusionAlgorithm::bic(FusionConfig::default()).unwrap()
}

fn run(
    algorithm: &FusionAlgorithm<u16, u16>,
    candidates: &[&ArrayD<u16>],
    weights: &[f32],
    marker: &ArrayD<u16>,
    threshold: f32,
) -> Result<FusionResult<u16>> {
    let views: Vec<ArrayViewD<'_, u16>> = candidates.iter().map(|c| c.view()).collect();
    algorithm.fuse(&views, weights, marker.view(), threshold)
}

fn assert_partition(stats: &FusionStats<u16>) {
    for &id in stats.discovered() {
        let memberships = [
            stats.is_unmatched(id),
            stats.is_bordering(id),
            stats.is_colliding(id),
        ]
        .iter()
        .filter(|&&m| m)
        .count();
        assert!(memberships <= 1, "object {id} is in {memberships} classes");
    }
    let secured = stats.secured().len();
    assert_eq!(
        stats.unmatched().len() + stats.bordering().len() + stats.colliding().len() + secured,
        stats.discovered().len()
    );
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn two_candidates_one_object() {
    let marker = array_1d(&[0u16, 1, 1, 1, 1, 1, 1, 1, 1, 0]);
    let a = array_1d(&[0u16, 5, 5, 5, 5, 5, 5, 5, 0, 0]);
    let b = array_1d(&[0u16, 0, 7, 7, 7, 0, 0, 0, 0, 0]);

    for algorithm in [
        bic(),
        FusionAlgorithm::simple(FusionConfig::default(), SimpleConfig::default()).unwrap(),
    ] {
        let result = run(&algorithm, &[&a, &b], &[1.0, 1.0], &marker, 0.5).unwrap();

        assert_eq!(
            result.output.as_slice().unwrap(),
            &[0, 1, 1, 1, 1, 1, 1, 1, 0, 0]
        );
        assert_eq!(result.stats.classification(1), Classification::Secured);
        assert_eq!(result.report.secured, 1);
        assert_eq!(result.report.histogram.buckets()[0], 1);
    }
}

#[test]
fn weighted_vote_through_the_pipeline() {
    let marker = array_1d(&[0u16, 2, 2, 2, 2, 2, 0, 0]);
    let a = array_1d(&[0u16, 3, 3, 3, 3, 3, 3, 0]);
    let b = array_1d(&[9u16, 9, 9, 9, 9, 9, 0, 0]);

    let result = run(&bic(), &[&a, &b], &[0.6, 0.4], &marker, 0.5).unwrap();

    // Only A reaches the threshold on its own, B alone (voxel 0) does not.
    assert_eq!(
        result.output.as_slice().unwrap(),
        &[0, 2, 2, 2, 2, 2, 2, 0]
    );
}

#[test]
fn objects_are_discovered_in_encounter_order() {
    let marker = array![[0u16, 8, 8, 0, 0], [0, 0, 0, 0, 0], [3, 3, 0, 0, 0]].into_dyn();
    let candidate = array![[0u16, 1, 1, 0, 0], [0, 0, 0, 0, 0], [2, 2, 0, 0, 0]].into_dyn();

    let result = run(&bic(), &[&candidate], &[1.0], &marker, 1.0).unwrap();

    assert_eq!(result.stats.discovered(), &[8, 3]);
    assert_eq!(result.output, marker);
}

#[test]
fn candidate_segment_may_exceed_marker_box() {
    let marker = array_1d(&[0u16, 0, 0, 4, 4, 4, 0, 0, 0, 0]);
    let candidate = array_1d(&[0u16, 6, 6, 6, 6, 6, 6, 6, 0, 0]);

    let result = run(&bic(), &[&candidate], &[1.0], &marker, 1.0).unwrap();

    assert_eq!(
        result.output.as_slice().unwrap(),
        &[0, 4, 4, 4, 4, 4, 4, 4, 0, 0]
    );
}

#[test]
fn real_valued_candidates() {
    let marker = array_1d(&[0u8, 1, 1, 1, 0]);
    let candidate = array_1d(&[0.0f32, 2.0, 2.0, 2.0, 2.0]);
    let algorithm = FusionAlgorithm::<f32, u8>::bic(FusionConfig::default()).unwrap();

    let result = algorithm
        .fuse(&[candidate.view()], &[1.0], marker.view(), 1.0)
        .unwrap();

    assert_eq!(result.output.as_slice().unwrap(), &[0, 1, 1, 1, 1]);
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn unmatched_object_leaves_background() {
    let marker = array_1d(&[0u16, 1, 1, 1, 1, 0, 2, 2, 0]);
    let candidate = array_1d(&[0u16, 5, 5, 0, 0, 0, 6, 6, 0]);

    let result = run(&bic(), &[&candidate], &[1.0], &marker, 1.0).unwrap();

    assert!(result.stats.is_unmatched(1));
    assert_eq!(
        result.output.as_slice().unwrap(),
        &[0, 0, 0, 0, 0, 0, 2, 2, 0]
    );
    // Unmatched objects do not enter the histogram.
    assert_eq!(result.report.histogram.total(), 1);
}

#[test]
fn zero_weight_match_counts_as_unmatched() {
    let marker = array_1d(&[0u16, 1, 1, 1, 0]);
    let candidate = array_1d(&[0u16, 5, 5, 5, 0]);

    let result = run(&bic(), &[&candidate], &[0.0], &marker, 0.5).unwrap();

    assert!(result.stats.is_unmatched(1));
    assert!(result.output.iter().all(|&v| v == 0));
}

#[test]
fn merged_segment_collides_entirely() {
    // The candidate merges both marker objects into one segment.
    let marker = array_1d(&[0u16, 1, 1, 1, 1, 2, 2, 2, 0, 0]);
    let candidate = array_1d(&[0u16, 4, 4, 4, 4, 4, 4, 4, 0, 0]);

    let result = run(&bic(), &[&candidate], &[1.0], &marker, 1.0).unwrap();

    assert!(result.stats.is_colliding(1));
    assert!(result.stats.is_colliding(2));
    assert_eq!(result.report.histogram.buckets()[10], 2);
    assert!(result.output.iter().all(|&v| v == 0));
}

#[test]
fn heavily_colliding_objects_are_removed() {
    let marker = array_1d(&[0u16, 1, 1, 1, 2, 2, 2, 0, 0, 0]);
    let a = array_1d(&[0u16, 4, 4, 4, 4, 0, 0, 0, 0, 0]);
    let b = array_1d(&[0u16, 0, 0, 5, 5, 5, 5, 0, 0, 0]);
    let result = run(&bic(), &[&a, &b], &[1.0, 1.0], &marker, 1.0).unwrap();

    // 1 gets [1..5), 2 gets [3..7): both collide on two voxels out of four.
    assert!(result.stats.is_colliding(1));
    assert!(result.stats.is_colliding(2));
    assert!(result.output.iter().all(|&v| v == 0));
    assert_eq!(result.report.histogram.buckets()[5], 2);
    assert_partition(&result.stats);
}

#[test]
fn bordering_objects_follow_the_toggle() {
    let marker = array_1d(&[1u16, 1, 1, 0, 0, 2, 2, 0]);
    let candidate = array_1d(&[3u16, 3, 3, 0, 0, 4, 4, 0]);

    let kept = run(&bic(), &[&candidate], &[1.0], &marker, 1.0).unwrap();
    assert!(kept.stats.bordering().is_empty());
    assert_eq!(kept.output, marker);

    let algorithm = FusionAlgorithm::bic(FusionConfig {
        remove_bordering: true,
        ..Default::default()
    })
    .unwrap();
    let removed = run(&algorithm, &[&candidate], &[1.0], &marker, 1.0).unwrap();

    assert_eq!(removed.stats.classification(1), Classification::Bordering);
    assert_eq!(
        removed.output.as_slice().unwrap(),
        &[0, 0, 0, 0, 0, 2, 2, 0]
    );
    assert_eq!(removed.report.bordering, 1);
}

#[test]
fn marker_fallback_restores_lost_objects() {
    let marker = array_1d(&[0u16, 1, 1, 1, 1, 0, 2, 2, 0]);
    let candidate = array_1d(&[0u16, 5, 5, 0, 0, 0, 6, 6, 0]);
    let algorithm = FusionAlgorithm::bic(FusionConfig {
        marker_fallback: true,
        ..Default::default()
    })
    .unwrap();

    let result = run(&algorithm, &[&candidate], &[1.0], &marker, 1.0).unwrap();

    assert_eq!(result.output, marker);
    assert!(result.stats.is_unmatched(1));
    assert_eq!(result.report.recovered, 1);
    assert!(result.report.objects[0].recovered);
}

#[test]
fn postprocess_keeps_largest_piece() {
    let marker = array_1d(&[0u16, 1, 1, 1, 1, 1, 1, 1, 0]);
    let candidate = array_1d(&[0u16, 3, 3, 3, 0, 3, 3, 0, 0]);

    let result = run(&bic(), &[&candidate], &[1.0], &marker, 1.0).unwrap();

    assert_eq!(
        result.output.as_slice().unwrap(),
        &[0, 1, 1, 1, 0, 0, 0, 0, 0]
    );
}

// ============================================================================
// Configuration errors
// ============================================================================

#[test]
fn missing_components_are_reported_in_role_order() {
    let marker = array_1d(&[0u16, 1]);
    let candidate = array_1d(&[0u16, 1]);

    let empty = FusionAlgorithm::<u16, u16>::new(FusionConfig::default());
    let err = run(&empty, &[&candidate], &[1.0], &marker, 1.0).unwrap_err();
    assert!(matches!(err, Error::MissingComponent(Component::Extractor)));

    let partial = FusionAlgorithm::<u16, u16>::new(FusionConfig::default())
        .with_extractor(MajorityOverlapExtractor::default())
        .with_fuser(ThresholdFuser)
        .with_insertor(CollisionInsertor);
    let err = run(&partial, &[&candidate], &[1.0], &marker, 1.0).unwrap_err();
    assert!(matches!(
        err,
        Error::MissingComponent(Component::Postprocessor)
    ));
}

#[test]
fn invalid_inputs_are_rejected() {
    let marker = array_1d(&[0u16, 1, 1]);
    let candidate = array_1d(&[0u16, 1, 1]);
    let short = array_1d(&[0u16, 1]);
    let algorithm = bic();

    assert!(matches!(
        run(&algorithm, &[], &[], &marker, 1.0),
        Err(Error::NoCandidates)
    ));
    assert!(matches!(
        run(&algorithm, &[&candidate], &[1.0, 1.0], &marker, 1.0),
        Err(Error::WeightCountMismatch {
            candidates: 1,
            weights: 2
        })
    ));
    assert!(matches!(
        run(&algorithm, &[&candidate, &candidate], &[1.0, -0.5], &marker, 1.0),
        Err(Error::InvalidWeight { index: 1, .. })
    ));
    assert!(matches!(
        run(&algorithm, &[&candidate], &[f32::NAN], &marker, 1.0),
        Err(Error::InvalidWeight { index: 0, .. })
    ));
    assert!(matches!(
        run(&algorithm, &[&candidate, &short], &[1.0, 1.0], &marker, 1.0),
        Err(Error::ShapeMismatch { .. })
    ));
    assert!(matches!(
        run(&algorithm, &[&candidate], &[1.0], &marker, f32::INFINITY),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn reserved_marker_value_is_rejected() {
    let marker = array_1d(&[0u16, 1, u16::MAX]);
    let candidate = array_1d(&[0u16, 1, 1]);

    let err = run(&bic(), &[&candidate], &[1.0], &marker, 1.0).unwrap_err();

    assert!(matches!(err, Error::ReservedLabel(v) if v == u64::from(u16::MAX)));
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let config = FusionConfig {
        collision_threshold: 2.0,
        ..Default::default()
    };
    assert!(FusionAlgorithm::<u16, u16>::bic(config).is_err());

    let simple = SimpleConfig {
        no_update_iters: 0,
        ..Default::default()
    };
    assert!(FusionAlgorithm::<u16, u16>::simple(FusionConfig::default(), simple).is_err());
}

// ============================================================================
// Randomized invariants
// ============================================================================

/// Marker of non-overlapping boxes plus candidates that shift and relabel them.
fn random_scene(rng: &mut StdRng) -> (ArrayD<u16>, Vec<ArrayD<u16>>) {
    let shape = [24usize, 24];
    let mut marker = ArrayD::<u16>::zeros(IxDyn(&shape));
    let mut next_id = 1u16;
    for _ in 0..10 {
        let (y, x) = (rng.random_range(0..20), rng.random_range(0..20));
        let (h, w) = (rng.random_range(2..5), rng.random_range(2..5));
        let id = next_id;
        next_id += 1;
        for yy in y..(y + h).min(shape[0]) {
            for xx in x..(x + w).min(shape[1]) {
                marker[[yy, xx]] = id;
            }
        }
    }

    let candidates = (0..3)
        .map(|_| {
            let offset: u16 = rng.random_range(10..100);
            let dy = rng.random_range(-1i32..=1) as isize;
            let dx = rng.random_range(-1i32..=1) as isize;
            let mut candidate = ArrayD::<u16>::zeros(IxDyn(&shape));
            for ((y, x), &id) in marker
                .view()
                .into_dimensionality::<ndarray::Ix2>()
                .unwrap()
                .indexed_iter()
            {
                if id == 0 || rng.random_bool(0.1) {
                    continue;
                }
                let ty = y as isize + dy;
                let tx = x as isize + dx;
                if (0..shape[0] as isize).contains(&ty) && (0..shape[1] as isize).contains(&tx) {
                    candidate[[ty as usize, tx as usize]] = id + offset;
                }
            }
            candidate
        })
        .collect();

    (marker, candidates)
}

#[test]
fn random_scenes_keep_invariants() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for round in 0..20 {
        let (marker, candidates) = random_scene(&mut rng);
        let refs: Vec<&ArrayD<u16>> = candidates.iter().collect();
        let remove_bordering = round % 2 == 0;
        let algorithm = FusionAlgorithm::bic(FusionConfig {
            remove_bordering,
            ..Default::default()
        })
        .unwrap();

        let result = run(&algorithm, &refs, &[1.0, 1.0, 1.0], &marker, 1.5).unwrap();

        assert!(
            result.output.iter().all(|&v| v != u16::MAX),
            "sentinel left in round {round}"
        );
        assert_partition(&result.stats);

        let secured = result.stats.secured();
        for &v in result.output.iter() {
            if v != 0 {
                assert!(secured.contains(&v), "removed object {v} in output");
            }
        }
        for &id in &secured {
            let mask = result.output.mapv(|v| v == id);
            let components = label_components(&mask.view(), Connectivity::Full);
            assert!(components.num_labels() <= 1, "object {id} is fragmented");
        }
    }
}
