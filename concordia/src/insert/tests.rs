use std::ops::Range;

use ndarray::{ArrayD, IxDyn, array};

use super::*;
use crate::context::Classification;

fn mask(len: usize, range: Range<usize>) -> ArrayD<f32> {
    ArrayD::from_shape_fn(IxDyn(&[len]), |idx| {
        if range.contains(&idx[0]) { 1.0 } else { 0.0 }
    })
}

fn insert_range(ctx: &mut FusionContext<u16>, range: Range<usize>, id: u16) -> InsertionStatus<u16> {
    let len = ctx.output.len();
    ctx.stats.record_discovered(id);
    let consensus = mask(len, range);
    let mut status = InsertionStatus::default();
    CollisionInsertor.insert(
        consensus.view(),
        ctx,
        &BoundingBox::full(&[len]),
        id,
        &mut status,
    );
    status
}

fn output_of(ctx: &FusionContext<u16>) -> Vec<u16> {
    ctx.output.iter().copied().collect()
}

// ============================================================================
// insert
// ============================================================================

#[test]
fn insert_into_background() {
    let mut ctx = FusionContext::<u16>::new(&[8]);

    let status = insert_range(&mut ctx, 2..5, 3);

    assert!(status.found);
    assert!(!status.in_collision);
    assert!(!status.at_border);
    assert_eq!(status.non_colliding, 3);
    assert_eq!(status.colliding, 0);
    assert_eq!(output_of(&ctx), vec![0, 0, 3, 3, 3, 0, 0, 0]);
    assert_eq!(
        ctx.stats.volume(3),
        ObjectVolume {
            colliding: 0,
            non_colliding: 3
        }
    );
}

#[test]
fn overlapping_insert_writes_sentinel_and_charges_both() {
    let mut ctx = FusionContext::<u16>::new(&[10]);
    insert_range(&mut ctx, 1..5, 1);

    let status = insert_range(&mut ctx, 3..8, 2);

    assert!(status.found);
    assert!(status.in_collision);
    assert_eq!(status.local_colliders.iter().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(status.colliding, 2);
    assert_eq!(status.non_colliding, 3);

    let m = u16::MAX;
    assert_eq!(output_of(&ctx), vec![0, 1, 1, m, m, 2, 2, 2, 0, 0]);
    assert_eq!(
        ctx.stats.volume(1),
        ObjectVolume {
            colliding: 2,
            non_colliding: 2
        }
    );
}

#[test]
fn claim_on_sentinel_charges_only_the_newcomer() {
    let mut ctx = FusionContext::<u16>::new(&[10]);
    insert_range(&mut ctx, 2..5, 1);
    insert_range(&mut ctx, 4..7, 2);

    let status = insert_range(&mut ctx, 4..5, 3);

    assert!(!status.found);
    assert!(status.in_collision);
    assert!(status.local_colliders.is_empty());
    assert_eq!(status.colliding, 1);
    assert_eq!(ctx.stats.volume(1).colliding, 1);
    assert_eq!(ctx.stats.volume(2).colliding, 1);
}

#[test]
fn border_contact_uses_global_coordinates() {
    let mut ctx = FusionContext::<u16>::new(&[4, 6]);
    let region = BoundingBox::new(vec![1, 3], vec![3, 6]);
    let consensus = array![[0.0f32, 1.0, 0.0], [0.0, 0.0, 0.0]].into_dyn();
    let mut status = InsertionStatus::default();

    CollisionInsertor.insert(consensus.view(), &mut ctx, &region, 5, &mut status);
    assert!(!status.at_border);
    assert_eq!(ctx.output[[1, 4]], 5);

    let consensus = array![[0.0f32, 0.0, 0.0], [0.0, 0.0, 1.0]].into_dyn();
    CollisionInsertor.insert(consensus.view(), &mut ctx, &region, 6, &mut status);
    assert!(status.at_border);
    assert_eq!(ctx.output[[2, 5]], 6);
}

#[test]
fn region_mask_lands_row_major_at_offset() {
    let mut ctx = FusionContext::<u16>::new(&[4, 5]);
    let region = BoundingBox::new(vec![1, 1], vec![3, 4]);
    let consensus = array![[1.0f32, 0.0, 1.0], [0.0, 1.0, 1.0]].into_dyn();
    let mut status = InsertionStatus::default();

    CollisionInsertor.insert(consensus.view(), &mut ctx, &region, 7, &mut status);

    let expected = array![
        [0u16, 0, 0, 0, 0],
        [0, 7, 0, 7, 0],
        [0, 0, 7, 7, 0],
        [0, 0, 0, 0, 0]
    ]
    .into_dyn();
    assert_eq!(ctx.output, expected);
    assert_eq!(status.non_colliding, 4);
    assert!(!status.at_border);
}

#[test]
#[should_panic(expected = "does not match the insertion region")]
fn consensus_must_cover_region() {
    let mut ctx = FusionContext::<u16>::new(&[4, 5]);
    let region = BoundingBox::new(vec![1, 1], vec![3, 4]);
    let consensus = array![[1.0f32, 1.0], [1.0, 1.0]].into_dyn();
    let mut status = InsertionStatus::default();

    CollisionInsertor.insert(consensus.view(), &mut ctx, &region, 7, &mut status);
}

#[test]
fn empty_mask_finds_nothing() {
    let mut ctx = FusionContext::<u16>::new(&[6]);
    let status = insert_range(&mut ctx, 0..0, 4);

    assert!(!status.found);
    assert_eq!(status.voxels(), 0);
    assert!(ctx.stats.was_inserted(4));
    assert!(ctx.output.iter().all(|&v| v == 0));
}

#[test]
#[should_panic(expected = "inserted twice")]
fn reinsertion_is_rejected() {
    let mut ctx = FusionContext::<u16>::new(&[6]);
    insert_range(&mut ctx, 1..3, 2);
    insert_range(&mut ctx, 3..5, 2);
}

// ============================================================================
// finalize
// ============================================================================

#[test]
fn collision_ratio_boundary_is_strict() {
    let mut ctx = FusionContext::<u16>::new(&[30]);
    // A: 10 voxels, 1 colliding (ratio 0.1, kept).
    // B: 8 voxels, 1 colliding (ratio 0.125, removed).
    insert_range(&mut ctx, 1..11, 1);
    insert_range(&mut ctx, 10..18, 2);

    let histogram = CollisionInsertor.finalize(&mut ctx, 0.1, false);

    assert_eq!(ctx.stats.classification(1), Classification::Secured);
    assert_eq!(ctx.stats.classification(2), Classification::Colliding);

    let mut expected = vec![0u16; 30];
    expected[1..10].fill(1);
    assert_eq!(output_of(&ctx), expected);

    assert_eq!(histogram.buckets()[1], 2);
    assert_eq!(histogram.total(), 2);
}

#[test]
fn no_sentinel_survives_finalize() {
    let mut ctx = FusionContext::<u16>::new(&[12]);
    insert_range(&mut ctx, 0..6, 1);
    insert_range(&mut ctx, 5..12, 2);

    CollisionInsertor.finalize(&mut ctx, 1.0, false);

    assert!(ctx.output.iter().all(|&v| v != u16::MAX));
    // Threshold 1.0 keeps both; only the shared voxel is cleared.
    assert_eq!(ctx.output.iter().filter(|&&v| v == 0).count(), 1);
    assert!(ctx.stats.colliding().is_empty());
}

#[test]
fn fully_colliding_object_lands_in_last_bucket() {
    let mut ctx = FusionContext::<u16>::new(&[10]);
    insert_range(&mut ctx, 2..8, 1);
    insert_range(&mut ctx, 3..5, 2);

    let histogram = CollisionInsertor.finalize(&mut ctx, 0.5, false);

    // 1: 2 of 6 colliding (bucket 3), 2: 2 of 2 (bucket 10).
    assert_eq!(histogram.buckets()[3], 1);
    assert_eq!(histogram.buckets()[10], 1);
    assert!(ctx.stats.is_colliding(2));
    assert!(!ctx.stats.is_colliding(1));
}

#[test]
fn bordering_objects_are_removed_only_when_requested() {
    for remove in [false, true] {
        let mut ctx = FusionContext::<u16>::new(&[10]);
        let status = insert_range(&mut ctx, 0..3, 1);
        insert_range(&mut ctx, 5..7, 2);
        assert!(status.at_border);
        if remove {
            ctx.stats.mark_bordering(1);
        }

        CollisionInsertor.finalize(&mut ctx, 0.1, remove);

        let survivors: Vec<u16> = ctx.output.iter().copied().filter(|&v| v != 0).collect();
        if remove {
            assert_eq!(survivors, vec![2, 2]);
            assert_eq!(ctx.stats.classification(1), Classification::Bordering);
        } else {
            assert_eq!(survivors, vec![1, 1, 1, 2, 2]);
        }
    }
}

#[test]
fn bordering_object_is_never_also_colliding() {
    let mut ctx = FusionContext::<u16>::new(&[10]);
    insert_range(&mut ctx, 0..4, 1);
    insert_range(&mut ctx, 3..6, 2);
    ctx.stats.mark_bordering(1);

    CollisionInsertor.finalize(&mut ctx, 0.1, true);

    assert_eq!(ctx.stats.classification(1), Classification::Bordering);
    assert_eq!(ctx.stats.classification(2), Classification::Colliding);
    assert!(ctx.output.iter().all(|&v| v == 0));
}

#[test]
fn unmatched_objects_are_not_counted() {
    let mut ctx = FusionContext::<u16>::new(&[10]);
    ctx.stats.record_discovered(1);
    ctx.stats.mark_unmatched(1);
    insert_range(&mut ctx, 4..6, 2);

    let histogram = CollisionInsertor.finalize(&mut ctx, 0.1, false);

    assert_eq!(histogram.total(), 1);
    assert_eq!(histogram.buckets()[0], 1);
}
