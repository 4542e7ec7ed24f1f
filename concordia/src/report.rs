//! Aggregate outcome of a fusion run.

use std::fmt;

use serde::Serialize;

use crate::context::{Classification, FusionStats, ObjectVolume};
use crate::insert::{CollisionHistogram, HISTOGRAM_BUCKETS};
use crate::voxel::Label;

/// Final state of one discovered object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectReport {
    pub id: u64,
    pub classification: Classification,
    #[serde(flatten)]
    pub volume: ObjectVolume,
    /// Restored from the raw marker by the fallback.
    pub recovered: bool,
}

/// Counts, percentages and the collision histogram of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionReport {
    pub discovered: usize,
    pub unmatched: usize,
    pub bordering: usize,
    pub colliding: usize,
    pub secured: usize,
    /// Unmatched or colliding objects restored by the marker fallback.
    pub recovered: usize,
    pub histogram: CollisionHistogram,
    /// Objects in marker encounter order.
    pub objects: Vec<ObjectReport>,
}

impl FusionReport {
    pub fn new<L: Label>(
        stats: &FusionStats<L>,
        histogram: CollisionHistogram,
        recovered: &[L],
    ) -> Self {
        let objects: Vec<ObjectReport> = stats
            .discovered()
            .iter()
            .map(|&id| ObjectReport {
                id: id.to_label(),
                classification: stats.classification(id),
                volume: stats.volume(id),
                recovered: recovered.contains(&id),
            })
            .collect();

        let count = |class: Classification| {
            objects
                .iter()
                .filter(|object| object.classification == class)
                .count()
        };

        Self {
            discovered: objects.len(),
            unmatched: count(Classification::Unmatched),
            bordering: count(Classification::Bordering),
            colliding: count(Classification::Colliding),
            secured: count(Classification::Secured),
            recovered: recovered.len(),
            histogram,
            objects,
        }
    }

    /// Share of discovered objects in percent, 0 when nothing was discovered.
    pub fn percentage(&self, count: usize) -> f64 {
        if self.discovered == 0 {
            return 0.0;
        }
        100.0 * count as f64 / self.discovered as f64
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Fused {} objects: {} secured ({:.1}%), {} unmatched ({:.1}%), {} bordering ({:.1}%), {} colliding ({:.1}%)",
            self.discovered,
            self.secured,
            self.percentage(self.secured),
            self.unmatched,
            self.percentage(self.unmatched),
            self.bordering,
            self.percentage(self.bordering),
            self.colliding,
            self.percentage(self.colliding)
        );
        if self.recovered > 0 {
            tracing::info!("{} objects restored from the marker", self.recovered);
        }
        tracing::debug!("Collision ratio histogram: {:?}", self.histogram.buckets());
    }
}

impl fmt::Display for FusionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Objects discovered: {}", self.discovered)?;
        for (name, count) in [
            ("secured", self.secured),
            ("unmatched", self.unmatched),
            ("bordering", self.bordering),
            ("colliding", self.colliding),
        ] {
            writeln!(
                f,
                "  {name:<10} {count:>6} ({:5.1}%)",
                self.percentage(count)
            )?;
        }
        if self.recovered > 0 {
            writeln!(f, "  recovered  {:>6}", self.recovered)?;
        }

        writeln!(f, "Collision ratio histogram:")?;
        for (bucket, count) in self.histogram.buckets().iter().enumerate() {
            if bucket + 1 == HISTOGRAM_BUCKETS {
                write!(f, "  {:>9} {count:>6}", "100%")?;
            } else {
                writeln!(f, "  {:>3}-{:>3}%  {count:>6}", bucket * 10, bucket * 10 + 10)?;
            }
        }
        Ok(())
    }
}
