//! Configuration types for label fusion.
//!
//! [`FusionConfig`] holds the knobs shared by every policy; [`SimpleConfig`]
//! holds the tunables of the iterative SIMPLE fuser. [`RunConfig`] bundles
//! both with the policy choice, as read from a YAML or JSON file.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default minimal overlap fraction for majority matching (strictly more than half).
pub const DEFAULT_MIN_OVERLAP: f64 = 0.5;

/// Default colliding-voxel ratio above which an object is removed.
pub const DEFAULT_COLLISION_THRESHOLD: f64 = 0.1;

// ============================================================================
// Policy
// ============================================================================

/// Which voting rule builds the consensus mask.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Policy {
    /// Single fixed-threshold weighted vote.
    #[default]
    Bic,
    /// Iterative vote with a decaying candidate-quality threshold.
    Simple,
}

// ============================================================================
// FusionConfig
// ============================================================================

/// Parameters shared by every fusion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// A candidate label matches an object only if it covers strictly more
    /// than this fraction of the object's voxels.
    pub min_overlap: f64,
    /// Objects whose colliding/total voxel ratio is strictly above this value
    /// are removed at finalization.
    pub collision_threshold: f64,
    /// Remove objects that touch the border of the image.
    pub remove_bordering: bool,
    /// Fill background left by removed or unmatched objects with the raw
    /// marker shape.
    pub marker_fallback: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_overlap: DEFAULT_MIN_OVERLAP,
            collision_threshold: DEFAULT_COLLISION_THRESHOLD,
            remove_bordering: false,
            marker_fallback: false,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.min_overlap) {
            return Err(Error::InvalidConfig(format!(
                "min_overlap must be in [0, 1), got {}",
                self.min_overlap
            )));
        }
        if !(0.0..=1.0).contains(&self.collision_threshold) {
            return Err(Error::InvalidConfig(format!(
                "collision_threshold must be in [0, 1], got {}",
                self.collision_threshold
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SimpleConfig
// ============================================================================

/// Tunables of the SIMPLE fuser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleConfig {
    /// Upper bound on voting rounds.
    pub max_iters: usize,
    /// Stop after this many consecutive rounds without a change of the consensus.
    pub no_update_iters: usize,
    /// Dice agreement a candidate needs to stay in the vote after round one.
    pub initial_quality_threshold: f64,
    /// Amount the quality threshold drops after every round.
    pub quality_threshold_step: f64,
    /// Floor of the quality threshold.
    pub minimal_quality_threshold: f64,
}

impl Default for SimpleConfig {
    fn default() -> Self {
        Self {
            max_iters: 4,
            no_update_iters: 2,
            initial_quality_threshold: 0.7,
            quality_threshold_step: 0.1,
            minimal_quality_threshold: 0.3,
        }
    }
}

impl SimpleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iters == 0 {
            return Err(Error::InvalidConfig("max_iters must be > 0".to_string()));
        }
        if self.no_update_iters == 0 {
            return Err(Error::InvalidConfig(
                "no_update_iters must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("initial_quality_threshold", self.initial_quality_threshold),
            ("quality_threshold_step", self.quality_threshold_step),
            ("minimal_quality_threshold", self.minimal_quality_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.minimal_quality_threshold > self.initial_quality_threshold {
            return Err(Error::InvalidConfig(format!(
                "minimal_quality_threshold ({}) must be <= initial_quality_threshold ({})",
                self.minimal_quality_threshold, self.initial_quality_threshold
            )));
        }
        Ok(())
    }

    /// Quality threshold in effect after `rounds_done` completed rounds
    /// (the first reweighting round uses the initial value).
    pub fn quality_threshold(&self, rounds_done: usize) -> f64 {
        let steps = rounds_done.saturating_sub(1) as f64;
        (self.initial_quality_threshold - steps * self.quality_threshold_step)
            .max(self.minimal_quality_threshold)
    }
}

// ============================================================================
// RunConfig
// ============================================================================

/// Everything needed to build a fusion algorithm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub policy: Policy,
    pub fusion: FusionConfig,
    pub simple: SimpleConfig,
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        self.fusion.validate()?;
        self.simple.validate()
    }
}
