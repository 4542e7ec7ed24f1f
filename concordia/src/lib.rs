//! Concordia - marker-guided fusion of instance segmentations.
//!
//! Several candidate segmentations of the same image, each with its own label
//! numbering, are merged into one label image whose ids follow a marker image:
//! - every marker object is matched to the majority-overlapping label of each
//!   candidate
//! - the matched labels are combined by weighted voting (BIC) or by iterative
//!   quality-weighted voting (SIMPLE)
//! - overlapping claims between objects are tracked and objects that collide
//!   too much are removed
//! - every surviving object is reduced to its largest connected component
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use concordia::{FusionAlgorithm, FusionConfig};
//!
//! let algorithm = FusionAlgorithm::<u16, u16>::bic(FusionConfig::default())?;
//! let result = algorithm.fuse(&[a.view(), b.view()], &[1.0, 1.0], marker.view(), 1.0)?;
//!
//! println!("{}", result.report);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod fuse;
pub mod insert;
pub mod io;
pub mod job;
pub mod labeling;
pub mod pipeline;
pub mod postprocess;
pub mod report;
pub mod voxel;

// ============================================================================
// Data model
// ============================================================================

pub use context::{Classification, FusionContext, FusionStats, ObjectVolume};
pub use voxel::{BoundingBox, Label, LabelIndex, Voxel};

// ============================================================================
// Components
// ============================================================================

pub use extract::{LabelExtractor, MajorityOverlapExtractor};
pub use fuse::{LabelFuser, MatchedCandidate, SimpleFuser, ThresholdFuser};
pub use insert::{CollisionHistogram, CollisionInsertor, InsertionStatus, LabelInsertor};
pub use labeling::Connectivity;
pub use postprocess::{LabelPostprocessor, LargestComponentCleaner};

// ============================================================================
// Algorithm
// ============================================================================

pub use config::{FusionConfig, Policy, RunConfig, SimpleConfig};
pub use error::{Component, Error, Result};
pub use pipeline::{FusionAlgorithm, FusionResult};
pub use report::FusionReport;
