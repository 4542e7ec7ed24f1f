//! Configuration errors raised before a fusion run touches any voxel.

use thiserror::Error;

/// Sub-component roles of a fusion algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Component {
    Extractor,
    Fuser,
    Insertor,
    Postprocessor,
}

/// Errors that can occur while setting up a fusion run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Fusion component '{0}' is not configured")]
    MissingComponent(Component),

    #[error("No candidate images provided")]
    NoCandidates,

    #[error("Weight count mismatch: {candidates} candidate images but {weights} weights")]
    WeightCountMismatch { candidates: usize, weights: usize },

    #[error("Invalid weight {weight} for candidate {index}: weights must be finite and non-negative")]
    InvalidWeight { index: usize, weight: f32 },

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Marker image contains the reserved intersection value {0}")]
    ReservedLabel(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
