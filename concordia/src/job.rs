//! Batch job description: `(image weight)... marker threshold output`.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error(
        "Expected at least one 'image weight' pair followed by 'marker threshold output', got {0} arguments"
    )]
    WrongArgumentCount(usize),
    #[error("Invalid weight '{value}' for '{path}': expected a finite, non-negative number")]
    InvalidWeight { path: String, value: String },
    #[error("Invalid threshold '{0}': expected a finite number")]
    InvalidThreshold(String),
}

/// One candidate image and its voting weight.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateInput {
    pub path: PathBuf,
    pub weight: f32,
}

/// Inputs and output of one fusion run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub candidates: Vec<CandidateInput>,
    pub marker: PathBuf,
    pub threshold: f32,
    pub output: PathBuf,
}

impl JobSpec {
    /// Parses positional arguments (program name excluded).
    ///
    /// Valid lists hold `2k + 3` tokens with `k >= 1`.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, JobError> {
        let n = tokens.len();
        if n < 5 || (n - 3) % 2 != 0 {
            return Err(JobError::WrongArgumentCount(n));
        }

        let (pairs, tail) = tokens.split_at(n - 3);
        let candidates = pairs
            .chunks_exact(2)
            .map(|pair| {
                let path = pair[0].as_ref();
                let value = pair[1].as_ref();
                match value.parse::<f32>() {
                    Ok(weight) if weight.is_finite() && weight >= 0.0 => Ok(CandidateInput {
                        path: PathBuf::from(path),
                        weight,
                    }),
                    _ => Err(JobError::InvalidWeight {
                        path: path.to_string(),
                        value: value.to_string(),
                    }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let threshold_token = tail[1].as_ref();
        let threshold = threshold_token
            .parse::<f32>()
            .ok()
            .filter(|t| t.is_finite())
            .ok_or_else(|| JobError::InvalidThreshold(threshold_token.to_string()))?;

        Ok(Self {
            candidates,
            marker: PathBuf::from(tail[0].as_ref()),
            threshold,
            output: PathBuf::from(tail[2].as_ref()),
        })
    }

    pub fn weights(&self) -> Vec<f32> {
        self.candidates.iter().map(|c| c.weight).collect()
    }
}
