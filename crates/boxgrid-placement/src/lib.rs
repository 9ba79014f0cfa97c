//! Placement engine — chooses a worker for a new container.
//!
//! Works on a by-value registry snapshot taken under the registry lock, so
//! a single decision never interleaves with registry mutations and never
//! holds any lock itself.

mod convert;
mod scorer;

pub use convert::candidates;
pub use scorer::{
    place, score_candidate, select_candidate, Candidate, ScoringWeights, LIVENESS_WINDOW,
};

use thiserror::Error;

/// Placement failures.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no eligible worker available")]
    NoCandidate,
}
