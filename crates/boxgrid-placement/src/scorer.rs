//! Candidate eligibility and weighted scoring.
//!
//! Eligibility is a hard filter: Connected, a heartbeat within the liveness
//! window, and free container slots. Survivors are scored on free capacity:
//!
//! ```text
//! score = 0.30·(100 − cpu%) + 0.30·(100 − mem%) + 0.20·(100 − disk%)
//!       + 0.20·100·(1 − container_count/capacity)
//! ```
//!
//! Free slots dominate utilization only weakly: a heavily packed but
//! otherwise idle worker still loses to an equally loaded one with
//! headroom.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use boxgrid_core::{ResourceSample, WorkerState};

use crate::PlacementError;

/// A worker older than this (since its last heartbeat) is never a
/// placement candidate, whatever its recorded state.
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(30);

/// One worker as placement sees it — lifted out of a registry snapshot.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub worker_id: String,
    pub state: WorkerState,
    pub resources: ResourceSample,
    pub last_heartbeat: Instant,
}

/// Weights of the scoring terms. They sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub load: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            cpu: 0.30,
            memory: 0.30,
            disk: 0.20,
            load: 0.20,
        }
    }
}

/// Score one candidate at time `now`; `None` when ineligible.
pub fn score_candidate(
    candidate: &Candidate,
    now: Instant,
    weights: &ScoringWeights,
) -> Option<f64> {
    if candidate.state != WorkerState::Connected {
        return None;
    }
    if now.duration_since(candidate.last_heartbeat) > LIVENESS_WINDOW {
        return None;
    }

    let res = &candidate.resources;
    if res.max_containers == 0 || res.container_count >= res.max_containers {
        return None;
    }

    let load = f64::from(res.container_count) / f64::from(res.max_containers);
    let score = weights.cpu * (100.0 - res.cpu_pct)
        + weights.memory * (100.0 - res.memory_pct)
        + weights.disk * (100.0 - res.disk_pct)
        + weights.load * 100.0 * (1.0 - load);
    Some(score)
}

/// Best eligible candidate at time `now`. Ties go to the earliest
/// registered worker (snapshot order is registration order).
pub fn select_candidate<'a>(
    candidates: &'a [Candidate],
    now: Instant,
    weights: &ScoringWeights,
) -> Option<&'a Candidate> {
    let mut best: Option<(&Candidate, f64)> = None;

    for candidate in candidates {
        let Some(score) = score_candidate(candidate, now, weights) else {
            debug!(worker_id = %candidate.worker_id, "worker ineligible for placement");
            continue;
        };
        debug!(worker_id = %candidate.worker_id, score, "worker scored");
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((candidate, score)),
        }
    }

    if let Some((chosen, score)) = best {
        info!(worker_id = %chosen.worker_id, score, "worker selected for placement");
    }
    best.map(|(candidate, _)| candidate)
}

/// Choose a worker id from a snapshot with the default weights.
pub fn place(candidates: &[Candidate], now: Instant) -> Result<String, PlacementError> {
    select_candidate(candidates, now, &ScoringWeights::default())
        .map(|c| c.worker_id.clone())
        .ok_or(PlacementError::NoCandidate)
}
