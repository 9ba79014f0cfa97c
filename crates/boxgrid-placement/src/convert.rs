//! Lifting registry snapshots into placement candidates.

use boxgrid_cluster::WorkerRecord;

use crate::scorer::Candidate;

impl From<&WorkerRecord> for Candidate {
    fn from(record: &WorkerRecord) -> Self {
        Candidate {
            worker_id: record.id.clone(),
            state: record.state,
            resources: record.resources,
            last_heartbeat: record.last_heartbeat,
        }
    }
}

/// Convert a whole snapshot, preserving registration order.
pub fn candidates(snapshot: &[WorkerRecord]) -> Vec<Candidate> {
    snapshot.iter().map(Candidate::from).collect()
}
