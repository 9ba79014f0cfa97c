//! Core domain types for the boxgrid control plane.
//!
//! This crate holds the vocabulary shared by every other crate: worker and
//! container lifecycle states, the host resource sample, the container
//! description (`ContainerSpec`) with its parser, and the coordinator's
//! authoritative `ContainerRecord`.

pub mod spec;
pub mod types;

pub use spec::{parse_container_spec, SpecError};
pub use types::{
    container_id, ContainerId, ContainerRecord, ContainerSpec, ContainerState, ResourceSample,
    WorkerId, WorkerState,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
