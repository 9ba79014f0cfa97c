//! Lifecycle states, resource samples, and container records.
//!
//! These types are the coordinator's authoritative view of the cluster and
//! also travel over the wire (encoded by `boxgrid-proto`, not by serde).

use serde::{Deserialize, Serialize};

/// Stable identifier a worker chooses at first contact (`<hostname>_<pid>`).
pub type WorkerId = String;

/// Globally unique container identifier: `<worker_id>_<name>`.
pub type ContainerId = String;

/// Build the container id for a container `name` placed on `worker_id`.
pub fn container_id(worker_id: &str, name: &str) -> ContainerId {
    format!("{worker_id}_{name}")
}

// ── Lifecycle states ────────────────────────────────────────────────

/// Lifecycle state of a worker as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Connected,
    Busy,
    Error,
}

impl WorkerState {
    /// Short label used in the `list nodes` table.
    pub fn short_label(&self) -> &'static str {
        match self {
            WorkerState::Disconnected => "DISC",
            WorkerState::Connecting => "CONN",
            WorkerState::Connected => "UP",
            WorkerState::Busy => "BUSY",
            WorkerState::Error => "ERROR",
        }
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ContainerState {
    pub fn label(&self) -> &'static str {
        match self {
            ContainerState::Stopped => "STOPPED",
            ContainerState::Starting => "STARTING",
            ContainerState::Running => "RUNNING",
            ContainerState::Stopping => "STOPPING",
            ContainerState::Error => "ERROR",
        }
    }

    /// Wire discriminant. Stable across both ends of a connection.
    pub fn to_wire(self) -> u32 {
        match self {
            ContainerState::Stopped => 0,
            ContainerState::Starting => 1,
            ContainerState::Running => 2,
            ContainerState::Stopping => 3,
            ContainerState::Error => 4,
        }
    }

    pub fn from_wire(v: u32) -> Option<Self> {
        Some(match v {
            0 => ContainerState::Stopped,
            1 => ContainerState::Starting,
            2 => ContainerState::Running,
            3 => ContainerState::Stopping,
            4 => ContainerState::Error,
            _ => return None,
        })
    }
}

// ── Resource sample ─────────────────────────────────────────────────

/// Point-in-time host utilization reported by a worker heartbeat.
///
/// Percentages are in `[0, 100]`. `max_containers` is the worker-declared
/// capacity; a worker at `container_count >= max_containers` is never a
/// placement candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceSample {
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub disk_pct: f64,
    pub container_count: u32,
    pub max_containers: u32,
}

// ── Container description ───────────────────────────────────────────

/// Declarative description of a container, produced by the parser in
/// [`crate::spec`] and shipped to the owning worker on deploy.
///
/// `environment`, `mounts`, and `network` are opaque blobs interpreted by
/// the local driver; `None` means the field was absent (or empty, which the
/// parser treats the same way).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Runtime config file path; when set, the driver generates and writes
    /// a config for the container.
    pub config_file: String,
    pub cpu_limit: u32,
    /// Memory bound in MiB.
    pub memory_limit: u32,
    pub privileged: bool,
    pub environment: Option<String>,
    pub mounts: Option<String>,
    pub network: Option<String>,
}

// ── Container record ────────────────────────────────────────────────

/// The coordinator's (and the worker's local) entry for one container.
///
/// `state` is authoritative on the coordinator: it moves either by local
/// intent (deploy/start/stop) or by a CONTAINER_STATUS report from the
/// owning worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub name: String,
    pub worker_id: WorkerId,
    pub state: ContainerState,
    pub spec: ContainerSpec,
    /// Unix timestamp (seconds) the record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last start; 0 if never started.
    pub started_at: u64,
}

impl ContainerRecord {
    /// Build a fresh record for a container placed on `worker_id`.
    pub fn new(worker_id: &str, spec: ContainerSpec, state: ContainerState, now: u64) -> Self {
        Self {
            id: container_id(worker_id, &spec.name),
            name: spec.name.clone(),
            worker_id: worker_id.to_string(),
            state,
            spec,
            created_at: now,
            started_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_id_joins_worker_and_name() {
        assert_eq!(container_id("host_42", "web"), "host_42_web");
    }

    #[test]
    fn container_state_wire_roundtrip() {
        for state in [
            ContainerState::Stopped,
            ContainerState::Starting,
            ContainerState::Running,
            ContainerState::Stopping,
            ContainerState::Error,
        ] {
            assert_eq!(ContainerState::from_wire(state.to_wire()), Some(state));
        }
        assert_eq!(ContainerState::from_wire(99), None);
    }

    #[test]
    fn record_inherits_spec_name() {
        let spec = ContainerSpec {
            name: "web".to_string(),
            image: "ubuntu:20.04".to_string(),
            ..ContainerSpec::default()
        };
        let rec = ContainerRecord::new("a_1", spec, ContainerState::Starting, 1000);
        assert_eq!(rec.id, "a_1_web");
        assert_eq!(rec.name, "web");
        assert_eq!(rec.worker_id, "a_1");
        assert_eq!(rec.started_at, 0);
    }

    #[test]
    fn worker_state_labels() {
        assert_eq!(WorkerState::Connected.short_label(), "UP");
        assert_eq!(WorkerState::Disconnected.short_label(), "DISC");
    }
}
