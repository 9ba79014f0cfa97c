//! Worker registry — process-wide directory of known workers.
//!
//! Records are kept in registration order (the placement tie-break relies
//! on it) and survive disconnects: a closed connection moves the record to
//! Disconnected but keeps it, and its containers, visible for inspection.
//! Only an explicit `remove` drops a record.

use std::sync::Mutex;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use boxgrid_core::{ContainerRecord, ContainerState, ResourceSample, WorkerState};
use boxgrid_proto::MessageSender;

/// Registry capacity.
pub const MAX_WORKERS: usize = 256;

/// Registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry full ({MAX_WORKERS} workers)")]
    Capacity,
}

/// One worker as the coordinator last observed it.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub state: WorkerState,
    pub resources: ResourceSample,
    /// Monotonic timestamp of the last REGISTER or HEARTBEAT.
    pub last_heartbeat: Instant,
    /// Write handle for the live session, if any.
    pub connection: Option<MessageSender>,
    /// This worker's containers as mirrored on the coordinator.
    pub containers: Vec<ContainerRecord>,
}

/// Directory of workers, serialized under one lock. `snapshot` copies
/// records out so decisions (placement, listings) run outside the lock.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Mutex<Vec<WorkerRecord>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh a worker record.
    ///
    /// Re-registration with a known id overwrites hostname/address/port in
    /// place, flips the record to Connected, and resets the heartbeat
    /// clock; it never duplicates. New ids are appended when capacity
    /// permits.
    pub fn upsert(
        &self,
        id: &str,
        hostname: &str,
        address: &str,
        port: u16,
    ) -> Result<(), RegistryError> {
        let mut workers = self.lock();

        if let Some(record) = workers.iter_mut().find(|w| w.id == id) {
            record.hostname = hostname.to_string();
            record.address = address.to_string();
            record.port = port;
            record.state = WorkerState::Connected;
            record.last_heartbeat = Instant::now();
            debug!(worker_id = %id, "worker re-registered");
            return Ok(());
        }

        if workers.len() >= MAX_WORKERS {
            return Err(RegistryError::Capacity);
        }

        workers.push(WorkerRecord {
            id: id.to_string(),
            hostname: hostname.to_string(),
            address: address.to_string(),
            port,
            state: WorkerState::Connected,
            resources: ResourceSample::default(),
            last_heartbeat: Instant::now(),
            connection: None,
            containers: Vec::new(),
        });
        info!(worker_id = %id, %hostname, %address, "worker registered");
        Ok(())
    }

    /// Attach the session's write handle to a worker record.
    pub fn bind_connection(&self, id: &str, connection: MessageSender) -> bool {
        let mut workers = self.lock();
        match workers.iter_mut().find(|w| w.id == id) {
            Some(record) => {
                record.connection = Some(connection);
                true
            }
            None => false,
        }
    }

    /// By-value copy of one record.
    pub fn find(&self, id: &str) -> Option<WorkerRecord> {
        self.lock().iter().find(|w| w.id == id).cloned()
    }

    /// Drop a record entirely. Returns false for unknown ids.
    pub fn remove(&self, id: &str) -> bool {
        let mut workers = self.lock();
        let before = workers.len();
        workers.retain(|w| w.id != id);
        let removed = workers.len() < before;
        if removed {
            info!(worker_id = %id, "worker unregistered");
        }
        removed
    }

    /// Consistent by-value copy of every record, in registration order.
    pub fn snapshot(&self) -> Vec<WorkerRecord> {
        self.lock().clone()
    }

    /// Fold in a heartbeat: refresh the sample, mark Connected, reset the
    /// heartbeat clock. Returns false for unknown ids.
    pub fn touch(&self, id: &str, sample: ResourceSample) -> bool {
        let mut workers = self.lock();
        match workers.iter_mut().find(|w| w.id == id) {
            Some(record) => {
                record.resources = sample;
                record.state = WorkerState::Connected;
                record.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Mark a worker Disconnected and drop its write handle. The record —
    /// and the containers placed on it — stay visible.
    pub fn close_connection(&self, id: &str) {
        let mut workers = self.lock();
        if let Some(record) = workers.iter_mut().find(|w| w.id == id) {
            record.state = WorkerState::Disconnected;
            record.connection = None;
            info!(worker_id = %id, "worker disconnected");
        }
    }

    /// Mirror a freshly deployed container into the worker's local view.
    pub fn append_container(&self, id: &str, container: ContainerRecord) {
        let mut workers = self.lock();
        if let Some(record) = workers.iter_mut().find(|w| w.id == id) {
            record.containers.push(container);
        }
    }

    /// Drop a container from the worker's local view.
    pub fn remove_container(&self, id: &str, container_id: &str) {
        let mut workers = self.lock();
        if let Some(record) = workers.iter_mut().find(|w| w.id == id) {
            record.containers.retain(|c| c.id != container_id);
        }
    }

    /// Update one container's state in the worker's local view.
    pub fn update_container_state(&self, id: &str, container_id: &str, state: ContainerState) {
        let mut workers = self.lock();
        if let Some(record) = workers.iter_mut().find(|w| w.id == id) {
            if let Some(container) = record.containers.iter_mut().find(|c| c.id == container_id) {
                container.state = state;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<WorkerRecord>> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
