//! Container index — the coordinator's authoritative container directory.
//!
//! Lifecycle operations send their command to the owning worker while
//! holding the index lock, which serializes transitions per container and
//! keeps racing deletes out. The owning worker's connection handle is
//! resolved from the registry *before* the index lock is taken — the index
//! never holds both locks — and the record is re-validated once the lock is
//! held.
//!
//! Local transitions are intent: deploy inserts at Starting, start moves to
//! Starting, stop to Stopping, each before any ACK arrives. The worker's
//! subsequent CONTAINER_STATUS report is the reconciling truth.

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use boxgrid_core::{
    container_id, epoch_secs, ContainerId, ContainerRecord, ContainerSpec, ContainerState,
    WorkerState,
};
use boxgrid_proto::{Message, MessageSender, COORDINATOR_ID};

use crate::registry::WorkerRegistry;

/// Container index capacity.
pub const MAX_CONTAINERS: usize = 1024;

/// Container index failures.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("container {0} not found")]
    UnknownContainer(String),

    #[error("worker {0} not found")]
    UnknownWorker(String),

    #[error("container {0} already deployed")]
    Duplicate(String),

    #[error("worker {0} is unreachable")]
    Unreachable(String),

    #[error("container index full ({MAX_CONTAINERS} containers)")]
    Capacity,
}

/// Directory of deployed containers, serialized under its own lock.
#[derive(Debug, Default)]
pub struct ContainerIndex {
    containers: Mutex<Vec<ContainerRecord>>,
}

impl ContainerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a container onto `worker_id`.
    ///
    /// Sends DEPLOY first; a failed send leaves the index untouched. On
    /// success the record is inserted at Starting and mirrored into the
    /// worker's local view.
    pub async fn deploy(
        &self,
        registry: &WorkerRegistry,
        worker_id: &str,
        spec: ContainerSpec,
    ) -> Result<ContainerId, IndexError> {
        let worker = registry
            .find(worker_id)
            .ok_or_else(|| IndexError::UnknownWorker(worker_id.to_string()))?;
        if worker.state != WorkerState::Connected {
            return Err(IndexError::Unreachable(worker_id.to_string()));
        }
        let connection = worker
            .connection
            .ok_or_else(|| IndexError::Unreachable(worker_id.to_string()))?;

        let id = container_id(worker_id, &spec.name);

        let record = {
            let mut containers = self.containers.lock().await;

            if containers.len() >= MAX_CONTAINERS {
                return Err(IndexError::Capacity);
            }
            if containers.iter().any(|c| c.id == id) {
                return Err(IndexError::Duplicate(id));
            }

            let msg = Message::deploy(COORDINATOR_ID, worker_id, &spec);
            connection
                .send(&msg)
                .await
                .map_err(|_| IndexError::Unreachable(worker_id.to_string()))?;

            let record =
                ContainerRecord::new(worker_id, spec, ContainerState::Starting, epoch_secs());
            containers.push(record.clone());
            record
        };

        registry.append_container(worker_id, record.clone());
        info!(container_id = %record.id, %worker_id, "container deployed");
        Ok(record.id)
    }

    /// Send START to the owning worker and transition to Starting.
    pub async fn start(
        &self,
        registry: &WorkerRegistry,
        container_id: &str,
    ) -> Result<(), IndexError> {
        let (worker_id, name) = self.resolve(container_id).await?;
        let connection = self.live_connection(registry, &worker_id)?;

        let mut containers = self.containers.lock().await;
        let record = containers
            .iter_mut()
            .find(|c| c.id == container_id)
            .ok_or_else(|| IndexError::UnknownContainer(container_id.to_string()))?;

        let msg = Message::start(COORDINATOR_ID, &worker_id, &name);
        connection
            .send(&msg)
            .await
            .map_err(|_| IndexError::Unreachable(worker_id.clone()))?;

        record.state = ContainerState::Starting;
        record.started_at = epoch_secs();
        info!(%container_id, %worker_id, "start command sent");
        Ok(())
    }

    /// Send STOP to the owning worker and transition to Stopping.
    pub async fn stop(
        &self,
        registry: &WorkerRegistry,
        container_id: &str,
    ) -> Result<(), IndexError> {
        let (worker_id, name) = self.resolve(container_id).await?;
        let connection = self.live_connection(registry, &worker_id)?;

        let mut containers = self.containers.lock().await;
        let record = containers
            .iter_mut()
            .find(|c| c.id == container_id)
            .ok_or_else(|| IndexError::UnknownContainer(container_id.to_string()))?;

        let msg = Message::stop(COORDINATOR_ID, &worker_id, &name);
        connection
            .send(&msg)
            .await
            .map_err(|_| IndexError::Unreachable(worker_id.clone()))?;

        record.state = ContainerState::Stopping;
        info!(%container_id, %worker_id, "stop command sent");
        Ok(())
    }

    /// Remove a container, best-effort.
    ///
    /// DELETE is sent when the owning worker is reachable; a failed or
    /// impossible send only warns. The record is removed either way, on the
    /// premise the worker reconciles on reconnect.
    pub async fn delete(
        &self,
        registry: &WorkerRegistry,
        container_id: &str,
    ) -> Result<(), IndexError> {
        let (worker_id, name) = self.resolve(container_id).await?;
        let connection = registry.find(&worker_id).and_then(|w| w.connection);

        {
            let mut containers = self.containers.lock().await;
            if !containers.iter().any(|c| c.id == container_id) {
                return Err(IndexError::UnknownContainer(container_id.to_string()));
            }

            match connection {
                Some(connection) => {
                    let msg = Message::delete(COORDINATOR_ID, &worker_id, &name);
                    if let Err(e) = connection.send(&msg).await {
                        warn!(%container_id, %worker_id, error = %e,
                              "failed to send delete command");
                    }
                }
                None => {
                    warn!(%container_id, %worker_id, "worker unreachable, removing record anyway");
                }
            }

            containers.retain(|c| c.id != container_id);
        }

        registry.remove_container(&worker_id, container_id);
        info!(%container_id, %worker_id, "container deleted");
        Ok(())
    }

    /// Current state of a container; Error for unknown ids.
    pub async fn status(&self, container_id: &str) -> ContainerState {
        self.containers
            .lock()
            .await
            .iter()
            .find(|c| c.id == container_id)
            .map(|c| c.state)
            .unwrap_or(ContainerState::Error)
    }

    /// By-value copy of every record.
    pub async fn list(&self) -> Vec<ContainerRecord> {
        self.containers.lock().await.clone()
    }

    /// Overwrite a container's state from a worker report. Returns false
    /// for unknown ids.
    pub async fn update_state(&self, container_id: &str, state: ContainerState) -> bool {
        let mut containers = self.containers.lock().await;
        match containers.iter_mut().find(|c| c.id == container_id) {
            Some(record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }

    /// Owning worker and container name for an id, under a brief lock.
    async fn resolve(&self, container_id: &str) -> Result<(String, String), IndexError> {
        self.containers
            .lock()
            .await
            .iter()
            .find(|c| c.id == container_id)
            .map(|c| (c.worker_id.clone(), c.name.clone()))
            .ok_or_else(|| IndexError::UnknownContainer(container_id.to_string()))
    }

    /// Connected write handle for a worker, or Unreachable.
    fn live_connection(
        &self,
        registry: &WorkerRegistry,
        worker_id: &str,
    ) -> Result<MessageSender, IndexError> {
        let worker = registry
            .find(worker_id)
            .ok_or_else(|| IndexError::UnknownWorker(worker_id.to_string()))?;
        worker
            .connection
            .ok_or_else(|| IndexError::Unreachable(worker_id.to_string()))
    }
}
