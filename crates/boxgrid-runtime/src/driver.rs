//! The driver seam between the worker agent and the host runtime.

use async_trait::async_trait;
use thiserror::Error;

use boxgrid_core::{ContainerSpec, ResourceSample};

/// Failures from the local container runtime.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid container configuration: {0}")]
    InvalidSpec(&'static str),

    #[error("container {0} does not exist")]
    NotFound(String),

    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle and sampling operations against the local runtime.
///
/// Implementations must be safe to call from the heartbeat and command
/// loops concurrently.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Create a container from its description. Creating a container that
    /// already exists succeeds without change.
    async fn create(&self, spec: &ContainerSpec) -> Result<(), DriverError>;

    async fn start(&self, name: &str) -> Result<(), DriverError>;

    async fn stop(&self, name: &str) -> Result<(), DriverError>;

    /// Destroy a container, stopping it first if needed. Destroying a
    /// container that does not exist succeeds.
    async fn destroy(&self, name: &str) -> Result<(), DriverError>;

    /// Sample host utilization and the runtime's container count.
    async fn sample(&self) -> Result<ResourceSample, DriverError>;
}
