//! The distributed control plane.
//!
//! Coordinator side: [`WorkerRegistry`] (directory of known workers),
//! [`ContainerIndex`] (authoritative container records), and the per-
//! connection session handler in [`session`]. Worker side: the
//! [`WorkerAgent`] that registers, heartbeats, and services lifecycle
//! commands against a local [`boxgrid_runtime::ContainerDriver`].
//!
//! The registry and the index each carry their own lock; no code path
//! acquires both at once. The index sends lifecycle messages while holding
//! its lock, which serializes transitions per container.

pub mod agent;
pub mod index;
pub mod registry;
pub mod session;

pub use agent::{AgentConfig, AgentError, WorkerAgent};
pub use index::{ContainerIndex, IndexError, MAX_CONTAINERS};
pub use registry::{RegistryError, WorkerRecord, WorkerRegistry, MAX_WORKERS};
