//! Worker agent — registers with the coordinator, heartbeats, and services
//! lifecycle commands against the local driver.
//!
//! The heartbeat loop and the command loop run as independent tasks sharing
//! one connection; writes are serialized by the connection's
//! [`MessageSender`]. Cancellation is cooperative: both loops watch a
//! shutdown flag between messages.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use boxgrid_core::{epoch_secs, ContainerRecord, ContainerState};
use boxgrid_proto::{
    decode_spec, read_message, Message, MessageKind, MessageSender, ProtoError, COORDINATOR_ID,
};
use boxgrid_runtime::ContainerDriver;

/// Worker agent failures. Any of these ends the worker process.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to reach coordinator: {0}")]
    Connect(#[from] std::io::Error),

    #[error("registration rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(#[from] ProtoError),
}

/// Static configuration for one worker agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Coordinator endpoint, `host:port`.
    pub coordinator_addr: String,
    /// Stable identity this worker registers as (`<hostname>_<pid>`).
    pub node_id: String,
    pub hostname: String,
    /// Address advertised in REGISTER; workers dial out only, so the
    /// advertised port is 0.
    pub advertised_ip: String,
    pub heartbeat_interval: Duration,
}

/// The worker-side agent. Owns the local container table and the driver.
pub struct WorkerAgent {
    config: AgentConfig,
    driver: Arc<dyn ContainerDriver>,
    containers: Mutex<Vec<ContainerRecord>>,
}

impl WorkerAgent {
    pub fn new(config: AgentConfig, driver: Arc<dyn ContainerDriver>) -> Self {
        Self {
            config,
            driver,
            containers: Mutex::new(Vec::new()),
        }
    }

    /// The worker's local container table, by value.
    pub async fn local_containers(&self) -> Vec<ContainerRecord> {
        self.containers.lock().await.clone()
    }

    /// Connect, register, then serve heartbeats and commands until the
    /// connection drops or shutdown is signalled.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<(), AgentError> {
        let stream = TcpStream::connect(&self.config.coordinator_addr).await?;
        info!(addr = %self.config.coordinator_addr, node_id = %self.config.node_id,
              "connected to coordinator");

        let (mut reader, writer) = stream.into_split();
        let sender = MessageSender::new(writer);

        self.register(&mut reader, &sender).await?;

        let heartbeat = tokio::spawn(self.clone().heartbeat_loop(sender.clone(), shutdown.clone()));

        let result = self.command_loop(&mut reader, &sender, shutdown).await;

        heartbeat.abort();
        let _ = heartbeat.await;
        result
    }

    /// Send REGISTER and wait for the coordinator's verdict.
    async fn register(
        &self,
        reader: &mut OwnedReadHalf,
        sender: &MessageSender,
    ) -> Result<(), AgentError> {
        let msg = Message::register(
            &self.config.node_id,
            COORDINATOR_ID,
            &self.config.hostname,
            &self.config.advertised_ip,
            0,
        );
        sender.send(&msg).await?;

        let reply = read_message(reader).await?;
        if reply.kind != MessageKind::Ack {
            return Err(AgentError::Rejected(reply.payload_text()));
        }
        info!(node_id = %self.config.node_id, "registered with coordinator");
        Ok(())
    }

    /// Sample and report resources every heartbeat interval.
    async fn heartbeat_loop(
        self: Arc<Self>,
        sender: MessageSender,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.heartbeat_interval) => {
                    match self.driver.sample().await {
                        Ok(sample) => {
                            let msg = Message::heartbeat(
                                &self.config.node_id, COORDINATOR_ID, &sample);
                            if let Err(e) = sender.send(&msg).await {
                                warn!(error = %e, "failed to send heartbeat");
                            } else {
                                debug!(cpu = sample.cpu_pct, mem = sample.memory_pct,
                                       containers = sample.container_count, "heartbeat sent");
                            }
                        }
                        Err(e) => warn!(error = %e, "resource sampling failed"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("heartbeat loop shutting down");
                    break;
                }
            }
        }
    }

    /// Read and service coordinator commands until end of stream.
    async fn command_loop(
        &self,
        reader: &mut OwnedReadHalf,
        sender: &MessageSender,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), AgentError> {
        loop {
            let msg = tokio::select! {
                msg = read_message(reader) => msg,
                _ = shutdown.changed() => {
                    info!("worker shutting down");
                    return Ok(());
                }
            };

            let msg = match msg {
                Ok(msg) => msg,
                Err(ProtoError::UnknownKind(tag)) => {
                    warn!(tag, "unknown message tag, ignoring");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "connection to coordinator lost");
                    return Err(e.into());
                }
            };

            match msg.kind {
                MessageKind::Deploy => self.handle_deploy(&msg, sender).await?,
                MessageKind::Start => {
                    self.handle_start(&msg.payload_text(), sender).await?;
                }
                MessageKind::Stop => {
                    self.handle_stop(&msg.payload_text(), sender).await?;
                }
                MessageKind::Delete => {
                    self.handle_delete(&msg.payload_text(), sender).await?;
                }
                other => debug!(kind = ?other, "unhandled message"),
            }
        }
    }

    async fn handle_deploy(
        &self,
        msg: &Message,
        sender: &MessageSender,
    ) -> Result<(), AgentError> {
        let spec = match decode_spec(&msg.payload) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "malformed deploy payload ignored");
                return Ok(());
            }
        };
        info!(name = %spec.name, image = %spec.image, "deploying container");

        match self.driver.create(&spec).await {
            Ok(()) => {
                let record = ContainerRecord::new(
                    &self.config.node_id,
                    spec,
                    ContainerState::Stopped,
                    epoch_secs(),
                );
                {
                    let mut containers = self.containers.lock().await;
                    if !containers.iter().any(|c| c.id == record.id) {
                        containers.push(record.clone());
                    }
                }
                // New containers begin life stopped; let the coordinator
                // reconcile its Starting intent before the ACK.
                let status =
                    Message::container_status(&self.config.node_id, COORDINATOR_ID, &record);
                sender.send(&status).await?;
                let reply = Message::ack(&self.config.node_id, COORDINATOR_ID, "deployed");
                sender.send(&reply).await?;
            }
            Err(e) => {
                warn!(error = %e, "container creation failed");
                let reply =
                    Message::error(&self.config.node_id, COORDINATOR_ID, "deployment failed");
                sender.send(&reply).await?;
            }
        }
        Ok(())
    }

    async fn handle_start(&self, name: &str, sender: &MessageSender) -> Result<(), AgentError> {
        info!(%name, "starting container");

        if !self.set_state_by_name(name, ContainerState::Starting).await {
            warn!(%name, "start for unknown container");
            let reply = Message::error(&self.config.node_id, COORDINATOR_ID, "start failed");
            sender.send(&reply).await?;
            return Ok(());
        }

        match self.driver.start(name).await {
            Ok(()) => {
                let record = {
                    let mut containers = self.containers.lock().await;
                    containers.iter_mut().find(|c| c.name == name).map(|record| {
                        record.state = ContainerState::Running;
                        record.started_at = epoch_secs();
                        record.clone()
                    })
                };
                if let Some(record) = record {
                    let status =
                        Message::container_status(&self.config.node_id, COORDINATOR_ID, &record);
                    sender.send(&status).await?;
                }
                let reply = Message::ack(&self.config.node_id, COORDINATOR_ID, "started");
                sender.send(&reply).await?;
            }
            Err(e) => {
                warn!(%name, error = %e, "container start failed");
                self.set_state_by_name(name, ContainerState::Error).await;
                let reply = Message::error(&self.config.node_id, COORDINATOR_ID, "start failed");
                sender.send(&reply).await?;
            }
        }
        Ok(())
    }

    async fn handle_stop(&self, name: &str, sender: &MessageSender) -> Result<(), AgentError> {
        info!(%name, "stopping container");

        if !self.set_state_by_name(name, ContainerState::Stopping).await {
            warn!(%name, "stop for unknown container");
            let reply = Message::error(&self.config.node_id, COORDINATOR_ID, "stop failed");
            sender.send(&reply).await?;
            return Ok(());
        }

        match self.driver.stop(name).await {
            Ok(()) => {
                let record = {
                    let mut containers = self.containers.lock().await;
                    containers.iter_mut().find(|c| c.name == name).map(|record| {
                        record.state = ContainerState::Stopped;
                        record.clone()
                    })
                };
                if let Some(record) = record {
                    let status =
                        Message::container_status(&self.config.node_id, COORDINATOR_ID, &record);
                    sender.send(&status).await?;
                }
                let reply = Message::ack(&self.config.node_id, COORDINATOR_ID, "stopped");
                sender.send(&reply).await?;
            }
            Err(e) => {
                warn!(%name, error = %e, "container stop failed");
                self.set_state_by_name(name, ContainerState::Error).await;
                let reply = Message::error(&self.config.node_id, COORDINATOR_ID, "stop failed");
                sender.send(&reply).await?;
            }
        }
        Ok(())
    }

    async fn handle_delete(&self, name: &str, sender: &MessageSender) -> Result<(), AgentError> {
        info!(%name, "deleting container");

        let known = {
            let mut containers = self.containers.lock().await;
            let before = containers.len();
            containers.retain(|c| c.name != name);
            containers.len() < before
        };

        let reply = if known && self.driver.destroy(name).await.is_ok() {
            Message::ack(&self.config.node_id, COORDINATOR_ID, "deleted")
        } else {
            warn!(%name, "container deletion failed");
            Message::error(&self.config.node_id, COORDINATOR_ID, "delete failed")
        };
        sender.send(&reply).await?;
        Ok(())
    }

    /// Set a local container's state by name. Returns false when the name
    /// is unknown.
    async fn set_state_by_name(&self, name: &str, state: ContainerState) -> bool {
        let mut containers = self.containers.lock().await;
        match containers.iter_mut().find(|c| c.name == name) {
            Some(record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }
}
