//! Coordinator-side session handler — one per accepted connection.
//!
//! The handler owns the connection's read half until end of stream. A
//! REGISTER binds the connection to a worker record; from then on every
//! message on this connection is attributed to that id. Transport failures
//! terminate the session and move the bound worker to Disconnected; logical
//! failures (unknown tags, malformed payloads) are logged and the session
//! continues.
//!
//! The handler never blocks placement: placement works from registry
//! snapshots, and the handler only takes the registry lock for short,
//! await-free updates.

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use boxgrid_proto::{
    decode_container, decode_sample, read_message, Message, MessageKind, MessageSender,
    ProtoError, COORDINATOR_ID,
};

use crate::index::ContainerIndex;
use crate::registry::{RegistryError, WorkerRegistry};

/// Drive one worker connection to completion.
pub async fn run_session(
    stream: TcpStream,
    registry: Arc<WorkerRegistry>,
    index: Arc<ContainerIndex>,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(%peer, "worker connection accepted");

    let (mut reader, writer) = stream.into_split();
    let sender = MessageSender::new(writer);

    // Worker id this connection registered as, once known.
    let mut bound: Option<String> = None;

    loop {
        let msg = match read_message(&mut reader).await {
            Ok(msg) => msg,
            Err(ProtoError::UnknownKind(tag)) => {
                warn!(%peer, tag, "unknown message tag, ignoring");
                continue;
            }
            Err(ProtoError::Closed) => {
                debug!(%peer, "session ended");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "transport error, terminating session");
                break;
            }
        };

        match msg.kind {
            MessageKind::Register => {
                let reply = match handle_register(&registry, &sender, &msg) {
                    Ok(worker_id) => {
                        bound = Some(worker_id.clone());
                        Message::ack(COORDINATOR_ID, &worker_id, "registered")
                    }
                    Err(text) => {
                        warn!(%peer, worker_id = %msg.sender, "registration rejected: {text}");
                        Message::error(COORDINATOR_ID, &msg.sender, text)
                    }
                };
                if sender.send(&reply).await.is_err() {
                    break;
                }
            }

            MessageKind::Heartbeat => match decode_sample(&msg.payload) {
                Ok(sample) => {
                    if !registry.touch(&msg.sender, sample) {
                        warn!(worker_id = %msg.sender, "heartbeat from unknown worker");
                    }
                }
                Err(_) => debug!(worker_id = %msg.sender, "short heartbeat ignored"),
            },

            MessageKind::ContainerStatus => match decode_container(&msg.payload) {
                Ok(report) => {
                    debug!(worker_id = %msg.sender, container_id = %report.id,
                           state = report.state.label(), "container status report");
                    registry.update_container_state(&msg.sender, &report.id, report.state);
                    index.update_state(&report.id, report.state).await;
                }
                Err(e) => warn!(worker_id = %msg.sender, error = %e, "bad status report"),
            },

            MessageKind::Error => {
                warn!(worker_id = %msg.sender, "error from worker: {}", msg.payload_text());
            }

            other => debug!(worker_id = %msg.sender, kind = ?other, "unhandled message"),
        }
    }

    if let Some(worker_id) = bound {
        registry.close_connection(&worker_id);
    }
}

/// Parse and apply a REGISTER. Returns the worker id on success, a
/// rejection text otherwise.
fn handle_register(
    registry: &WorkerRegistry,
    sender: &MessageSender,
    msg: &Message,
) -> Result<String, &'static str> {
    let payload = msg.payload_text();
    let Some((hostname, ip, port)) = parse_register(&payload) else {
        return Err("malformed register");
    };
    if msg.sender.is_empty() {
        return Err("malformed register");
    }

    match registry.upsert(&msg.sender, hostname, ip, port) {
        Ok(()) => {
            registry.bind_connection(&msg.sender, sender.clone());
            Ok(msg.sender.clone())
        }
        Err(RegistryError::Capacity) => Err("registry full"),
    }
}

/// Split `"<hostname> <ip> <port>"`.
fn parse_register(payload: &str) -> Option<(&str, &str, u16)> {
    let mut parts = payload.split_whitespace();
    let hostname = parts.next()?;
    let ip = parts.next()?;
    let port = parts.next()?.parse().ok()?;
    Some((hostname, ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxgrid_core::{ContainerRecord, ContainerSpec, ContainerState, ResourceSample};
    use boxgrid_proto::write_message;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    struct Harness {
        registry: Arc<WorkerRegistry>,
        index: Arc<ContainerIndex>,
        addr: std::net::SocketAddr,
    }

    async fn harness() -> Harness {
        let registry = Arc::new(WorkerRegistry::new());
        let index = Arc::new(ContainerIndex::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (accept_registry, accept_index) = (registry.clone(), index.clone());
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(run_session(
                    stream,
                    accept_registry.clone(),
                    accept_index.clone(),
                ));
            }
        });

        Harness {
            registry,
            index,
            addr,
        }
    }

    async fn register(h: &Harness, id: &str) -> TcpStream {
        let mut stream = TcpStream::connect(h.addr).await.unwrap();
        let msg = Message::register(id, COORDINATOR_ID, "host", "10.0.0.1", 0);
        write_message(&mut stream, &msg).await.unwrap();
        let reply = read_message(&mut stream).await.unwrap();
        assert_eq!(reply.kind, MessageKind::Ack);
        assert_eq!(reply.payload_text(), "registered");
        stream
    }

    /// Wait until `check` passes; sessions apply messages asynchronously.
    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn register_creates_record_and_binds_connection() {
        let h = harness().await;
        let _stream = register(&h, "a_1").await;

        let record = h.registry.find("a_1").unwrap();
        assert_eq!(record.hostname, "host");
        assert!(record.connection.is_some());
    }

    #[tokio::test]
    async fn malformed_register_keeps_connection_open() {
        let h = harness().await;
        let mut stream = TcpStream::connect(h.addr).await.unwrap();

        let bad = Message::new(MessageKind::Register, "a_1", COORDINATOR_ID, b"garbage".to_vec());
        write_message(&mut stream, &bad).await.unwrap();
        let reply = read_message(&mut stream).await.unwrap();
        assert_eq!(reply.kind, MessageKind::Error);
        assert!(h.registry.find("a_1").is_none());

        // The session survived; a proper REGISTER now succeeds.
        let good = Message::register("a_1", COORDINATOR_ID, "host", "10.0.0.1", 0);
        write_message(&mut stream, &good).await.unwrap();
        let reply = read_message(&mut stream).await.unwrap();
        assert_eq!(reply.kind, MessageKind::Ack);
    }

    #[tokio::test]
    async fn heartbeat_touches_registry() {
        let h = harness().await;
        let mut stream = register(&h, "a_1").await;

        let sample = ResourceSample {
            cpu_pct: 12.0,
            memory_pct: 34.0,
            disk_pct: 56.0,
            container_count: 2,
            max_containers: 50,
        };
        let msg = Message::heartbeat("a_1", COORDINATOR_ID, &sample);
        write_message(&mut stream, &msg).await.unwrap();

        let registry = h.registry.clone();
        eventually(move || registry.find("a_1").unwrap().resources == sample).await;
    }

    #[tokio::test]
    async fn disconnect_marks_worker_disconnected() {
        let h = harness().await;
        let stream = register(&h, "a_1").await;
        drop(stream);

        let registry = h.registry.clone();
        eventually(move || {
            registry.find("a_1").unwrap().state == boxgrid_core::WorkerState::Disconnected
        })
        .await;
        // Record itself is retained.
        assert!(h.registry.find("a_1").is_some());
    }

    #[tokio::test]
    async fn status_report_updates_index_and_worker_view() {
        let h = harness().await;
        let mut stream = register(&h, "a_1").await;

        // Deploy through the index so both views hold the record.
        let spec = ContainerSpec {
            name: "web".to_string(),
            ..ContainerSpec::default()
        };
        h.index.deploy(&h.registry, "a_1", spec.clone()).await.unwrap();
        let deploy = read_message(&mut stream).await.unwrap();
        assert_eq!(deploy.kind, MessageKind::Deploy);

        let report = ContainerRecord::new("a_1", spec, ContainerState::Stopped, 0);
        let msg = Message::container_status("a_1", COORDINATOR_ID, &report);
        write_message(&mut stream, &msg).await.unwrap();

        eventually({
            let registry = h.registry.clone();
            move || registry.find("a_1").unwrap().containers[0].state == ContainerState::Stopped
        })
        .await;
        assert_eq!(h.index.status("a_1_web").await, ContainerState::Stopped);
    }

    #[tokio::test]
    async fn error_and_unknown_messages_keep_session_alive() {
        let h = harness().await;
        let mut stream = register(&h, "a_1").await;

        let err = Message::error("a_1", COORDINATOR_ID, "start failed");
        write_message(&mut stream, &err).await.unwrap();

        // Unknown tag record.
        let mut raw = Message::ack("a_1", COORDINATOR_ID, "x").encode();
        raw[..4].copy_from_slice(&99u32.to_ne_bytes());
        tokio::io::AsyncWriteExt::write_all(&mut stream, &raw)
            .await
            .unwrap();

        // Session still answers a REGISTER on the same connection.
        let msg = Message::register("a_1", COORDINATOR_ID, "host", "10.0.0.1", 0);
        write_message(&mut stream, &msg).await.unwrap();
        let reply = read_message(&mut stream).await.unwrap();
        assert_eq!(reply.kind, MessageKind::Ack);
    }

    #[tokio::test]
    async fn reregistration_after_reconnect_is_single_record() {
        let h = harness().await;
        let stream = register(&h, "a_1").await;
        drop(stream);

        let registry = h.registry.clone();
        eventually(move || {
            registry.find("a_1").unwrap().state == boxgrid_core::WorkerState::Disconnected
        })
        .await;

        let _stream = register(&h, "a_1").await;
        let snapshot = h.registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, boxgrid_core::WorkerState::Connected);
        assert!(snapshot[0].connection.is_some());
    }
}
