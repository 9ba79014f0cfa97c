//! End-to-end cluster tests: a real coordinator (acceptor + sessions +
//! registry + index) and real worker agents over loopback TCP, with the
//! container runtime replaced by a scripted driver.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use boxgrid_cluster::{
    session, AgentConfig, AgentError, ContainerIndex, WorkerAgent, WorkerRegistry,
};
use boxgrid_core::{ContainerSpec, ContainerState, ResourceSample, WorkerState};
use boxgrid_placement::{candidates, place, PlacementError};
use boxgrid_runtime::{ContainerDriver, DriverError};

// ── Test doubles and scaffolding ────────────────────────────────────

/// Driver that always succeeds and reports a configurable sample.
struct NullDriver {
    sample: StdMutex<ResourceSample>,
}

impl NullDriver {
    fn new(sample: ResourceSample) -> Self {
        Self {
            sample: StdMutex::new(sample),
        }
    }

    fn idle() -> Self {
        Self::new(ResourceSample {
            cpu_pct: 0.0,
            memory_pct: 0.0,
            disk_pct: 0.0,
            container_count: 0,
            max_containers: 50,
        })
    }
}

#[async_trait]
impl ContainerDriver for NullDriver {
    async fn create(&self, _spec: &ContainerSpec) -> Result<(), DriverError> {
        Ok(())
    }
    async fn start(&self, _name: &str) -> Result<(), DriverError> {
        Ok(())
    }
    async fn stop(&self, _name: &str) -> Result<(), DriverError> {
        Ok(())
    }
    async fn destroy(&self, _name: &str) -> Result<(), DriverError> {
        Ok(())
    }
    async fn sample(&self) -> Result<ResourceSample, DriverError> {
        Ok(*self.sample.lock().unwrap())
    }
}

struct Cluster {
    registry: Arc<WorkerRegistry>,
    index: Arc<ContainerIndex>,
    addr: SocketAddr,
}

async fn start_coordinator() -> Cluster {
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
            tokio::spawn(session::run_session(
                stream,
                accept_registry.clone(),
                accept_index.clone(),
            ));
        }
    });

    Cluster {
        registry,
        index,
        addr,
    }
}

struct Worker {
    agent: Arc<WorkerAgent>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), AgentError>>,
}

/// Boot an agent and wait until it is registered and has heartbeated.
async fn start_worker(cluster: &Cluster, node_id: &str, driver: NullDriver) -> Worker {
    let agent = Arc::new(WorkerAgent::new(
        AgentConfig {
            coordinator_addr: cluster.addr.to_string(),
            node_id: node_id.to_string(),
            hostname: "testhost".to_string(),
            advertised_ip: "127.0.0.1".to_string(),
            heartbeat_interval: Duration::from_millis(20),
        },
        Arc::new(driver),
    ));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.clone().run(shutdown_rx));

    let registry = cluster.registry.clone();
    let id = node_id.to_string();
    eventually(move || {
        registry
            .find(&id)
            .is_some_and(|w| w.connection.is_some() && w.resources.max_containers > 0)
    })
    .await;

    Worker {
        agent,
        shutdown,
        handle,
    }
}

/// Poll until `check` passes or a generous deadline expires.
async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

async fn eventually_status(index: &Arc<ContainerIndex>, id: &str, state: ContainerState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if index.status(id).await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "container {id} did not reach {:?} (now {:?})",
        state,
        index.status(id).await
    );
}

fn web_spec() -> ContainerSpec {
    ContainerSpec {
        name: "web".to_string(),
        image: "ubuntu:20.04".to_string(),
        cpu_limit: 2,
        memory_limit: 512,
        privileged: false,
        ..ContainerSpec::default()
    }
}

/// Snapshot → placement → index, the same path the shell takes.
async fn deploy(cluster: &Cluster, spec: ContainerSpec) -> Result<String, String> {
    let snapshot = cluster.registry.snapshot();
    let worker_id =
        place(&candidates(&snapshot), Instant::now()).map_err(|e| e.to_string())?;
    cluster
        .index
        .deploy(&cluster.registry, &worker_id, spec)
        .await
        .map_err(|e| e.to_string())
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn single_worker_happy_path() {
    let cluster = start_coordinator().await;
    let worker = start_worker(&cluster, "a_1", NullDriver::idle()).await;

    // Deploy lands on the only worker and reconciles to Stopped.
    let id = deploy(&cluster, web_spec()).await.unwrap();
    assert_eq!(id, "a_1_web");
    eventually_status(&cluster.index, "a_1_web", ContainerState::Stopped).await;

    // Start: local intent Starting, then the worker reports Running.
    cluster
        .index
        .start(&cluster.registry, "a_1_web")
        .await
        .unwrap();
    eventually_status(&cluster.index, "a_1_web", ContainerState::Running).await;

    // Stop reconciles to Stopped.
    cluster
        .index
        .stop(&cluster.registry, "a_1_web")
        .await
        .unwrap();
    eventually_status(&cluster.index, "a_1_web", ContainerState::Stopped).await;

    // Delete removes the record on both ends.
    cluster
        .index
        .delete(&cluster.registry, "a_1_web")
        .await
        .unwrap();
    assert_eq!(
        cluster.index.status("a_1_web").await,
        ContainerState::Error
    );
    assert!(cluster.index.list().await.is_empty());

    let agent = worker.agent.clone();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if agent.local_containers().await.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "worker kept the container");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    worker.shutdown.send(true).unwrap();
    assert!(worker.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn placement_prefers_worker_with_headroom() {
    let cluster = start_coordinator().await;

    let busy = NullDriver::new(ResourceSample {
        cpu_pct: 80.0,
        memory_pct: 80.0,
        disk_pct: 80.0,
        container_count: 10,
        max_containers: 50,
    });
    let idle = NullDriver::new(ResourceSample {
        cpu_pct: 20.0,
        memory_pct: 20.0,
        disk_pct: 20.0,
        container_count: 10,
        max_containers: 50,
    });

    let _a = start_worker(&cluster, "a_1", busy).await;
    let _b = start_worker(&cluster, "b_1", idle).await;

    let id = deploy(&cluster, web_spec()).await.unwrap();
    assert_eq!(id, "b_1_web");
}

#[tokio::test]
async fn full_worker_is_skipped() {
    let cluster = start_coordinator().await;

    let full = NullDriver::new(ResourceSample {
        cpu_pct: 5.0,
        memory_pct: 5.0,
        disk_pct: 5.0,
        container_count: 50,
        max_containers: 50,
    });
    let nearly_full = NullDriver::new(ResourceSample {
        cpu_pct: 80.0,
        memory_pct: 80.0,
        disk_pct: 80.0,
        container_count: 49,
        max_containers: 50,
    });

    let _a = start_worker(&cluster, "a_1", full).await;
    let _b = start_worker(&cluster, "b_1", nearly_full).await;

    let id = deploy(&cluster, web_spec()).await.unwrap();
    assert_eq!(id, "b_1_web");
}

#[tokio::test]
async fn disconnect_survives_bookkeeping() {
    let cluster = start_coordinator().await;
    let worker = start_worker(&cluster, "a_1", NullDriver::idle()).await;

    deploy(&cluster, web_spec()).await.unwrap();
    eventually_status(&cluster.index, "a_1_web", ContainerState::Stopped).await;

    // Take the worker down.
    worker.shutdown.send(true).unwrap();
    let _ = worker.handle.await;

    let registry = cluster.registry.clone();
    eventually(move || {
        registry
            .find("a_1")
            .is_some_and(|w| w.state == WorkerState::Disconnected)
    })
    .await;

    // The container stays inspectable; the worker record survives.
    let listed = cluster.index.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "a_1_web");
    assert_eq!(
        cluster.registry.find("a_1").unwrap().containers.len(),
        1
    );

    // But nothing else can be placed on it.
    let snapshot = cluster.registry.snapshot();
    let result = place(&candidates(&snapshot), Instant::now());
    assert!(matches!(result, Err(PlacementError::NoCandidate)));
}

#[tokio::test]
async fn reregistration_keeps_one_record_and_prior_containers() {
    let cluster = start_coordinator().await;
    let first = start_worker(&cluster, "a_1", NullDriver::idle()).await;

    deploy(&cluster, web_spec()).await.unwrap();
    eventually_status(&cluster.index, "a_1_web", ContainerState::Stopped).await;

    first.shutdown.send(true).unwrap();
    let _ = first.handle.await;

    let registry = cluster.registry.clone();
    eventually(move || {
        registry
            .find("a_1")
            .is_some_and(|w| w.state == WorkerState::Disconnected)
    })
    .await;

    // Same id reconnects.
    let _second = start_worker(&cluster, "a_1", NullDriver::idle()).await;

    let snapshot = cluster.registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].state, WorkerState::Connected);
    // Prior containers remain associated with the record.
    assert_eq!(snapshot[0].containers.len(), 1);
    assert_eq!(cluster.index.list().await.len(), 1);
}

#[tokio::test]
async fn duplicate_deploy_is_rejected_end_to_end() {
    let cluster = start_coordinator().await;
    let _worker = start_worker(&cluster, "a_1", NullDriver::idle()).await;

    deploy(&cluster, web_spec()).await.unwrap();
    let err = deploy(&cluster, web_spec()).await.unwrap_err();
    assert!(err.contains("already deployed"), "unexpected error: {err}");
}
