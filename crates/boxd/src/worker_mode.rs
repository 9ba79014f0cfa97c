//! Worker mode — joins a coordinator and serves its commands.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use boxgrid_cluster::{AgentConfig, WorkerAgent};
use boxgrid_runtime::{resources, LxcDriver};

pub async fn run(
    coordinator_ip: String,
    coordinator_port: u16,
    max_containers: u32,
    heartbeat_interval: u64,
) -> anyhow::Result<()> {
    let hostname = resources::hostname();
    let node_id = format!("{hostname}_{}", std::process::id());
    let coordinator_addr = format!("{coordinator_ip}:{coordinator_port}");

    info!(%node_id, %coordinator_addr, "boxgrid worker starting");

    let driver = Arc::new(LxcDriver::new(max_containers));
    let agent = Arc::new(WorkerAgent::new(
        AgentConfig {
            coordinator_addr,
            node_id,
            hostname,
            advertised_ip: local_ip(&coordinator_ip, coordinator_port),
            heartbeat_interval: Duration::from_secs(heartbeat_interval),
        },
        driver,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    agent.run(shutdown_rx).await?;

    info!("worker stopped");
    Ok(())
}

/// Local address the OS would use to reach the coordinator. Advertised in
/// REGISTER for inspection; workers only dial out.
fn local_ip(coordinator_ip: &str, coordinator_port: u16) -> String {
    let probe = || -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((coordinator_ip, coordinator_port))?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
