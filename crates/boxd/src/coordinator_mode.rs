//! Coordinator mode — the control plane process.
//!
//! Runs one acceptor task on the listening socket, one session task per
//! connected worker, and the interactive shell in the foreground. The
//! registry and the container index are owned here and passed by handle
//! into the sessions and the shell. SIGINT/SIGTERM (or `quit` in the
//! shell) flip the shared shutdown flag; the acceptor closes the listener
//! and in-flight sessions end when their peers hang up.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use boxgrid_cluster::{session, ContainerIndex, WorkerRegistry};

use crate::shell;

pub async fn run(port: u16) -> anyhow::Result<()> {
    info!(port, "boxgrid coordinator starting");

    let registry = Arc::new(WorkerRegistry::new());
    let index = Arc::new(ContainerIndex::new());

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to listen on port {port}"))?;
    info!(port, "coordinator listening for workers");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let acceptor = tokio::spawn(accept_loop(
        listener,
        registry.clone(),
        index.clone(),
        shutdown_rx.clone(),
    ));

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = signal_tx.send(true);
    });

    shell::run(registry, index, shutdown_rx).await?;

    let _ = shutdown_tx.send(true);
    let _ = acceptor.await;

    info!("coordinator stopped");
    Ok(())
}

/// Accept worker connections until shutdown; each gets its own session.
async fn accept_loop(
    listener: TcpListener,
    registry: Arc<WorkerRegistry>,
    index: Arc<ContainerIndex>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(session::run_session(
                        stream,
                        registry.clone(),
                        index.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "failed to accept connection"),
            },
            _ = shutdown.changed() => break,
        }
    }
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
