//! The coordinator's interactive command shell.
//!
//! Line-oriented commands against the registry and the index. Placement
//! happens here on deploy: snapshot the registry, pick a worker, hand the
//! intent to the index. Logical failures print and change nothing; there
//! are no retries.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use boxgrid_cluster::{ContainerIndex, WorkerRegistry};
use boxgrid_core::parse_container_spec;

const BANNER: &str = "\
=== boxgrid coordinator ===
Commands:
  deploy <file>         - Deploy container from description file
  start <container_id>  - Start container
  stop <container_id>   - Stop container
  delete <container_id> - Delete container
  list containers       - List all containers
  list nodes            - List all nodes
  quit                  - Exit coordinator
";

/// Serve the prompt until `quit`, end of input, or shutdown.
pub async fn run(
    registry: Arc<WorkerRegistry>,
    index: Arc<ContainerIndex>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    println!("{BANNER}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("coordinator> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.changed() => break,
        };

        let Some(line) = line else {
            break;
        };
        if !dispatch(line.trim(), &registry, &index).await {
            break;
        }
    }

    Ok(())
}

/// Handle one command line. Returns false when the shell should exit.
async fn dispatch(line: &str, registry: &Arc<WorkerRegistry>, index: &Arc<ContainerIndex>) -> bool {
    if line.is_empty() {
        return true;
    }

    if let Some(path) = line.strip_prefix("deploy ") {
        deploy(path.trim(), registry, index).await;
    } else if let Some(id) = line.strip_prefix("start ") {
        if let Err(e) = index.start(registry, id.trim()).await {
            println!("Error: {e}");
        }
    } else if let Some(id) = line.strip_prefix("stop ") {
        if let Err(e) = index.stop(registry, id.trim()).await {
            println!("Error: {e}");
        }
    } else if let Some(id) = line.strip_prefix("delete ") {
        if let Err(e) = index.delete(registry, id.trim()).await {
            println!("Error: {e}");
        }
    } else if line == "list containers" {
        list_containers(index).await;
    } else if line == "list nodes" {
        list_nodes(registry);
    } else if line == "quit" {
        return false;
    } else {
        println!("Unknown command: {line}");
    }
    true
}

async fn deploy(path: &str, registry: &Arc<WorkerRegistry>, index: &Arc<ContainerIndex>) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            println!("Error: cannot read {path}: {e}");
            return;
        }
    };

    let spec = match parse_container_spec(&text) {
        Ok(spec) => spec,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };

    let snapshot = registry.snapshot();
    let candidates = boxgrid_placement::candidates(&snapshot);
    let worker_id = match boxgrid_placement::place(&candidates, Instant::now()) {
        Ok(worker_id) => worker_id,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };

    match index.deploy(registry, &worker_id, spec).await {
        Ok(id) => println!("Container {id} deployed to {worker_id}"),
        Err(e) => println!("Error: {e}"),
    }
}

async fn list_containers(index: &Arc<ContainerIndex>) {
    println!("\n=== Deployed Containers ===");
    println!("{:<20} {:<20} {:<15} {:<10}", "ID", "Name", "Node", "State");
    println!("{}", "-".repeat(60));
    for record in index.list().await {
        println!(
            "{:<20} {:<20} {:<15} {:<10}",
            record.id,
            record.name,
            record.worker_id,
            record.state.label()
        );
    }
}

fn list_nodes(registry: &Arc<WorkerRegistry>) {
    println!("\n=== Connected Nodes ===");
    println!(
        "{:<15} {:<20} {:<15} {:<10} {:<10} {:<10}",
        "ID", "Hostname", "IP", "State", "CPU%", "Mem%"
    );
    println!("{}", "-".repeat(72));
    for record in registry.snapshot() {
        println!(
            "{:<15} {:<20} {:<15} {:<10} {:<10.1} {:<10.1}",
            record.id,
            record.hostname,
            record.address,
            record.state.short_label(),
            record.resources.cpu_pct,
            record.resources.memory_pct
        );
    }
}
