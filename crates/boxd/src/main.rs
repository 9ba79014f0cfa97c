//! boxd — the boxgrid daemon.
//!
//! Single binary with two modes:
//!
//! - **coordinator** — accepts worker connections, schedules containers,
//!   serves the interactive shell
//! - **worker** — joins a coordinator and drives the local container
//!   runtime
//!
//! # Usage
//!
//! ```text
//! boxd coordinator 8888
//! boxd worker 10.0.0.1 8888 --max-containers 50
//! ```

mod coordinator_mode;
mod shell;
mod worker_mode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "boxd", about = "boxgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator.
    Coordinator {
        /// Port to listen on for worker connections.
        #[arg(default_value_t = 8888)]
        port: u16,
    },

    /// Run a worker that joins a coordinator.
    Worker {
        /// Coordinator address.
        coordinator_ip: String,

        /// Coordinator port.
        coordinator_port: u16,

        /// Container capacity advertised in heartbeats.
        #[arg(long, default_value_t = 50)]
        max_containers: u32,

        /// Seconds between heartbeats.
        #[arg(long, default_value_t = 10)]
        heartbeat_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,boxd=debug,boxgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Coordinator { port } => coordinator_mode::run(port).await,
        Command::Worker {
            coordinator_ip,
            coordinator_port,
            max_containers,
            heartbeat_interval,
        } => {
            worker_mode::run(
                coordinator_ip,
                coordinator_port,
                max_containers,
                heartbeat_interval,
            )
            .await
        }
    }
}
