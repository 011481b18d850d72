//! latticed — the Lattice daemon.
//!
//! Single binary that assembles all Lattice subsystems:
//! - Service registry + dependency graph
//! - Health monitor (per-service probe loops)
//! - Circuit breakers
//! - Communication telemetry
//! - Request dispatcher
//! - REST status API
//!
//! # Usage
//!
//! ```text
//! latticed run --registry services.yaml --listen 0.0.0.0:9100
//! latticed check --registry services.yaml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lattice_registry::RegistrySnapshot;
use lattice_runtime::MeshRuntime;
use tracing::info;

#[derive(Parser)]
#[command(name = "latticed", about = "Lattice mesh daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the mesh: probe loops, circuit breakers, and the status API.
    Run {
        /// Registry file to load (TOML, JSON, or YAML).
        #[arg(long)]
        registry: PathBuf,

        /// Address for the status API to listen on.
        #[arg(long, default_value = "0.0.0.0:9100")]
        listen: SocketAddr,
    },

    /// Validate a registry file and print the resolved start order.
    Check {
        /// Registry file to validate.
        #[arg(long)]
        registry: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,latticed=debug,lattice=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { registry, listen } => run(registry, listen).await,
        Command::Check { registry } => check(registry),
    }
}

async fn run(registry: PathBuf, listen: SocketAddr) -> anyhow::Result<()> {
    info!("Lattice daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let snapshot = RegistrySnapshot::load(&registry)?;
    info!(path = ?registry, services = snapshot.len(), "registry loaded");

    let runtime = Arc::new(MeshRuntime::new(snapshot));
    runtime.start().await;
    info!("probe loops started");

    // ── Start API server ───────────────────────────────────────

    let router = lattice_api::build_router(Arc::clone(&runtime));

    info!(%listen, "status API starting");

    let listener = tokio::net::TcpListener::bind(listen).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
    });

    server.await?;

    // Stop probe loops before exiting.
    runtime.shutdown().await;

    info!("Lattice daemon stopped");
    Ok(())
}

fn check(registry: PathBuf) -> anyhow::Result<()> {
    let snapshot = RegistrySnapshot::load(&registry)?;

    println!("registry ok: {} services", snapshot.len());
    for (position, name) in snapshot.start_order().iter().enumerate() {
        let deps = snapshot.dependencies_of(name);
        if deps.is_empty() {
            println!("  {}. {name}", position + 1);
        } else {
            println!("  {}. {name} (after {})", position + 1, deps.join(", "));
        }
    }
    Ok(())
}
