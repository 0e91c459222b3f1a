//! convoyd — the Convoy daemon.
//!
//! Single binary that assembles the deployment group coordinator:
//! - State store (redb)
//! - Rolling update coordinator with the HTTP agent deployer
//! - REST API
//!
//! # Usage
//!
//! ```text
//! convoyd serve --port 8443 --data-dir /var/lib/convoy
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use config::{CliOverrides, DaemonConfig, FileConfig};

#[derive(Parser)]
#[command(name = "convoyd", about = "Convoy deployment group daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API and run rolling updates.
    Serve {
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Path to a convoyd.toml file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Agent port for hosts registered without one.
        #[arg(long)]
        agent_port: Option<u16>,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,convoyd=debug,convoy=debug"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
            agent_port,
        } => {
            let file = match config {
                Some(path) => {
                    info!(path = ?path, "loading config file");
                    FileConfig::from_file(&path)?
                }
                None => FileConfig::default(),
            };
            let config = DaemonConfig::resolve(
                file,
                CliOverrides {
                    port,
                    data_dir,
                    agent_port,
                },
            );
            run_serve(config).await
        }
    }
}

async fn run_serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("convoy daemon starting");

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    let store = convoy_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let deployer = convoy_rollout::HttpAgentDeployer::new(store.clone())
        .with_default_port(config.agent_port)
        .with_request_timeout(config.agent_request_timeout);
    let coordinator = convoy_rollout::Coordinator::new(store, Arc::new(deployer));
    info!(
        agent_port = config.agent_port,
        request_timeout_ms = config.agent_request_timeout.as_millis() as u64,
        "coordinator initialized"
    );

    coordinator.resume_in_flight().await?;

    // ── Start API server ───────────────────────────────────────

    let router = convoy_api::build_router(coordinator.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    // Runners stop where they are; progress persisted so far is resumed
    // on the next start.
    coordinator.shutdown().await;

    info!("convoy daemon stopped");
    Ok(())
}
