use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use file_processor::api::{self, ApiState};
use file_processor::config::{RetentionConfig, SandboxConfig, ServiceConfig, StorageConfig};
use file_processor::coordinator::JobCoordinator;
use file_processor::sandbox::host_launcher;
use file_processor::shutdown::install_shutdown_handler;
use file_processor::sweeper::RetentionSweeper;
use file_processor::template::PROCESSING_TEMPLATE;

#[derive(Parser, Debug)]
#[command(name = "file-processor")]
#[command(version)]
#[command(about = "Run user code against uploaded CSV/Excel files in sandboxed containers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API and the retention sweeper
    Server(ServerArgs),

    /// Print the example processing script
    Template,
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Directory for uploads, code and results (default: <tmp>/file_processor)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Container runtime CLI
    #[arg(long, default_value = "docker")]
    runtime: String,

    /// Image providing Python and the data libraries
    #[arg(long, default_value = "python-sandbox")]
    image: String,

    /// Wall-clock limit per execution, in seconds
    #[arg(long, default_value = "120", value_parser = clap::value_parser!(u64).range(1..))]
    max_execution_secs: u64,

    /// Container memory limit
    #[arg(long, default_value = "512m")]
    memory: String,

    /// Relative CPU weight for each container
    #[arg(long, default_value = "512")]
    cpu_shares: u32,

    /// Give containers network access. NOT recommended.
    #[arg(long)]
    allow_network: bool,

    /// Maximum upload size in MiB
    #[arg(long, default_value = "50")]
    max_upload_mb: usize,

    /// Jobs older than this are purged, in hours
    #[arg(long, default_value = "24")]
    retention_hours: u64,

    /// Time between retention sweeps, in seconds
    #[arg(long, default_value = "3600", value_parser = clap::value_parser!(u64).range(1..))]
    sweep_interval_secs: u64,
}

impl ServerArgs {
    fn into_config(self) -> ServiceConfig {
        let mut config = ServiceConfig {
            listen_addr: SocketAddr::new(self.host, self.port),
            max_execution_time: Duration::from_secs(self.max_execution_secs),
            sandbox: SandboxConfig {
                runtime: self.runtime,
                image: self.image,
                memory_limit: self.memory,
                cpu_shares: self.cpu_shares,
                network_disabled: !self.allow_network,
                ..SandboxConfig::default()
            },
            retention: RetentionConfig {
                max_age: Duration::from_secs(self.retention_hours.saturating_mul(60 * 60)),
                sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            },
            ..ServiceConfig::default()
        };
        if let Some(dir) = self.data_dir {
            config.storage = StorageConfig::new(dir);
        }
        config.limits.max_upload_bytes = self.max_upload_mb.saturating_mul(1024 * 1024);
        config
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = args.into_config();

    if !config.sandbox.network_disabled {
        tracing::warn!("Container network access enabled. Submitted code can reach the network.");
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.storage.root.display(),
        retention = ?config.retention.max_age,
        "Starting file-processor"
    );

    let coordinator = Arc::new(JobCoordinator::open(&config, host_launcher()).await?);
    let shutdown = install_shutdown_handler();

    let sweeper = RetentionSweeper::new(coordinator.registry().clone(), &config.retention);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    let state = ApiState {
        coordinator: coordinator.clone(),
    };
    let served = api::serve(config.listen_addr, state, shutdown.clone()).await;

    // Stop the sweeper even if the server failed on its own.
    shutdown.cancel();
    if let Err(e) = sweeper_handle.await {
        tracing::error!(error = %e, "Retention sweeper task failed");
    }

    let in_flight = coordinator.running_executions();
    if in_flight > 0 {
        tracing::info!(in_flight, "Waiting for running jobs to finish");
    }
    coordinator.wait_for_executions().await;
    tracing::info!("Shutdown complete");

    served?;
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Template => {
            print!("{}", PROCESSING_TEMPLATE);
        }
    }

    Ok(())
}
