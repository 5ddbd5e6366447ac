//! Coordinator service entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use coordinator::{api::HttpApi, Config, Coordinator};

/// Coordinator - table distribution control plane
#[derive(Parser, Debug)]
#[command(name = "coordinator")]
#[command(about = "Control plane that distributes tables across worker nodes")]
struct Args {
    /// YAML configuration file
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Cluster name
    #[arg(short, long)]
    cluster: Option<String>,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// HTTP API listen address
    #[arg(long)]
    http_addr: Option<String>,

    /// Catalog save interval (seconds)
    #[arg(long)]
    save_interval: Option<u64>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(cluster) = self.cluster {
            config.engine.cluster_name = cluster;
        }
        if let Some(data_dir) = self.data_dir {
            config.storage.data_dir = data_dir;
        }
        if let Some(http_addr) = self.http_addr {
            config.server.http_addr = http_addr;
        }
        if let Some(secs) = self.save_interval.filter(|s| *s > 0) {
            config.storage.save_interval_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    args.apply(&mut config);

    // Initialize logging
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting coordinator...");
    info!("  Cluster: {}", config.engine.cluster_name);
    info!("  Data dir: {:?}", config.storage.data_dir);
    info!("  HTTP API: {}", config.server.http_addr);

    let http_addr = config.server.http_addr.clone();
    let coordinator = Arc::new(Coordinator::new(config).await?);

    let _save_handle = coordinator.clone().start_periodic_save();

    let stats = coordinator.catalog().stats();
    info!(
        "Cluster ready: {} nodes, {} distributed tables, {} shards",
        stats.total_nodes, stats.distributed_tables, stats.total_shards
    );

    let app = HttpApi::new(coordinator.clone()).router();

    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    info!("HTTP API listening on {}", http_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
