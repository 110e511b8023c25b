//! dbop Daemon - Cluster-member lifecycle controller
//!
//! Keeps every deployment listed in the manifest converging towards its spec:
//! members are created, rotated on configuration drift, upgraded and scaled
//! one plan step at a time.

use clap::Parser;
use dbop_daemon::{logging, shutdown_signal, Daemon, DaemonConfig, DaemonResult};
use std::path::PathBuf;
use tracing::info;

/// dbop Daemon CLI
#[derive(Parser)]
#[command(name = "dbopd")]
#[command(about = "dbop Daemon - Cluster-member lifecycle controller", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DBOP_CONFIG")]
    config: Option<String>,

    /// Deployment manifest path
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Seconds between reconciliation passes
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Maximum deployments reconciled at the same time
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(manifest) = self.manifest {
            config.manifest = Some(manifest);
        }
        if let Some(secs) = self.interval_secs {
            config.reconcile.interval_secs = secs;
        }
        if let Some(max) = self.max_concurrent {
            config.reconcile.max_concurrent_deployments = max;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.json {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    logging::init(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        manifest = ?config.manifest,
        interval_secs = config.reconcile.interval_secs,
        "Starting dbop daemon"
    );

    let daemon = Daemon::new(config).await?;
    daemon.run(shutdown_signal()).await
}
