//! shepherd-dns binary entry point.

use clap::Parser;
use shepherd_dns::{
    telemetry, Cluster, Config, FileConfigProvider, LogResourceListener, SynchronizerRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Application-level cluster coordinator driven by multi-nameserver DNS
/// observation.
#[derive(Parser, Debug)]
#[command(name = "shepherd-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "shepherd-dns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration once up front for telemetry; the provider reloads
    // the cluster section on changes.
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("SHEPHERD_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        display = %config.cluster.display,
        nodes = config.cluster.nodes.len(),
        resources = config.cluster.resources.len(),
        "Starting shepherd-dns"
    );

    let provider = FileConfigProvider::new(args.config.clone());
    // No synchronizer factories are built in: without plugins the
    // coordinator observes DNS and reports status only.
    let cluster = Cluster::new(provider, SynchronizerRegistry::new());
    cluster.add_resource_listener(Arc::new(LogResourceListener));

    if let Err(e) = cluster.start() {
        error!("Failed to start cluster: {e}");
        return Err(e.into());
    }

    shutdown_signal().await;
    info!("Shutdown signal received, stopping cluster");
    cluster.stop();

    info!("shepherd-dns shutdown complete");
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
