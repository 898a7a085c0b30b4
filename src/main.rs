// quilt-oci-sync: keep local directories in sync with OCI artifacts

use clap::Parser;
use quilt_oci_sync::{Artifact, Puller, SyncConfig, SyncController};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Pull OCI artifacts into local directories and keep them up to date
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Path to the sync configuration file
    #[clap(long, short, default_value = "quilt-oci-sync.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[clap(long, short)]
    verbose: bool,

    /// Pull every artifact once and exit
    #[clap(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Loading configuration from {}", cli.config.display());
    let config = SyncConfig::load(&cli.config)?;
    let tunables = config.tunables()?;

    // A bad artifact is skipped; the rest still start
    let mut artifacts = Vec::new();
    for descriptor in config.descriptors(&tunables) {
        match descriptor.and_then(Artifact::prepare) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => tracing::warn!("Skipping artifact: {}", e),
        }
    }

    if artifacts.is_empty() {
        return Err("no usable artifacts configured".into());
    }

    let puller = Puller::new(tunables);
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt, shutting down");
        }
        interrupt.cancel();
    });

    if cli.once {
        let mut failed = 0;
        for artifact in artifacts.iter_mut() {
            if let Err(e) = puller.pull_with_retry(&cancel, artifact).await {
                tracing::error!("Failed to sync {}: {}", artifact.display_name(), e);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(format!("{} artifact(s) failed to sync", failed).into());
        }
        return Ok(());
    }

    let mut controller = SyncController::new(puller, cancel.clone());
    for artifact in artifacts {
        controller.start(artifact);
    }
    tracing::info!("Started {} sync task(s)", controller.len());

    cancel.cancelled().await;
    controller.shutdown().await;

    Ok(())
}
