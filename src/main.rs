mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rtlogs_collector::{Collector, StopReason, WriterSink};
use rtlogs_k8s::{HelmDriver, KubeClient, ReleaseLocator, ReleaseLookup};

use config::{FileConfig, ReadinessMode, Settings};

/// helm-rtlogs - Tail the logs of every pod in a Helm release in real time
#[derive(Parser, Debug)]
#[command(name = "helm-rtlogs")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Release name
    #[arg(value_name = "RELEASE")]
    release: String,

    /// Stop tailing after this many seconds (0 = never)
    #[arg(long, value_name = "SECS")]
    stop_timeout: Option<u64>,

    /// Stop tailing once any pod logs this text
    #[arg(long, value_name = "TEXT")]
    stop_string: Option<String>,

    /// Only show logs from the last SECS seconds (0 = whole log)
    #[arg(short = 's', long, value_name = "SECS")]
    time_since: Option<u64>,

    /// How long a pod may take to reach Running with --readiness running
    #[arg(short = 't', long, value_name = "SECS")]
    wait_fail_pods_timeout: Option<u64>,

    /// When a pod is ready to be tailed
    #[arg(long, value_enum)]
    readiness: Option<ReadinessMode>,

    /// Seconds between readiness checks
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Only tail pods that are not Running
    #[arg(short = 'o', long)]
    only_failed: bool,

    /// Container to tail in multi-container pods
    #[arg(short = 'c', long)]
    container: Option<String>,

    /// Namespace to look the release up in (default: the context's)
    #[arg(short = 'n', long)]
    namespace: Option<String>,

    /// Kubeconfig context
    #[arg(long, env = "HELM_KUBECONTEXT")]
    kube_context: Option<String>,

    /// Kubeconfig file
    #[arg(long, value_name = "PATH")]
    kubeconfig: Option<PathBuf>,

    /// Helm storage driver
    #[arg(long, env = "HELM_DRIVER")]
    helm_driver: Option<HelmDriver>,

    /// Config file (default: <config dir>/helm-rtlogs/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let file = FileConfig::load(args.config.as_deref())?;
    let settings = Settings::resolve(args, file)?;

    // Diagnostics go to stderr so stdout only carries pod logs
    let level = if settings.options.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(settings).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(settings: Settings) -> Result<()> {
    let client = KubeClient::connect(
        settings.kube_context.as_deref(),
        settings.kubeconfig.as_deref(),
    )
    .await?;

    let locator = ReleaseLocator::new(
        client.client().clone(),
        settings.helm_driver,
        settings.namespace.clone(),
    );
    let release = locator
        .resolve_release(&settings.release)
        .await
        .context(format!("Failed to find release '{}'", settings.release))?;
    info!(release = %release.name, namespace = %release.namespace, "Tailing release");

    let collector = Collector::new(
        Arc::new(client),
        release,
        settings.options,
        Arc::new(WriterSink::stdout()),
    );

    let state = collector.state();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            state.trigger(StopReason::Interrupted);
        }
    });

    let summary = collector.collect().await?;
    debug!(?summary, "Done");

    Ok(())
}
