//! Controller turning annotated cluster workloads into synthetic-monitoring
//! checks.
//!
//! Watches Services and Ingresses carrying the `synthetics.grafana.com/`
//! annotations, debounces the event stream into snapshots and reconciles the
//! remote check set against them.

mod informer;
mod ops;

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use synthmon_core::builder::ENABLED_ANNOTATION;
use synthmon_core::consolidator::Consolidator;
use synthmon_core::error::CoreError;
use synthmon_core::schema::{Object, ObjectKind, Resource};
use synthmon_core::state::State;
use synthmon_core::watchers::{
    Chain, ErrorHandler, Filter, Logger, PipelineError, Publisher, ResourceMetaSetter, TypeAssert,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Timeout applied to each individual remote API request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "synthmon-operator", version, about)]
struct Args {
    /// Listen address for the ops HTTP server (metrics, readiness)
    #[arg(long, default_value = "0.0.0.0:4054")]
    listen_address: SocketAddr,

    /// Path to a kubeconfig file; falls back to in-cluster discovery
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Synthetic-monitoring API server URL
    #[arg(long, required = true)]
    server: String,

    /// Synthetic-monitoring API token
    #[arg(long, required = true)]
    token: String,

    /// Debug output (enables verbose)
    #[arg(long)]
    debug: bool,

    /// Verbose logging
    #[arg(long)]
    verbose: bool,

    /// Informer resync period in seconds
    #[arg(long, default_value_t = 60)]
    resync_period: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args);

    match run(args).await {
        Ok(()) => info!("terminating"),
        Err(err) => {
            error!("terminating: {err:#}");
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(args: &Args) {
    let default_directive = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "error"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if args.debug {
        builder.with_file(true).with_line_number(true).init();
    } else {
        builder.init();
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("starting...");

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<()> = JoinSet::new();

    tasks.spawn(signal_handler(cancel.clone()));

    // Ops HTTP surface.
    let metrics = Arc::new(ops::OpsMetrics::new().context("setting up metrics registry")?);
    let readiness = ops::Readiness::new();
    let ops_server = ops::OpsServer::new(args.listen_address, readiness.clone(), metrics);
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(err) = ops_server.run(cancel.clone()).await {
                error!(error = %err, "ops server failed");
                cancel.cancel();
            }
        });
    }

    // Platform client and informers.
    let kube_client = build_kube_client(args.kubeconfig.as_deref())
        .await
        .context("building platform client")?;

    let (events_tx, events_rx) = mpsc::channel(1);

    let error_handler: ErrorHandler = Arc::new(|err: &PipelineError| {
        if !err.is_skip() {
            error!(watcher = %err.watcher, "error in pipeline: {}", err);
        }
    });

    let factory = informer::Factory::new(kube_client)
        .with_resync_period(Duration::from_secs(args.resync_period))
        .with_error_handler(error_handler);

    let ingress_resource = Resource::ingresses();
    let ingress_chain = Chain::new(vec![
        Box::new(TypeAssert::new(ObjectKind::Ingress)),
        Box::new(ResourceMetaSetter(ingress_resource.clone())),
        Box::new(Logger::new(Level::DEBUG)),
        Box::new(Publisher::new(events_tx.clone(), cancel.clone())),
    ]);
    tasks.spawn(
        factory
            .informer(ingress_resource, ingress_chain)
            .run(cancel.clone()),
    );

    let service_resource = Resource::services();
    let service_chain = Chain::new(vec![
        Box::new(TypeAssert::new(ObjectKind::Service)),
        Box::new(ResourceMetaSetter(service_resource.clone())),
        Box::new(Filter::new(|obj: &Object| {
            obj.annotation(ENABLED_ANNOTATION).is_some()
        })),
        Box::new(Logger::new(Level::DEBUG)),
        Box::new(Publisher::new(events_tx, cancel.clone())),
    ]);
    tasks.spawn(
        factory
            .informer(service_resource, service_chain)
            .run(cancel.clone()),
    );

    // Aggregation and reconciliation.
    let api_client = synthmon_client::Client::new(&args.server, &args.token)
        .context("building synthetic-monitoring API client")?;
    let consolidator = Consolidator::new(api_client, REQUEST_TIMEOUT);
    let state = State::new(events_rx, consolidator);

    readiness.set_ready();

    let result = state.run(cancel.clone()).await;

    info!("shutting down...");
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    match result {
        // Shutdown via signal is a clean exit.
        Err(CoreError::Canceled) | Ok(()) => Ok(()),
        Err(err) => Err(err).context("cluster state aggregation failed"),
    }
}

async fn build_kube_client(kubeconfig: Option<&Path>) -> anyhow::Result<kube::Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .with_context(|| format!("reading kubeconfig at {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await
            .context("loading kubeconfig")?
        }
        None => kube::Config::infer()
            .await
            .context("inferring platform configuration")?,
    };
    kube::Client::try_from(config).context("creating platform client")
}

/// Resolve the root cancellation token on SIGINT or SIGTERM.
async fn signal_handler(cancel: CancellationToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            error!(error = %err, "installing signal handler failed");
            cancel.cancel();
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!(signal = "interrupt", "returning on signal"),
        _ = terminate.recv() => info!(signal = "terminate", "returning on signal"),
        _ = cancel.cancelled() => return,
    }

    cancel.cancel();
}
