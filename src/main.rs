use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use shard_drain_k8s::controller::{
    self, ControllerState, DrainMetrics, DrainReconciler, DrainTimeouts, KubeEventRecorder,
    KubePodStore,
};
use shard_drain_k8s::leader::LeaderElector;
use shard_drain_k8s::topo::VtctldClient;
use shard_drain_k8s::Error;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace to watch ReplicatedShards in; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Operator namespace, holds the leader election lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Base URL of the vtctld HTTP API
    #[arg(long, env = "VTCTLD_ADDRESS", default_value = "http://vtctld:15000")]
    vtctld_address: String,

    /// Timeout for a single vtctld request, in seconds
    #[arg(long, env = "VTCTLD_TIMEOUT_SECS", default_value_t = 30)]
    vtctld_timeout_secs: u64,

    /// Address serving /health and /metrics
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: SocketAddr,

    /// Seconds between drain passes of a shard
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 30)]
    resync_interval_secs: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Run in dry-run mode (decide and log without writing or reparenting)
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Shard Drain Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}

#[cfg(feature = "metrics")]
fn drain_metrics() -> Arc<dyn DrainMetrics> {
    Arc::new(controller::metrics::PrometheusMetrics)
}

#[cfg(not(feature = "metrics"))]
fn drain_metrics() -> Arc<dyn DrainMetrics> {
    Arc::new(controller::NoopMetrics)
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!(
        "Starting Shard Drain Operator v{}",
        env!("CARGO_PKG_VERSION")
    );
    if args.dry_run {
        warn!("Dry-run mode: drain markers will not be written and no reparents issued");
    }

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let vtctld = Arc::new(VtctldClient::new(
        args.vtctld_address.clone(),
        Duration::from_secs(args.vtctld_timeout_secs),
    )?);
    info!("Using vtctld at {}", args.vtctld_address);

    // Leader election configuration
    let leader_namespace =
        std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
    let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });

    info!("Leader election using holder ID: {}", holder_identity);

    let is_leader = Arc::new(AtomicBool::new(false));

    {
        let elector = LeaderElector::new(client.clone(), &leader_namespace, &holder_identity);
        tokio::spawn(elector.run(Arc::clone(&is_leader)));
    }

    let drain = DrainReconciler::new(
        Arc::new(KubePodStore::new(client.clone())),
        vtctld.clone(),
        vtctld,
        Arc::new(KubeEventRecorder::new(client.clone(), "shard-drain-operator")),
        drain_metrics(),
    )
    .with_timeouts(DrainTimeouts::default())
    .with_dry_run(args.dry_run);

    // Create shared controller state
    let state = Arc::new(ControllerState {
        client: client.clone(),
        drain,
        is_leader: Arc::clone(&is_leader),
        resync_interval: Duration::from_secs(args.resync_interval_secs),
    });

    // Start the REST API server
    #[cfg(feature = "rest-api")]
    {
        let api_state = Arc::new(shard_drain_k8s::rest_api::ApiState {
            is_leader: Arc::clone(&is_leader),
        });
        let bind_address = args.bind_address;
        tokio::spawn(async move {
            if let Err(e) = shard_drain_k8s::rest_api::run_server(api_state, bind_address).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    // Run the main controller loop
    controller::run_controller(state, args.watch_namespace).await
}
