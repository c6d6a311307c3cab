//! cStor SPC Operator
//!
//! Watches StoragePoolClaim objects and drives the cluster toward the pool
//! layout each claim declares.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       cStor SPC Operator                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Informer   │───▶│  Work Queue  │───▶│    Workers   │       │
//! │  │   (intake)   │    │              │    │    (sync)    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::api::Api;
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spc_operator::adapters::{
    KubeCspStore, KubeDiskInventory, KubeEventRecorder, KubePodReader, KubeSpcStore,
    LoggingCasPoolSink,
};
use spc_operator::controller::{resync_loop, spawn_workers, watch_claims, Intake, Metrics, SyncContext, WorkQueue};
use spc_operator::crd::{CStorPool, Disk, StoragePoolClaim};
use spc_operator::domain::ports::SpcStore;
use spc_operator::error::{Error, Result};
use spc_operator::lease::Identity;
use spc_operator::pool::EmitterConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// cStor SPC Operator - pool provisioning for StoragePoolClaims
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of concurrent sync workers
    #[arg(long, env = "WORKERS", default_value = "2")]
    workers: usize,

    /// Full-cache resync interval in seconds
    #[arg(long, env = "RESYNC_INTERVAL_SECONDS", default_value = "30")]
    resync_interval_seconds: u64,

    /// Namespace pool deployments are created in
    #[arg(long, env = "OPENEBS_NAMESPACE", default_value = "openebs")]
    openebs_namespace: String,

    /// Service account pool deployments run under
    #[arg(
        long,
        env = "OPENEBS_SERVICE_ACCOUNT",
        default_value = "openebs-maya-operator"
    )]
    service_account: String,

    /// Install the default sparse-pool claim at startup
    #[arg(long, env = "OPENEBS_IO_INSTALL_DEFAULT_CSTOR_SPARSE_POOL")]
    install_default_sparse_pool: bool,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the CRD manifests as YAML and exit
    #[arg(long)]
    dump_crds: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.dump_crds {
        return dump_crds();
    }

    init_logging(&args);

    info!("Starting cStor SPC Operator");
    info!("  Workers: {}", args.workers);
    info!("  Resync interval: {}s", args.resync_interval_seconds);
    info!("  OpenEBS namespace: {}", args.openebs_namespace);
    info!(
        "  Sparse-pool preset: {}",
        args.install_default_sparse_pool
    );

    let identity = Identity::from_env()?;
    info!("  Identity: {}", identity.qualified());

    let client = Client::try_default().await.map_err(|e| {
        error!("Failed to create Kubernetes client: {}", e);
        Error::Internal(format!("Kubernetes client creation failed: {}", e))
    })?;
    info!("Connected to Kubernetes cluster");

    let spc_store = Arc::new(KubeSpcStore::new(client.clone()));

    if args.install_default_sparse_pool {
        ensure_sparse_pool_claim(&*spc_store).await?;
    }

    let metrics = Metrics::register()
        .map_err(|e| Error::Internal(format!("metrics registration failed: {}", e)))?;

    let recorder: Arc<KubeEventRecorder> = Arc::new(KubeEventRecorder::new(
        client.clone(),
        "cstor-spc-operator",
        Some(identity.pod_name.clone()),
    ));

    let ctx = Arc::new(SyncContext {
        spc_store: spc_store.clone(),
        csp_store: Arc::new(KubeCspStore::new(client.clone())),
        disks: Arc::new(KubeDiskInventory::new(client.clone())),
        pods: Arc::new(KubePodReader::new(client.clone())),
        sink: Arc::new(LoggingCasPoolSink::new()),
        recorder: recorder.clone(),
        identity,
        emitter: EmitterConfig {
            namespace: args.openebs_namespace.clone(),
            service_account: args.service_account.clone(),
        },
        metrics: Some(Arc::new(metrics)),
    });

    let cancel = CancellationToken::new();
    let queue = WorkQueue::new();
    let intake = Intake::with_recorder(Arc::clone(&queue), recorder);

    // Shut the queue on ctrl-c so workers drain and exit.
    {
        let cancel = cancel.clone();
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                cancel.cancel();
                queue.shut_down();
            }
        });
    }

    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api: Api<StoragePoolClaim> = Api::all(client.clone());
    let watch_handle = tokio::spawn(watch_claims(api, Arc::clone(&intake), cancel.clone()));
    let resync_handle = tokio::spawn(resync_loop(
        Arc::clone(&intake),
        Duration::from_secs(args.resync_interval_seconds),
        cancel.clone(),
    ));

    info!("Starting StoragePoolClaim controller");
    let workers = spawn_workers(args.workers, Arc::clone(&queue), ctx, cancel.clone());

    for handle in workers {
        let _ = handle.await;
    }
    let _ = resync_handle.await;
    if let Ok(Err(e)) = watch_handle.await {
        error!("Claim watch terminated with error: {}", e);
    }

    info!("Operator shutdown complete");
    Ok(())
}

/// Create the `cstor-sparse-pool` claim if it does not exist yet. Existing
/// claims are left alone so user edits survive restarts.
async fn ensure_sparse_pool_claim<S: SpcStore + ?Sized>(spc_store: &S) -> Result<()> {
    let preset = StoragePoolClaim::default_sparse_claim();
    let name = preset.metadata.name.as_deref().unwrap_or_default();
    if spc_store.get(name).await?.is_some() {
        info!(claim = %name, "sparse-pool claim already present");
        return Ok(());
    }
    spc_store.create(&preset).await?;
    info!(claim = %name, "installed default sparse-pool claim");
    Ok(())
}

/// Print the CRD manifests the operator expects, as a multi-document YAML
/// stream suitable for `kubectl apply -f -`.
fn dump_crds() -> Result<()> {
    for crd in [StoragePoolClaim::crd(), CStorPool::crd(), Disk::crd()] {
        let doc = serde_yaml::to_string(&crd)
            .map_err(|e| Error::Internal(format!("CRD serialization failed: {}", e)))?;
        println!("---\n{}", doc);
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("ok")))
                .unwrap(),
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                    tracing::error!("Metrics encoding error: {}", e);
                }

                Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", encoder.format_type())
                    .body(Full::new(Bytes::from(buffer)))
                    .unwrap()
            }
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
