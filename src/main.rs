//! PG Volume Operator
//!
//! Watches `PostgresCluster` resources and keeps each instance's data,
//! WAL and tablespace volumes in line with the cluster spec.

use anyhow::Context as _;
use clap::Parser;
use kube::{Client, CustomResourceExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pg_volume_operator::controller::{self, CONTROLLER_NAME};
use pg_volume_operator::{
    Context, Error, KubeObjects, Metrics, OperatorConfig, PostgresCluster, Result,
    RetentionPolicy,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// PG Volume Operator - storage volumes for replicated PostgreSQL clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace to watch (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Retention for volumes of removed instances when a cluster sets none (keep, delete)
    #[arg(long, env = "VOLUME_RETENTION", default_value = "keep")]
    volume_retention: RetentionPolicy,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Requeue interval after a successful pass, in seconds
    #[arg(long, env = "REQUEUE_SECS", default_value = "300")]
    requeue_secs: u64,

    /// First retry delay after a failed pass, in seconds
    #[arg(long, env = "BACKOFF_INITIAL_SECS", default_value = "5")]
    backoff_initial_secs: u64,

    /// Maximum retry delay, in seconds
    #[arg(long, env = "BACKOFF_MAX_SECS", default_value = "300")]
    backoff_max_secs: u64,

    /// Plan and log actions without changing any volume
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Do not publish Kubernetes events
    #[arg(long, env = "DISABLE_EVENTS")]
    disable_events: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the PostgresCluster CRD as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            namespace: self.namespace.clone(),
            default_retention: self.volume_retention,
            dry_run: self.dry_run,
            requeue_interval: Duration::from_secs(self.requeue_secs),
            backoff_initial: Duration::from_secs(self.backoff_initial_secs),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
            publish_events: !self.disable_events,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print!("{}", serde_yaml::to_string(&PostgresCluster::crd())?);
        return Ok(());
    }

    init_logging(&args)?;

    let config = args.operator_config();
    info!("Starting PG Volume Operator");
    info!("  Version: {}", pg_volume_operator::VERSION);
    info!(
        "  Namespace: {}",
        config.namespace.as_deref().unwrap_or("(all)")
    );
    info!("  Default retention: {}", config.default_retention);
    info!("  Dry run: {}", config.dry_run);

    let metrics = Arc::new(Metrics::new()?);
    let ready = Arc::new(AtomicBool::new(false));
    let shutdown = CancellationToken::new();

    let health_addr = parse_addr(&args.health_addr, "health")?;
    let health = tokio::spawn(run_health_server(
        health_addr,
        ready.clone(),
        shutdown.clone(),
    ));

    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    let metrics_server = tokio::spawn(run_metrics_server(
        metrics_addr,
        metrics.clone(),
        shutdown.clone(),
    ));

    let client = Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let objects = Arc::new(KubeObjects::new(client.clone(), CONTROLLER_NAME));
    let ctx = Arc::new(Context::new(
        client,
        objects.clone(),
        objects,
        config,
        metrics,
    ));

    ready.store(true, Ordering::SeqCst);
    controller::run(ctx).await;

    ready.store(false, Ordering::SeqCst);
    shutdown.cancel();
    for (name, server) in [("health", health), ("metrics", metrics_server)] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{} server error: {}", name, e),
            Err(e) => error!("{} server task failed: {}", name, e),
        }
    }

    info!("Operator shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address {}: {}", server, addr, e)))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
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
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?);

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
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(
    addr: SocketAddr,
    ready: Arc<AtomicBool>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let (status, body) = match req.uri().path() {
                        "/healthz" | "/livez" => (StatusCode::OK, "ok"),
                        "/readyz" if ready => (StatusCode::OK, "ok"),
                        "/readyz" => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => (StatusCode::NOT_FOUND, "not found"),
                    };
                    let mut response = Response::new(Body::from(body));
                    *response.status_mut() = status;
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Health server bind error: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.render() {
                            Ok((content_type, buffer)) => {
                                let mut response = Response::new(Body::from(buffer));
                                if let Ok(value) = content_type.parse() {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                let mut response = Response::new(Body::from(e.to_string()));
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                response
                            }
                        },
                        _ => {
                            let mut response = Response::new(Body::from("not found"));
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            response
                        }
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Metrics server bind error: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
