//! LVM Volume Group Manager daemon
//!
//! Tracks the host's LVM volume groups, publishes them and their logical
//! volumes through the object registry, and serves liveness and metrics
//! endpoints.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lvm_vg_manager::{
    Context, DirectoryConfig, Error, HelperConfig, HelperInventorySource, JobTable, LvmNames,
    Manager, ManagerConfig, ManagerMetrics, ObjectRegistry, ProcessJobLauncher, Result,
    SysfsBlockDirectory,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// LVM Volume Group Manager - reconciles LVM state into published objects
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Inventory helper executable
    #[arg(long, env = "LVM_HELPER", default_value = "udisks-lvm-helper")]
    helper: PathBuf,

    /// Object path root for groups and volumes
    #[arg(long, env = "OBJECT_ROOT", default_value = lvm_vg_manager::publish::DEFAULT_OBJECT_ROOT)]
    object_root: String,

    /// Refresh interval for each volume group in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "5000")]
    poll_interval_ms: u64,

    /// Volume group rescan interval in seconds, 0 to disable
    #[arg(long, env = "RESCAN_INTERVAL", default_value = "60")]
    rescan_interval_secs: u64,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "127.0.0.1:9130")]
    metrics_addr: String,

    /// Sysfs mount point
    #[arg(long, env = "SYSFS_PATH", default_value = "/sys")]
    sysfs_path: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting LVM Volume Group Manager");
    info!("  Version: {}", lvm_vg_manager::VERSION);
    info!("  Helper: {}", args.helper.display());
    info!("  Object root: {}", args.object_root);
    info!("  Poll interval: {}ms", args.poll_interval_ms);

    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    // Block devices
    let blocks = Arc::new(SysfsBlockDirectory::new(DirectoryConfig {
        sysfs_path: args.sysfs_path.clone(),
        ..Default::default()
    }));
    let found = blocks.rescan()?;
    info!("Block directory initialized with {} devices", found);

    let registry = ObjectRegistry::new();
    let jobs = JobTable::new();
    let launcher = Arc::new(ProcessJobLauncher::new(jobs.clone()));
    let inventory = Arc::new(HelperInventorySource::new(HelperConfig {
        program: args.helper.clone(),
    }));

    let ctx = Context::new(inventory, launcher, jobs.clone(), registry.clone(), blocks.clone())
        .with_names(Arc::new(LvmNames));
    let metrics = ctx.metrics.clone();

    let rescan_interval = match args.rescan_interval_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let config = ManagerConfig {
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        rescan_interval,
        object_root: args.object_root.clone(),
        ..Default::default()
    };

    let (manager, handle) = Manager::new(config, ctx);
    let manager_task = tokio::spawn(manager.run());

    // Keep the block directory in step with hotplug
    if let Some(interval) = rescan_interval {
        let blocks = blocks.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = blocks.rescan() {
                    warn!("Block device rescan failed: {}", e);
                }
            }
        });
    }

    // Start metrics and health server
    let exporter = Arc::new(MetricsExporter::new(metrics, registry, jobs)?);
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, exporter).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    if let Err(e) = handle.shutdown().await {
        warn!("Manager already stopped: {}", e);
    }
    if let Err(e) = manager_task.await {
        error!("Manager task failed: {}", e);
    }

    info!("Manager shutdown complete");
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

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

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
// Metrics Server
// =============================================================================

/// Mirrors manager, registry and job state into prometheus gauges
struct MetricsExporter {
    registry: prometheus::Registry,
    counters: Vec<prometheus::IntGauge>,
    objects: prometheus::IntGauge,
    job_progress: prometheus::GaugeVec,
    metrics: Arc<ManagerMetrics>,
    published: Arc<ObjectRegistry>,
    jobs: Arc<JobTable>,
}

impl MetricsExporter {
    fn new(
        metrics: Arc<ManagerMetrics>,
        published: Arc<ObjectRegistry>,
        jobs: Arc<JobTable>,
    ) -> Result<Self> {
        let registry = prometheus::Registry::new();
        let register = |name: String, help: String| -> Result<prometheus::IntGauge> {
            let gauge = prometheus::IntGauge::new(name, help)
                .map_err(|e| Error::Internal(format!("Invalid metric: {}", e)))?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(|e| Error::Internal(format!("Failed to register metric: {}", e)))?;
            Ok(gauge)
        };

        let job_progress = prometheus::GaugeVec::new(
            prometheus::Opts::new(
                "lvm_vg_manager_job_progress",
                "Fraction complete of running jobs that report progress",
            ),
            &["job", "operation"],
        )
        .map_err(|e| Error::Internal(format!("Invalid metric: {}", e)))?;
        registry
            .register(Box::new(job_progress.clone()))
            .map_err(|e| Error::Internal(format!("Failed to register metric: {}", e)))?;

        let counters = metrics
            .snapshot()
            .counters()
            .iter()
            .map(|(name, _)| {
                register(
                    format!("lvm_vg_manager_{}", name),
                    format!("Volume group manager counter {}", name),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let objects = register(
            "lvm_vg_manager_published_objects".into(),
            "Number of published groups and volumes".into(),
        )?;

        Ok(Self {
            registry,
            counters,
            objects,
            job_progress,
            metrics,
            published,
            jobs,
        })
    }

    fn render(&self) -> Result<(String, Vec<u8>)> {
        use prometheus::{Encoder, TextEncoder};

        let snapshot = self.metrics.snapshot();
        for (gauge, (_, value)) in self.counters.iter().zip(snapshot.counters()) {
            gauge.set(value as i64);
        }
        self.objects.set(self.published.stats().objects as i64);

        self.job_progress.reset();
        for job in self.jobs.running() {
            let progress = job.progress();
            if progress.valid {
                self.job_progress
                    .with_label_values(&[&job.id.to_string(), job.operation.as_str()])
                    .set(progress.fraction);
            }
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

async fn run_metrics_server(addr: SocketAddr, exporter: Arc<MetricsExporter>) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        response
    }

    let make_svc = make_service_fn(move |_conn| {
        let exporter = exporter.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let exporter = exporter.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
                        "/metrics" => match exporter.render() {
                            Ok((content_type, buffer)) => {
                                let mut response = respond(StatusCode::OK, buffer);
                                if let Ok(value) = content_type.parse() {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
