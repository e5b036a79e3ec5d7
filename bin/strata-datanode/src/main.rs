//! Strata DataNode - partition request processing daemon
//!
//! Serves the packet protocol for clients, peer replicas and the master,
//! and exposes Prometheus metrics over HTTP.

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strata_client::HttpMasterClient;
use strata_common::DataNodeConfig;
use strata_common::config::DiskConfig;
use strata_datanode::{Compactor, DataNode, serve};
use strata_storage::PartitionSpace;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Grace period for master reports still in flight at shutdown
const REPORT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "strata-datanode")]
#[command(about = "Strata data node")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/strata/datanode.toml")]
    config: PathBuf,

    /// Listen address for the packet protocol
    #[arg(short, long)]
    listen: Option<String>,

    /// Disk paths hosting partitions
    #[arg(long)]
    disks: Vec<PathBuf>,

    /// Master addresses
    #[arg(long = "master", env = "STRATA_MASTER")]
    masters: Vec<String>,

    /// Cluster identifier
    #[arg(long)]
    cluster_id: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Metrics server listen address (Prometheus)
    #[arg(long)]
    metrics_listen: Option<String>,
}

/// Load the config file if present and apply CLI overrides
fn load_config(args: &Args) -> Result<DataNodeConfig> {
    let mut config = if args.config.exists() {
        let text = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config.display()))?;
        DataNodeConfig::from_toml(&text)?
    } else {
        DataNodeConfig::default()
    };

    if let Some(listen) = &args.listen {
        config.node.listen.clone_from(listen);
    }
    if let Some(cluster_id) = &args.cluster_id {
        config.node.cluster_id.clone_from(cluster_id);
    }
    if !args.disks.is_empty() {
        config.storage.disks = args
            .disks
            .iter()
            .map(|path| DiskConfig {
                path: path.clone(),
                ..DiskConfig::default()
            })
            .collect();
    }
    if !args.masters.is_empty() {
        config.master.addrs.clone_from(&args.masters);
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    if args.log_json {
        config.logging.json = true;
    }
    if let Some(listen) = &args.metrics_listen {
        config.metrics.listen.clone_from(listen);
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &DataNodeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config);

    info!("Starting Strata data node");
    info!("Config file: {}", args.config.display());
    info!("Cluster: {}", config.node.cluster_id);
    info!(
        "Block size: {} bytes, {} disks",
        config.storage.block_size,
        config.storage.disks.len()
    );
    if config.storage.disks.is_empty() {
        error!("No disks configured. Use --disks or [[storage.disks]] in the config file");
        std::process::exit(1);
    }
    if config.master.addrs.is_empty() {
        info!("No master configured; admin task reports will fail until a heartbeat registers one");
    }

    let master = Arc::new(HttpMasterClient::new(
        config.master.addrs.clone(),
        Duration::from_millis(config.master.timeout_ms),
    )?);
    let space = Arc::new(PartitionSpace::from_config(&config.storage));
    let node = Arc::new(DataNode::new(&config, Arc::clone(&space), master));

    let metrics_listen = config.metrics.listen.clone();
    let metrics_node = Arc::clone(&node);
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(&metrics_listen, metrics_node).await {
            error!("Metrics server error: {}", e);
        }
    });

    let compactor = Compactor::new(space);
    let compact_interval = Duration::from_secs(config.storage.compact_interval_secs.max(1));
    let compact_handle = tokio::spawn(compactor.run(compact_interval));

    let listener = TcpListener::bind(&config.node.listen)
        .await
        .with_context(|| format!("binding {}", config.node.listen))?;
    serve(Arc::clone(&node), listener, async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    })
    .await;

    compact_handle.abort();
    let aborted = node.drain_reports(REPORT_DRAIN_TIMEOUT).await;
    if aborted > 0 {
        error!("{aborted} master reports lost at shutdown");
    }
    info!("Data node shut down gracefully");
    Ok(())
}

/// Metrics HTTP handler
async fn metrics_handler(State(node): State<Arc<DataNode>>) -> impl IntoResponse {
    let mut output = String::with_capacity(16 * 1024);
    let cluster = node.cluster_id();
    let usage = node.space().usage();

    let _ = writeln!(output, "# HELP strata_datanode_capacity_bytes Total disk capacity");
    let _ = writeln!(output, "# TYPE strata_datanode_capacity_bytes gauge");
    let _ = writeln!(output, "strata_datanode_capacity_bytes{{cluster=\"{cluster}\"}} {}", usage.total);
    let _ = writeln!(output, "# HELP strata_datanode_used_bytes Bytes used by partitions");
    let _ = writeln!(output, "# TYPE strata_datanode_used_bytes gauge");
    let _ = writeln!(output, "strata_datanode_used_bytes{{cluster=\"{cluster}\"}} {}", usage.used);
    let _ = writeln!(output, "# HELP strata_datanode_partitions Partitions hosted");
    let _ = writeln!(output, "# TYPE strata_datanode_partitions gauge");
    let _ = writeln!(
        output,
        "strata_datanode_partitions{{cluster=\"{cluster}\"}} {}",
        usage.partition_count
    );

    let _ = writeln!(output, "# HELP strata_disk_io_errors_total Disk I/O errors by direction");
    let _ = writeln!(output, "# TYPE strata_disk_io_errors_total counter");
    let _ = writeln!(output, "# HELP strata_disk_compact_tasks Admitted compaction tasks");
    let _ = writeln!(output, "# TYPE strata_disk_compact_tasks gauge");
    for disk in node.space().disks() {
        let path = disk.path().display();
        let stats = disk.stats();
        let _ = writeln!(
            output,
            "strata_disk_io_errors_total{{disk=\"{path}\",direction=\"read\"}} {}",
            stats.read_errors
        );
        let _ = writeln!(
            output,
            "strata_disk_io_errors_total{{disk=\"{path}\",direction=\"write\"}} {}",
            stats.write_errors
        );
        let _ = writeln!(
            output,
            "strata_disk_compact_tasks{{disk=\"{path}\"}} {}",
            stats.compact_tasks
        );
    }

    let pool = node.pool();
    let _ = writeln!(output, "# HELP strata_buffer_pool_outstanding Pooled buffers checked out");
    let _ = writeln!(output, "# TYPE strata_buffer_pool_outstanding gauge");
    let _ = writeln!(output, "strata_buffer_pool_outstanding {}", pool.outstanding());

    output.push_str(&node.metrics().export_prometheus());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

/// Health check handler
async fn health_handler(State(node): State<Arc<DataNode>>) -> impl IntoResponse {
    if node.space().disks().is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "UNHEALTHY")
    } else {
        (StatusCode::OK, "OK")
    }
}

/// Start the metrics HTTP server
async fn start_metrics_server(listen: &str, node: Arc<DataNode>) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(node);

    info!("Starting metrics server on {}", listen);
    let listener = TcpListener::bind(listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
