//! tabletdb Server Binary
//!
//! Opens every table under the data directory, starts background
//! maintenance and serves clients over TCP.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tabletdb::network::Server;
use tabletdb::sync::ShutdownSignal;
use tabletdb::{status, Config, TabletServer};
use tracing_subscriber::{fmt, EnvFilter};

/// tabletdb Server
#[derive(Parser, Debug)]
#[command(name = "tabletdb-server")]
#[command(about = "Tablet server: write buffering, delta stores and background compaction")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tabletdb_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7051")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// MemStore size limit in MB before flush
    #[arg(short = 'm', long, default_value = "8")]
    memstore_mb: usize,

    /// Maintenance loop interval in milliseconds
    #[arg(long, default_value = "250")]
    maintenance_interval_ms: u64,

    /// Log tablet counters every N seconds (0 disables)
    #[arg(long, default_value = "60")]
    status_interval_secs: u64,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tabletdb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("tabletdb server v{}", tabletdb::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .memstore_size_limit(args.memstore_mb * 1024 * 1024)
        .maintenance_interval_ms(args.maintenance_interval_ms)
        .build();

    status::init();

    let tablets = match TabletServer::open(config.clone()) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!("Failed to open tablet server: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = tablets.start_maintenance() {
        tracing::error!("Failed to start maintenance: {}", e);
        std::process::exit(1);
    }
    tracing::info!(tables = ?tablets.table_names(), "Tablet server ready");

    let stop = ShutdownSignal::new();
    let reporter = (args.status_interval_secs > 0).then(|| {
        let stop = stop.clone();
        let tablets = Arc::clone(&tablets);
        let interval = Duration::from_secs(args.status_interval_secs);
        std::thread::spawn(move || {
            while !stop.wait_timeout(interval) {
                for s in status::snapshot() {
                    tracing::info!(
                        table = %s.table,
                        pending_scans = s.pending_scans,
                        pending_transactions = s.pending_transactions,
                        rows_written = s.rows_written,
                        memstore_flushes = s.memstore_flushes,
                        delta_flushes = s.delta_flushes,
                        major_compactions = s.major_compactions,
                        "tablet status"
                    );
                }
                let health = tablets.maintenance().health();
                if !health.is_healthy() {
                    tracing::warn!(?health, "maintenance degraded");
                }
            }
        })
    });

    let server = match Server::bind(config, Arc::clone(&tablets)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    };
    let result = server.run();

    stop.shutdown();
    if let Some(handle) = reporter {
        let _ = handle.join();
    }
    if let Err(e) = tablets.shutdown() {
        tracing::error!("Shutdown error: {}", e);
    }
    status::shutdown();

    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Server stopped");
}
