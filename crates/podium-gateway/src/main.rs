//! Podium gateway daemon.
//!
//! Boots the store, the cluster controller with its backend agents, and
//! the HTTP edge. Any number of gateway replicas can run against the same
//! database; the command queue coordinates them.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use podium_core::config::{self, LogFormat};
use podium_core::{bbb, tracing_init};
use podium_gateway::cluster::Controller;
use podium_gateway::gateway::Gateway;
use podium_gateway::http::{self, EdgeState};
use podium_gateway::metrics::{self, Metrics};
use podium_gateway::router::Router;
use podium_store::{connect, ConnectOpts};

/// Grace window for agents and queue tasks to drain on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "podium-gateway")]
#[command(version, about = "Clustering gateway for conferencing backends")]
struct Args {
    /// HTTP listen address.
    #[arg(long, env = "LISTEN_HTTP", default_value = config::DEFAULT_LISTEN_HTTP)]
    listen_http: String,

    /// Postgres connection string.
    #[arg(long, env = "DB_URL", default_value = config::DEFAULT_DB_URL)]
    db_url: String,

    /// Connection pool size.
    #[arg(long, env = "DB_POOL_SIZE", default_value_t = config::DEFAULT_DB_POOL_SIZE)]
    db_pool_size: u32,

    /// Log level filter (e.g. "info", "debug").
    #[arg(long, env = "LOG_LEVEL", default_value = config::DEFAULT_LOG_LEVEL)]
    log_level: String,

    /// Log output format: "text" or "json".
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// Trust reverse-proxy forwarding headers ("true"/"false").
    #[arg(long, env = "REVERSE_PROXY", default_value = "false")]
    reverse_proxy: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pick up .env / sysconfig before clap reads the environment.
    config::load_env_fallback();
    let args = Args::parse();

    let log_format: LogFormat = args.log_format.parse()?;
    let filter = format!(
        "podium_gateway={level},podium_core={level},podium_store={level}",
        level = args.log_level
    );
    tracing_init::init_tracing(&filter, log_format == LogFormat::Json);

    let reverse_proxy = config::is_enabled(&args.reverse_proxy);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.listen_http,
        "booting podium-gateway"
    );
    if reverse_proxy {
        info!("reverse proxy mode is enabled");
    }

    let pool = connect(&ConnectOpts {
        url: args.db_url,
        max_conns: args.db_pool_size,
        min_conns: 8.min(args.db_pool_size),
    })
    .await?;

    let client = bbb::Client::new()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Cluster controller: agents, command consumer, queue housekeeping.
    let controller = Controller::new(pool.clone(), client.clone());
    let mut tasks = controller.start(shutdown_rx.clone());

    // Counter reporter.
    let metrics = Arc::new(Metrics::default());
    tasks.push(tokio::spawn(metrics::run_reporter(
        Arc::clone(&metrics),
        shutdown_rx.clone(),
    )));

    // Request pipeline and HTTP edge.
    let router = Router::new(pool.clone());
    let gateway = Arc::new(Gateway::new(pool.clone(), client, router, metrics));
    let app = http::build_router(EdgeState {
        gateway,
        reverse_proxy,
    });

    let listener = tokio::net::TcpListener::bind(&args.listen_http).await?;
    info!(addr = %args.listen_http, "HTTP edge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain background tasks within the grace window.
    let _ = shutdown_tx.send(true);
    let drain = async {
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("shutdown grace window elapsed, exiting anyway");
    }

    info!("podium-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received Ctrl+C shutdown signal"),
            _ = sigterm.recv() => info!("received SIGTERM shutdown signal"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C shutdown signal");
    }
}
