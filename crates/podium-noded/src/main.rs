//! Podium node agent.
//!
//! Runs next to a conferencing node: discovers the node's API URL and
//! secret from its properties file, resolves (or registers) the backend
//! row in the cluster state, and feeds the node's event stream into the
//! meeting replica.

mod config;
mod handler;
mod monitor;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use podium_core::config::{self as coreconfig, LogFormat};
use podium_core::tracing_init;
use podium_store::backend_state::{self, AdminState, BackendState};
use podium_store::query::Arg;
use podium_store::{connect, ConnectOpts, Query};

use crate::config::Properties;
use crate::handler::EventHandler;
use crate::monitor::Monitor;

#[derive(Parser, Debug)]
#[command(name = "podium-noded")]
#[command(version, about = "Node-local agent for the podium cluster")]
struct Args {
    /// Path to the node's properties file.
    #[arg(
        long,
        env = "BBB_CONFIG",
        default_value = "/etc/bigbluebutton/bbb-web.properties"
    )]
    config: PathBuf,

    /// Postgres connection string of the cluster state.
    #[arg(long, env = "DB_URL", default_value = coreconfig::DEFAULT_DB_URL)]
    db_url: String,

    /// Register this node when its backend row is missing.
    #[arg(long, short = 'a')]
    register: bool,

    /// Log level filter (e.g. "info", "debug").
    #[arg(long, env = "LOG_LEVEL", default_value = coreconfig::DEFAULT_LOG_LEVEL)]
    log_level: String,

    /// Log output format: "text" or "json".
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    coreconfig::load_env_fallback();
    let args = Args::parse();

    let log_format: LogFormat = args.log_format.parse()?;
    let filter = format!(
        "podium_noded={level},podium_core={level},podium_store={level}",
        level = args.log_level
    );
    tracing_init::init_tracing(&filter, log_format == LogFormat::Json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "booting podium-noded"
    );

    let props = Properties::load(&args.config)
        .with_context(|| format!("reading properties file {}", args.config.display()))?;

    let pool = connect(&ConnectOpts::new(args.db_url, 4)).await?;

    let state = match resolve_backend(&pool, &props).await? {
        Some(state) => state,
        None if args.register => register_backend(&pool, &props).await?,
        None => anyhow::bail!(
            "backend not registered in the cluster; run with --register to add it"
        ),
    };

    info!(backend = %state.id, host = %state.host, "node resolved");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = Monitor::new(props.redis_url(), EventHandler::new(pool.clone()));
    let monitor_task = tokio::spawn(async move { monitor.run(shutdown_rx).await });

    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    if let Err(err) = monitor_task.await {
        warn!(error = %err, "monitor task ended abnormally");
    }

    info!("podium-noded stopped");
    Ok(())
}

/// Resolve the backend row by host-prefix match against the configured
/// server URL. A drifted secret is updated transactionally.
async fn resolve_backend(
    pool: &PgPool,
    props: &Properties,
) -> anyhow::Result<Option<BackendState>> {
    let server_url = props.server_url()?;
    let secret = props.secret()?;

    let mut tx = pool.begin().await?;

    let q = Query::new().where_sql(
        "backends.host ILIKE ?",
        [Arg::from(format!("{server_url}%"))],
    );
    let Some(mut state) = backend_state::get_backend_state(&mut *tx, &q).await? else {
        return Ok(None);
    };

    if state.secret != secret {
        warn!(
            backend = %state.id,
            host = %state.host,
            "updating changed secret for backend"
        );
        state.secret = secret.to_string();
        state.save(&mut tx).await?;
    }

    tx.commit().await?;
    Ok(Some(state))
}

/// Register a new backend row from the node's configuration.
async fn register_backend(pool: &PgPool, props: &Properties) -> anyhow::Result<BackendState> {
    let api_url = props.api_url()?;
    let secret = props.secret()?;

    let mut tx = pool.begin().await?;
    let mut state =
        BackendState::new(api_url, secret).with_admin_state(AdminState::Init);
    state.save(&mut tx).await?;
    tx.commit().await?;

    info!(backend = %state.id, host = %state.host, "registered new backend");
    Ok(state)
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
