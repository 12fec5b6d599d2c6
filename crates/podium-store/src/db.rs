//! Postgres pool bootstrap and transaction helpers.

use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::info;

/// Store errors, mapped onto the cluster error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query error: {0}")]
    Query(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Unavailable(e.to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict(e.to_string()),
            _ => Self::Query(e),
        }
    }
}

impl StoreError {
    /// Postgres serialization failure (SQLSTATE 40001). The only error class
    /// where retrying the transaction locally is allowed.
    pub fn is_serialization_failure(&self) -> bool {
        matches!(
            self,
            Self::Query(sqlx::Error::Database(db))
                if db.code().as_deref() == Some("40001")
        )
    }
}

/// Connection options for the shared pool.
#[derive(Debug, Clone)]
pub struct ConnectOpts {
    pub url: String,
    pub max_conns: u32,
    pub min_conns: u32,
}

impl ConnectOpts {
    pub fn new(url: impl Into<String>, max_conns: u32) -> Self {
        Self {
            url: url.into(),
            max_conns,
            min_conns: 1,
        }
    }
}

/// Open the shared connection pool and run pending migrations.
pub async fn connect(opts: &ConnectOpts) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(opts.max_conns)
        .min_connections(opts.min_conns.min(opts.max_conns))
        .acquire_timeout(Duration::from_secs(10))
        .connect(&opts.url)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

    info!(max_connections = opts.max_conns, "database pool ready");

    Ok(pool)
}

/// Retry limits for serialization failures.
const TX_RETRY_ATTEMPTS: u32 = 3;
const TX_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Run `op` inside a transaction, committing on success.
///
/// Serialization failures are retried up to three times with exponential
/// backoff; every other error rolls back and surfaces unchanged.
pub async fn with_tx_retry<T, F>(pool: &PgPool, op: F) -> Result<T, StoreError>
where
    F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<T, StoreError>>,
{
    let mut delay = TX_RETRY_BASE_DELAY;
    let mut attempt = 0;
    loop {
        let mut tx = pool.begin().await?;
        match op(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                return Ok(value);
            }
            Err(err) if err.is_serialization_failure() && attempt + 1 < TX_RETRY_ATTEMPTS => {
                drop(tx);
                attempt += 1;
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}
