//! Serialized command queue.
//!
//! Commands are durable units of asynchronous work processed by any gateway
//! replica. Claiming selects the smallest `seq` in `requested` state with
//! `FOR UPDATE SKIP LOCKED`, inside the transaction that also writes the
//! terminal state, which gives at-most-once consumption without any
//! coordination beyond the database.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use rand::Rng;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::StoreError;

/// Listen/notify channel for queue wakeups.
pub const COMMANDS_QUEUE_CHANNEL: &str = "commands_queue";

/// Default command expiry applied by enqueuers.
pub const DEFAULT_COMMAND_TTL: Duration = Duration::from_secs(120);

/// A lost notification is tolerable: the receive loop polls at this
/// interval anyway.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Rows older than this are swept by housekeeping.
const COMMAND_MAX_AGE_SECS: i64 = 60;

/// Command lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandState {
    #[default]
    Requested,
    Success,
    Error,
}

impl CommandState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl TryFrom<String> for CommandState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "requested" => Ok(Self::Requested),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown command state `{other}`")),
        }
    }
}

/// A queued operation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Command {
    pub id: Uuid,
    pub seq: i64,

    #[sqlx(try_from = "String")]
    pub state: CommandState,

    pub action: String,
    pub params: Json<serde_json::Value>,
    pub result: Option<Json<serde_json::Value>>,

    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Command {
    /// Decode the params payload into a concrete type.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.params.0.clone())
    }
}

/// Handler callback. The command succeeded if no error was returned; the
/// returned value is recorded as the command result.
pub trait CommandHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        cmd: &'a Command,
    ) -> BoxFuture<'a, Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>>>;
}

/// The command queue, connected to the shared database.
pub struct CommandQueue {
    pool: PgPool,
    listener: Option<PgListener>,
    poll_interval: Duration,
}

impl CommandQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            listener: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the notification wait used as poll fallback. Test knob.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Add a command to the queue and notify all subscribed replicas.
    pub async fn enqueue(
        &self,
        action: &str,
        params: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let deadline = Utc::now()
            + TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::seconds(120));

        sqlx::query("INSERT INTO commands (action, params, deadline) VALUES ($1, $2, $3)")
            .bind(action)
            .bind(Json(params))
            .bind(deadline)
            .execute(&self.pool)
            .await?;

        sqlx::query("SELECT pg_notify($1, '')")
            .bind(COMMANDS_QUEUE_CHANNEL)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn subscribe(&mut self) -> Result<(), StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(COMMANDS_QUEUE_CHANNEL).await?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Await and process the next command.
    ///
    /// Blocks until a command was claimed and processed (returns `true`) or
    /// the poll interval elapsed without eligible work (returns `false`).
    /// A notification that loses the claim race keeps waiting for the rest
    /// of the interval.
    pub async fn receive(&mut self, handler: &dyn CommandHandler) -> Result<bool, StoreError> {
        if self.listener.is_none() {
            self.subscribe().await?;
        }

        // Opportunistic first claim covers commands enqueued before we
        // started listening.
        if self.process(handler).await? {
            return Ok(true);
        }

        let wait_until = tokio::time::Instant::now() + self.poll_interval;
        loop {
            let listener = self.listener.as_mut().expect("listener subscribed above");
            match tokio::time::timeout_at(wait_until, listener.recv()).await {
                Ok(Ok(_notification)) => {
                    if self.process(handler).await? {
                        return Ok(true);
                    }
                    // Another replica won the race; keep waiting.
                }
                Ok(Err(err)) => {
                    // Broken subscription: drop it so the next receive
                    // reconnects, and surface the error.
                    self.listener = None;
                    return Err(err.into());
                }
                Err(_elapsed) => return self.process(handler).await,
            }
        }
    }

    /// Claim and execute one command, if any is eligible.
    async fn process(&self, handler: &dyn CommandHandler) -> Result<bool, StoreError> {
        let started_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let cmd: Option<Command> = sqlx::query_as(
            "SELECT * FROM commands
              WHERE state = 'requested'
              ORDER BY seq ASC
              LIMIT 1
                FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(cmd) = cmd else {
            return Ok(false);
        };

        let (state, result) = if cmd.deadline < Utc::now() {
            debug!(action = %cmd.action, seq = cmd.seq, "command expired before claim");
            (CommandState::Error, serde_json::json!("timedout"))
        } else {
            match handler.handle(&cmd).await {
                Ok(value) => (CommandState::Success, value),
                Err(err) => {
                    warn!(action = %cmd.action, seq = cmd.seq, error = %err, "command failed");
                    (CommandState::Error, serde_json::json!(err.to_string()))
                }
            }
        };

        sqlx::query(
            "UPDATE commands
                SET state = $2, result = $3, started_at = $4, stopped_at = $5
              WHERE id = $1",
        )
        .bind(cmd.id)
        .bind(state.as_str())
        .bind(Json(result))
        .bind(started_at)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

/// Periodic housekeeping: delete commands older than a minute. Runs every
/// 10-20 seconds (randomized to spread replicas) until shutdown.
pub async fn run_housekeeping(pool: PgPool, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        if let Err(err) = delete_expired(&pool).await {
            warn!(error = %err, "command housekeeping failed");
        }

        let sleep = Duration::from_secs(10 + rand::thread_rng().gen_range(0..10));
        tokio::select! {
            () = tokio::time::sleep(sleep) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Nobody cares about commands older than a minute.
async fn delete_expired(pool: &PgPool) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM commands WHERE now() - created_at > make_interval(secs => $1)",
    )
    .bind(COMMAND_MAX_AGE_SECS as f64)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
