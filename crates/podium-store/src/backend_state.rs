//! Backend rows.
//!
//! A backend row is created by node-local registration and destroyed only
//! by an operator action. The `node_state`, `latency_ms` and `last_error`
//! columns are written exclusively by the backend's own agent.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::db::StoreError;
use crate::query::Query;
use crate::settings::normalize_tags;

/// Operator-owned lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminState {
    Init,
    #[default]
    Ready,
    Stopped,
    Decommissioned,
}

impl AdminState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
            Self::Decommissioned => "decommissioned",
        }
    }
}

impl TryFrom<String> for AdminState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "init" => Ok(Self::Init),
            "ready" => Ok(Self::Ready),
            "stopped" => Ok(Self::Stopped),
            "decommissioned" => Ok(Self::Decommissioned),
            other => Err(format!("unknown admin state `{other}`")),
        }
    }
}

/// Agent-owned liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Init,
    Ready,
    Error,
    Stopped,
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl TryFrom<String> for NodeState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "init" => Ok(Self::Init),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown node state `{other}`")),
        }
    }
}

/// A backend row, shared across all gateway replicas.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BackendState {
    pub id: Uuid,

    #[sqlx(try_from = "String")]
    pub node_state: NodeState,
    #[sqlx(try_from = "String")]
    pub admin_state: AdminState,

    pub last_error: Option<String>,
    pub latency_ms: Option<i64>,

    pub host: String,
    pub secret: String,

    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
}

const SELECT_BACKENDS: &str = "SELECT backends.id, backends.node_state, backends.admin_state, \
     backends.last_error, backends.latency_ms, backends.host, backends.secret, backends.tags, \
     backends.created_at, backends.updated_at, backends.synced_at FROM backends";

/// Retrieve all backends matching a query.
pub async fn get_backend_states(
    exec: impl PgExecutor<'_>,
    q: &Query,
) -> Result<Vec<BackendState>, StoreError> {
    let sql = q.statement(SELECT_BACKENDS);
    let query = q.bind_to(sqlx::query_as::<_, BackendState>(&sql));
    Ok(query.fetch_all(exec).await?)
}

/// Retrieve a single backend, or `None`.
pub async fn get_backend_state(
    exec: impl PgExecutor<'_>,
    q: &Query,
) -> Result<Option<BackendState>, StoreError> {
    let sql = q.clone().limit(1).statement(SELECT_BACKENDS);
    let query = q.bind_to(sqlx::query_as::<_, BackendState>(&sql));
    Ok(query.fetch_optional(exec).await?)
}

impl BackendState {
    /// A fresh, not-yet-persisted backend record.
    pub fn new(host: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_state: NodeState::Init,
            admin_state: AdminState::Ready,
            last_error: None,
            latency_ms: None,
            host: host.into(),
            secret: secret.into(),
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
            synced_at: None,
        }
    }

    pub fn with_admin_state(mut self, admin_state: AdminState) -> Self {
        self.admin_state = admin_state;
        self
    }

    /// Persist the record (insert or update) and reload it, so generated
    /// columns are visible on the in-memory copy.
    pub async fn save(&mut self, conn: &mut PgConnection) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO backends (
                id, host, secret, node_state, admin_state, last_error, latency_ms, tags
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                host = EXCLUDED.host,
                secret = EXCLUDED.secret,
                node_state = EXCLUDED.node_state,
                admin_state = EXCLUDED.admin_state,
                last_error = EXCLUDED.last_error,
                latency_ms = EXCLUDED.latency_ms,
                tags = EXCLUDED.tags,
                updated_at = now()",
        )
        .bind(self.id)
        .bind(&self.host)
        .bind(&self.secret)
        .bind(self.node_state.as_str())
        .bind(self.admin_state.as_str())
        .bind(&self.last_error)
        .bind(self.latency_ms)
        .bind(normalize_tags(&self.tags))
        .execute(&mut *conn)
        .await?;

        self.refresh(conn).await
    }

    /// Reload this record from the database.
    pub async fn refresh(&mut self, conn: &mut PgConnection) -> Result<(), StoreError> {
        let q = Query::new().eq("backends.id", self.id);
        *self = get_backend_state(&mut *conn, &q)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("backend {}", self.id)))?;
        Ok(())
    }
}

/// Agent-owned health update: `node_state`, `latency_ms`, `last_error`.
pub async fn update_node_health(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    node_state: NodeState,
    latency_ms: Option<i64>,
    last_error: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE backends
            SET node_state = $2, latency_ms = $3, last_error = $4, updated_at = now()
          WHERE id = $1",
    )
    .bind(id)
    .bind(node_state.as_str())
    .bind(latency_ms)
    .bind(last_error)
    .execute(exec)
    .await?;
    Ok(())
}

/// Mark a successful meeting sync.
pub async fn update_synced_at(exec: impl PgExecutor<'_>, id: Uuid) -> Result<(), StoreError> {
    sqlx::query("UPDATE backends SET synced_at = now(), updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Operator-owned lifecycle change.
pub async fn update_admin_state(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    admin_state: AdminState,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE backends SET admin_state = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(admin_state.as_str())
        .execute(exec)
        .await?;
    Ok(())
}

/// Remove a backend row. Operator action only.
pub async fn delete_backend_state(exec: impl PgExecutor<'_>, id: Uuid) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM backends WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}
