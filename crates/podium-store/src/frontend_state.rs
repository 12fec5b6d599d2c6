//! Frontend (tenant) rows.
//!
//! Frontends are created and mutated by operator tooling; the gateway and
//! router only read them.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::db::StoreError;
use crate::query::Query;
use crate::settings::FrontendSettings;

/// A tenant frontend with its own shared secret and URL key.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FrontendState {
    pub id: Uuid,
    pub key: String,
    pub secret: String,
    pub settings: Json<FrontendSettings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

const SELECT_FRONTENDS: &str = "SELECT frontends.id, frontends.key, frontends.secret, \
     frontends.settings, frontends.created_at, frontends.updated_at FROM frontends";

/// Retrieve all frontends matching a query.
pub async fn get_frontend_states(
    exec: impl PgExecutor<'_>,
    q: &Query,
) -> Result<Vec<FrontendState>, StoreError> {
    let sql = q.statement(SELECT_FRONTENDS);
    let query = q.bind_to(sqlx::query_as::<_, FrontendState>(&sql));
    Ok(query.fetch_all(exec).await?)
}

/// Retrieve a single frontend, or `None`.
pub async fn get_frontend_state(
    exec: impl PgExecutor<'_>,
    q: &Query,
) -> Result<Option<FrontendState>, StoreError> {
    let sql = q.clone().limit(1).statement(SELECT_FRONTENDS);
    let query = q.bind_to(sqlx::query_as::<_, FrontendState>(&sql));
    Ok(query.fetch_optional(exec).await?)
}

/// Lookup by the public URL key. This is the gateway's auth path.
pub async fn get_frontend_state_by_key(
    exec: impl PgExecutor<'_>,
    key: &str,
) -> Result<Option<FrontendState>, StoreError> {
    get_frontend_state(exec, &Query::new().eq("frontends.key", key)).await
}

impl FrontendState {
    /// A fresh, not-yet-persisted frontend record.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            secret: secret.into(),
            settings: Json(FrontendSettings::default()),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Persist the record (insert or update) and reload it.
    pub async fn save(&mut self, conn: &mut PgConnection) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO frontends (id, key, secret, settings)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET
                key = EXCLUDED.key,
                secret = EXCLUDED.secret,
                settings = EXCLUDED.settings,
                updated_at = now()",
        )
        .bind(self.id)
        .bind(&self.key)
        .bind(&self.secret)
        .bind(&self.settings)
        .execute(&mut *conn)
        .await?;

        self.refresh(conn).await
    }

    /// Reload this record from the database.
    pub async fn refresh(&mut self, conn: &mut PgConnection) -> Result<(), StoreError> {
        let q = Query::new().eq("frontends.id", self.id);
        *self = get_frontend_state(&mut *conn, &q)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("frontend {}", self.id)))?;
        Ok(())
    }
}

/// Remove a frontend row. Operator action only.
pub async fn delete_frontend_state(
    exec: impl PgExecutor<'_>,
    id: Uuid,
) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM frontends WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}
