//! Meeting rows.
//!
//! A meeting is identified tenant-visibly by `id` and node-side by
//! `internal_id`; both are unique when set. A meeting belongs to at most
//! one backend at any time, and `internal_id` never changes once assigned.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use podium_core::bbb::Meeting;

use crate::db::StoreError;
use crate::query::Query;

/// Poll parameters for [`await_meeting_by_internal_id`].
const AWAIT_INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const AWAIT_MAX_BACKOFF: Duration = Duration::from_millis(800);

/// A meeting row: the mirrored snapshot plus its relations.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MeetingState {
    pub id: String,
    pub internal_id: Option<String>,

    pub frontend_id: Option<Uuid>,
    pub backend_id: Option<Uuid>,

    #[sqlx(rename = "state")]
    pub meeting: Json<Meeting>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
}

const SELECT_MEETINGS: &str = "SELECT meetings.id, meetings.internal_id, meetings.frontend_id, \
     meetings.backend_id, meetings.state, meetings.created_at, meetings.updated_at, \
     meetings.synced_at FROM meetings";

/// Retrieve all meetings matching a query.
pub async fn get_meeting_states(
    exec: impl PgExecutor<'_>,
    q: &Query,
) -> Result<Vec<MeetingState>, StoreError> {
    let sql = q.statement(SELECT_MEETINGS);
    let query = q.bind_to(sqlx::query_as::<_, MeetingState>(&sql));
    Ok(query.fetch_all(exec).await?)
}

/// Retrieve a single meeting, or `None`.
pub async fn get_meeting_state(
    exec: impl PgExecutor<'_>,
    q: &Query,
) -> Result<Option<MeetingState>, StoreError> {
    let sql = q.clone().limit(1).statement(SELECT_MEETINGS);
    let query = q.bind_to(sqlx::query_as::<_, MeetingState>(&sql));
    Ok(query.fetch_optional(exec).await?)
}

/// Lookup by the tenant-visible meeting id.
pub async fn get_meeting_state_by_id(
    exec: impl PgExecutor<'_>,
    id: &str,
) -> Result<Option<MeetingState>, StoreError> {
    get_meeting_state(exec, &Query::new().eq("meetings.id", id)).await
}

/// Lookup by the node-assigned internal meeting id.
pub async fn get_meeting_state_by_internal_id(
    exec: impl PgExecutor<'_>,
    internal_id: &str,
) -> Result<Option<MeetingState>, StoreError> {
    get_meeting_state(exec, &Query::new().eq("meetings.internal_id", internal_id)).await
}

impl MeetingState {
    /// A fresh, not-yet-persisted meeting record.
    pub fn new(id: impl Into<String>, meeting: Meeting) -> Self {
        Self {
            id: id.into(),
            internal_id: None,
            frontend_id: None,
            backend_id: None,
            meeting: Json(meeting),
            created_at: Utc::now(),
            updated_at: None,
            synced_at: None,
        }
    }

    pub fn with_internal_id(mut self, internal_id: impl Into<String>) -> Self {
        self.internal_id = Some(internal_id.into());
        self
    }

    pub fn with_frontend(mut self, frontend_id: Uuid) -> Self {
        self.frontend_id = Some(frontend_id);
        self
    }

    pub fn with_backend(mut self, backend_id: Uuid) -> Self {
        self.backend_id = Some(backend_id);
        self
    }

    /// Insert the row.
    pub async fn insert(&self, exec: impl PgExecutor<'_>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO meetings (id, internal_id, frontend_id, backend_id, state, synced_at)
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(&self.id)
        .bind(&self.internal_id)
        .bind(self.frontend_id)
        .bind(self.backend_id)
        .bind(&self.meeting)
        .execute(exec)
        .await?;
        Ok(())
    }

    /// Update the row.
    ///
    /// The `internal_id` is immutable once assigned: an update carrying a
    /// different internal id fails with [`StoreError::Conflict`] and leaves
    /// the row untouched.
    pub async fn update(&self, conn: &mut sqlx::PgConnection) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE meetings
                SET internal_id = $2,
                    frontend_id = $3,
                    backend_id = $4,
                    state = $5,
                    updated_at = now(),
                    synced_at = now()
              WHERE id = $1
                AND (internal_id IS NULL OR internal_id = $2)",
        )
        .bind(&self.id)
        .bind(&self.internal_id)
        .bind(self.frontend_id)
        .bind(self.backend_id)
        .bind(&self.meeting)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        if get_meeting_state_by_id(&mut *conn, &self.id).await?.is_some() {
            Err(StoreError::Conflict(format!(
                "meeting {} internal id is immutable",
                self.id
            )))
        } else {
            Err(StoreError::NotFound(format!("meeting {}", self.id)))
        }
    }

    /// Insert-or-update keyed by the tenant-visible id. Used by the meeting
    /// sync and the forwarding paths, where the row may exist either way.
    pub async fn save(&self, exec: impl PgExecutor<'_>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO meetings (id, internal_id, frontend_id, backend_id, state, synced_at)
             VALUES ($1, $2, $3, $4, $5, now())
             ON CONFLICT (id) DO UPDATE SET
                internal_id = COALESCE(meetings.internal_id, EXCLUDED.internal_id),
                frontend_id = COALESCE(EXCLUDED.frontend_id, meetings.frontend_id),
                backend_id = EXCLUDED.backend_id,
                state = EXCLUDED.state,
                updated_at = now(),
                synced_at = now()",
        )
        .bind(&self.id)
        .bind(&self.internal_id)
        .bind(self.frontend_id)
        .bind(self.backend_id)
        .bind(&self.meeting)
        .execute(exec)
        .await?;
        Ok(())
    }
}

/// Claim an unbound meeting for a frontend. Returns `false` when the row
/// is already bound (to anyone) or does not exist.
pub async fn bind_meeting_frontend(
    exec: impl PgExecutor<'_>,
    id: &str,
    frontend_id: Uuid,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE meetings SET frontend_id = $2, updated_at = now()
          WHERE id = $1 AND frontend_id IS NULL",
    )
    .bind(id)
    .bind(frontend_id)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete by tenant-visible id.
pub async fn delete_meeting_state(exec: impl PgExecutor<'_>, id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM meetings WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete by node-assigned internal id.
pub async fn delete_meeting_state_by_internal_id(
    exec: impl PgExecutor<'_>,
    internal_id: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM meetings WHERE internal_id = $1")
        .bind(internal_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete every meeting of a backend whose internal id is not in `present`.
/// The diff half of the meeting sync.
pub async fn delete_absent_for_backend(
    exec: impl PgExecutor<'_>,
    backend_id: Uuid,
    present: &[String],
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM meetings
          WHERE backend_id = $1
            AND (internal_id IS NULL OR internal_id <> ALL($2))",
    )
    .bind(backend_id)
    .bind(present)
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

/// Garbage-collect rows whose snapshot has not been confirmed for
/// `older_than`. The backends remain the source of truth, so stale rows
/// are dropped rather than kept around.
pub async fn delete_stale_meetings(
    exec: impl PgExecutor<'_>,
    older_than: Duration,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM meetings
          WHERE synced_at IS NOT NULL
            AND synced_at < now() - make_interval(secs => $1)",
    )
    .bind(older_than.as_secs_f64())
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

/// Wait for a meeting row to appear, polling with exponential backoff.
///
/// Event handlers race against `create` forwarding; the row usually shows
/// up within a few milliseconds. Returns `None` once `wait` is exhausted.
pub async fn await_meeting_by_internal_id(
    pool: &PgPool,
    internal_id: &str,
    wait: Duration,
) -> Result<Option<MeetingState>, StoreError> {
    let deadline = tokio::time::Instant::now() + wait;
    let mut backoff = AWAIT_INITIAL_BACKOFF;

    loop {
        if let Some(state) = get_meeting_state_by_internal_id(pool, internal_id).await? {
            return Ok(Some(state));
        }
        if tokio::time::Instant::now() + backoff > deadline {
            return Ok(None);
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(AWAIT_MAX_BACKOFF);
    }
}

/// Replica participant totals per backend, for load-based routing.
pub async fn get_backend_loads(
    exec: impl PgExecutor<'_>,
) -> Result<Vec<(Uuid, i64)>, StoreError> {
    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT backend_id, COALESCE(SUM((state->>'participantCount')::BIGINT), 0)::BIGINT
           FROM meetings
          WHERE backend_id IS NOT NULL
          GROUP BY backend_id",
    )
    .fetch_all(exec)
    .await?;
    Ok(rows)
}
