//! Storage layer tests.
//!
//! These run against a disposable Postgres database:
//! `PODIUM_TEST_DB_URL=postgres://... cargo test -p podium-store -- --ignored`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::PgPool;
use uuid::Uuid;

use podium_core::bbb::Meeting;

use crate::backend_state::{self, AdminState, BackendState, NodeState};
use crate::command_queue::{Command, CommandHandler, CommandQueue};
use crate::db::{connect, ConnectOpts, StoreError};
use crate::frontend_state::{self, FrontendState};
use crate::meeting_state::{self, MeetingState};
use crate::query::Query;
use crate::settings::FrontendSettings;

async fn test_pool() -> PgPool {
    let url = std::env::var("PODIUM_TEST_DB_URL")
        .expect("PODIUM_TEST_DB_URL must point at a disposable Postgres database");
    connect(&ConnectOpts::new(url, 5)).await.unwrap()
}

fn meeting_snapshot(meeting_id: &str, internal_id: &str, participants: i64) -> Meeting {
    Meeting {
        meeting_id: meeting_id.into(),
        internal_meeting_id: internal_id.into(),
        participant_count: participants,
        running: true,
        ..Meeting::default()
    }
}

// === Backend tests ===

#[tokio::test]
#[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
async fn backend_save_and_refresh() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();

    let mut backend = BackendState::new(format!("https://{}/api/", Uuid::new_v4()), "s3cr3t");
    backend.tags = vec!["EU".into(), "paid".into(), "eu".into()];
    backend.save(&mut conn).await.unwrap();

    assert_eq!(backend.node_state, NodeState::Init);
    assert_eq!(backend.admin_state, AdminState::Ready);
    // Tags are normalized on save.
    assert_eq!(backend.tags, vec!["eu".to_string(), "paid".to_string()]);

    backend.admin_state = AdminState::Stopped;
    backend.save(&mut conn).await.unwrap();
    assert_eq!(backend.admin_state, AdminState::Stopped);
    assert!(backend.updated_at.is_some());

    assert!(backend_state::delete_backend_state(&pool, backend.id)
        .await
        .unwrap());
}

#[tokio::test]
#[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
async fn backend_node_health_updates() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();

    let mut backend = BackendState::new(format!("https://{}/api/", Uuid::new_v4()), "s3cr3t");
    backend.save(&mut conn).await.unwrap();

    backend_state::update_node_health(&pool, backend.id, NodeState::Error, Some(120), Some("boom"))
        .await
        .unwrap();

    backend.refresh(&mut conn).await.unwrap();
    assert_eq!(backend.node_state, NodeState::Error);
    assert_eq!(backend.latency_ms, Some(120));
    assert_eq!(backend.last_error.as_deref(), Some("boom"));

    backend_state::delete_backend_state(&pool, backend.id)
        .await
        .unwrap();
}

// === Frontend tests ===

#[tokio::test]
#[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
async fn frontend_lookup_by_key() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();

    let key = format!("tenant-{}", Uuid::new_v4());
    let mut frontend = FrontendState::new(&key, "fe-secret");
    frontend.settings.0 = FrontendSettings {
        required_tags: vec!["paid".into()],
        default_presentation: None,
    };
    frontend.save(&mut conn).await.unwrap();

    let found = frontend_state::get_frontend_state_by_key(&pool, &key)
        .await
        .unwrap()
        .expect("frontend by key");
    assert_eq!(found.id, frontend.id);
    assert_eq!(found.settings.0.required_tags, vec!["paid".to_string()]);

    assert!(
        frontend_state::get_frontend_state_by_key(&pool, "unknown-tenant")
            .await
            .unwrap()
            .is_none()
    );

    frontend_state::delete_frontend_state(&pool, frontend.id)
        .await
        .unwrap();
}

// === Meeting tests ===

#[tokio::test]
#[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
async fn meeting_internal_id_is_immutable() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();

    let id = format!("tenant:{}", Uuid::new_v4());
    let internal = format!("int-{}", Uuid::new_v4());
    let state = MeetingState::new(&id, meeting_snapshot(&id, &internal, 1))
        .with_internal_id(&internal);
    state.insert(&pool).await.unwrap();

    // Updating with the same internal id is fine.
    state.update(&mut conn).await.unwrap();

    // A different internal id must fail and must not mutate the row.
    let mut hijacked = state.clone();
    hijacked.internal_id = Some(format!("int-{}", Uuid::new_v4()));
    let err = hijacked.update(&mut conn).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let row = meeting_state::get_meeting_state_by_id(&pool, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.internal_id.as_deref(), Some(internal.as_str()));

    meeting_state::delete_meeting_state(&pool, &id).await.unwrap();
}

#[tokio::test]
#[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
async fn meeting_sync_diff_deletes_absent() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();

    let mut backend = BackendState::new(format!("https://{}/api/", Uuid::new_v4()), "s3cr3t");
    backend.save(&mut conn).await.unwrap();

    let keep_internal = format!("int-{}", Uuid::new_v4());
    let drop_internal = format!("int-{}", Uuid::new_v4());
    for internal in [&keep_internal, &drop_internal] {
        let id = format!("tenant:{}", Uuid::new_v4());
        MeetingState::new(&id, meeting_snapshot(&id, internal, 0))
            .with_internal_id(internal)
            .with_backend(backend.id)
            .save(&pool)
            .await
            .unwrap();
    }

    let deleted = meeting_state::delete_absent_for_backend(
        &pool,
        backend.id,
        std::slice::from_ref(&keep_internal),
    )
    .await
    .unwrap();
    assert_eq!(deleted, 1);

    assert!(
        meeting_state::get_meeting_state_by_internal_id(&pool, &keep_internal)
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        meeting_state::get_meeting_state_by_internal_id(&pool, &drop_internal)
            .await
            .unwrap()
            .is_none()
    );

    backend_state::delete_backend_state(&pool, backend.id)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
async fn await_meeting_sees_late_insert() {
    let pool = test_pool().await;

    let id = format!("tenant:{}", Uuid::new_v4());
    let internal = format!("int-{}", Uuid::new_v4());

    let insert_pool = pool.clone();
    let insert_id = id.clone();
    let insert_internal = internal.clone();
    let inserter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        MeetingState::new(&insert_id, meeting_snapshot(&insert_id, &insert_internal, 0))
            .with_internal_id(&insert_internal)
            .insert(&insert_pool)
            .await
            .unwrap();
    });

    let found =
        meeting_state::await_meeting_by_internal_id(&pool, &internal, Duration::from_secs(5))
            .await
            .unwrap();
    assert!(found.is_some());

    inserter.await.unwrap();
    meeting_state::delete_meeting_state(&pool, &id).await.unwrap();
}

#[tokio::test]
#[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
async fn meeting_query_joins_frontend() {
    let pool = test_pool().await;
    let mut conn = pool.acquire().await.unwrap();

    let key = format!("tenant-{}", Uuid::new_v4());
    let mut frontend = FrontendState::new(&key, "fe-secret");
    frontend.save(&mut conn).await.unwrap();

    let id = format!("{key}:{}", Uuid::new_v4());
    let internal = format!("int-{}", Uuid::new_v4());
    MeetingState::new(&id, meeting_snapshot(&id, &internal, 3))
        .with_internal_id(&internal)
        .with_frontend(frontend.id)
        .save(&pool)
        .await
        .unwrap();

    let q = Query::new()
        .join("frontends", "frontends.id = meetings.frontend_id")
        .eq("frontends.key", key.as_str());
    let meetings = meeting_state::get_meeting_states(&pool, &q).await.unwrap();
    assert_eq!(meetings.len(), 1);
    assert_eq!(meetings[0].id, id);

    meeting_state::delete_meeting_state(&pool, &id).await.unwrap();
    frontend_state::delete_frontend_state(&pool, frontend.id)
        .await
        .unwrap();
}

// === Command queue tests ===

struct CountingHandler {
    hits: Arc<AtomicUsize>,
}

impl CommandHandler for CountingHandler {
    fn handle<'a>(
        &'a self,
        _cmd: &'a Command,
    ) -> BoxFuture<'a, Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>>> {
        Box::pin(async move {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!("done"))
        })
    }
}

#[tokio::test]
#[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
async fn command_is_claimed_by_exactly_one_consumer() {
    let pool = test_pool().await;

    // Drain leftovers so the claim below observes only our command.
    sqlx::query("DELETE FROM commands").execute(&pool).await.unwrap();

    let hits = Arc::new(AtomicUsize::new(0));

    let mut consumers = Vec::new();
    for _ in 0..2 {
        let mut queue =
            CommandQueue::new(pool.clone()).with_poll_interval(Duration::from_secs(2));
        let handler = CountingHandler { hits: hits.clone() };
        consumers.push(tokio::spawn(async move {
            queue.receive(&handler).await.unwrap()
        }));
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    let queue = CommandQueue::new(pool.clone());
    queue
        .enqueue(
            "noop",
            serde_json::json!({"id": "x"}),
            Duration::from_secs(120),
        )
        .await
        .unwrap();

    let mut processed = 0;
    for consumer in consumers {
        if consumer.await.unwrap() {
            processed += 1;
        }
    }

    // Exactly one consumer ran the handler; the other returned after its
    // poll tick without work.
    assert_eq!(processed, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let (state, result): (String, serde_json::Value) =
        sqlx::query_as("SELECT state, result FROM commands WHERE action = 'noop'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(state, "success");
    assert_eq!(result, serde_json::json!("done"));
}

#[tokio::test]
#[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
async fn expired_command_completes_as_timedout() {
    let pool = test_pool().await;
    sqlx::query("DELETE FROM commands").execute(&pool).await.unwrap();

    let queue = CommandQueue::new(pool.clone());
    queue
        .enqueue("noop", serde_json::json!({}), Duration::from_secs(0))
        .await
        .unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let handler = CountingHandler { hits: hits.clone() };
    let mut receiver =
        CommandQueue::new(pool.clone()).with_poll_interval(Duration::from_secs(1));
    assert!(receiver.receive(&handler).await.unwrap());

    // The handler is never invoked for an expired command.
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let (state, result): (String, serde_json::Value) =
        sqlx::query_as("SELECT state, result FROM commands WHERE action = 'noop'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(state, "error");
    assert_eq!(result, serde_json::json!("timedout"));
}
