//! Event handlers.
//!
//! Each node event is applied to the meeting replica in its own
//! transaction, keyed by `internal_meeting_id`. Delivery is at-least-once,
//! so every handler is idempotent: attendee identity is
//! `internal_user_id`, and re-applying a lifecycle event converges to the
//! same row.

use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};

use podium_core::bbb::response::Attendee;
use podium_core::bbb::Event;
use podium_store::meeting_state::{self, MeetingState};
use podium_store::{with_tx_retry, StoreError};

/// How long to wait for the replica row when an event races the gateway's
/// `create` forwarding.
const CREATE_RACE_WAIT: Duration = Duration::from_secs(5);

/// Applies node events to the cluster state.
pub struct EventHandler {
    pool: PgPool,
}

impl EventHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply one event to the replica.
    pub async fn dispatch(&self, event: &Event) -> Result<(), StoreError> {
        match event {
            Event::MeetingCreated {
                internal_meeting_id,
                meeting_id,
            } => self.on_meeting_created(internal_meeting_id, meeting_id).await,
            Event::MeetingEnded {
                internal_meeting_id,
            } => self.on_meeting_ended(internal_meeting_id).await,
            Event::MeetingDestroyed {
                internal_meeting_id,
            } => self.on_meeting_destroyed(internal_meeting_id).await,
            Event::UserJoinedMeeting {
                internal_meeting_id,
                attendee,
            } => self.on_user_joined(internal_meeting_id, attendee).await,
            Event::UserLeftMeeting {
                internal_meeting_id,
                internal_user_id,
            } => self.on_user_left(internal_meeting_id, internal_user_id).await,
        }
    }

    async fn on_meeting_created(
        &self,
        internal_id: &str,
        meeting_id: &str,
    ) -> Result<(), StoreError> {
        info!(
            internal_meeting_id = internal_id,
            meeting_id, "meeting created"
        );

        let found =
            meeting_state::await_meeting_by_internal_id(&self.pool, internal_id, CREATE_RACE_WAIT)
                .await?;
        if found.is_none() {
            warn!(
                internal_meeting_id = internal_id,
                meeting_id, "meeting is unknown to the cluster, dropping event"
            );
            return Ok(());
        }

        self.mutate_meeting(internal_id, |state| {
            state.meeting.0.running = true;
        })
        .await
    }

    async fn on_meeting_ended(&self, internal_id: &str) -> Result<(), StoreError> {
        info!(internal_meeting_id = internal_id, "meeting ended");

        let found =
            meeting_state::await_meeting_by_internal_id(&self.pool, internal_id, CREATE_RACE_WAIT)
                .await?;
        if found.is_none() {
            warn!(
                internal_meeting_id = internal_id,
                "meeting is unknown to the cluster, dropping event"
            );
            return Ok(());
        }

        self.mutate_meeting(internal_id, |state| {
            state.meeting.0.running = false;
            state.meeting.0.attendees.attendee.clear();
        })
        .await
    }

    async fn on_meeting_destroyed(&self, internal_id: &str) -> Result<(), StoreError> {
        info!(internal_meeting_id = internal_id, "meeting destroyed");
        meeting_state::delete_meeting_state_by_internal_id(&self.pool, internal_id).await?;
        Ok(())
    }

    async fn on_user_joined(
        &self,
        internal_id: &str,
        attendee: &Attendee,
    ) -> Result<(), StoreError> {
        info!(
            internal_meeting_id = internal_id,
            internal_user_id = %attendee.internal_user_id,
            user = %attendee.full_name,
            "user joined meeting"
        );

        let attendee = attendee.clone();
        self.mutate_known_meeting(internal_id, move |state| {
            state.meeting.0.upsert_attendee(attendee.clone());
        })
        .await
    }

    async fn on_user_left(
        &self,
        internal_id: &str,
        internal_user_id: &str,
    ) -> Result<(), StoreError> {
        info!(
            internal_meeting_id = internal_id,
            internal_user_id, "user left meeting"
        );

        let internal_user_id = internal_user_id.to_string();
        self.mutate_known_meeting(internal_id, move |state| {
            state.meeting.0.remove_attendee(&internal_user_id);
        })
        .await
    }

    /// Read-modify-write of a meeting row in one transaction.
    async fn mutate_meeting(
        &self,
        internal_id: &str,
        apply: impl Fn(&mut MeetingState) + Send + Sync + Clone + 'static,
    ) -> Result<(), StoreError> {
        with_tx_retry(&self.pool, move |tx| {
            let apply = apply.clone();
            let internal_id = internal_id.to_string();
            Box::pin(async move {
                let Some(mut state) =
                    meeting_state::get_meeting_state_by_internal_id(&mut *tx, &internal_id).await?
                else {
                    return Ok(());
                };
                apply(&mut state);
                state.update(tx).await
            })
        })
        .await
    }

    /// Like [`Self::mutate_meeting`], but an unknown meeting is only
    /// logged. Membership events for meetings we never tracked are noise.
    async fn mutate_known_meeting(
        &self,
        internal_id: &str,
        apply: impl Fn(&mut MeetingState) + Send + Sync + Clone + 'static,
    ) -> Result<(), StoreError> {
        let known = meeting_state::get_meeting_state_by_internal_id(&self.pool, internal_id)
            .await?
            .is_some();
        if !known {
            warn!(
                internal_meeting_id = internal_id,
                "meeting is unknown to the cluster, dropping event"
            );
            return Ok(());
        }
        self.mutate_meeting(internal_id, apply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use podium_core::bbb::Meeting;
    use podium_store::{connect, ConnectOpts};

    async fn test_pool() -> PgPool {
        let url = std::env::var("PODIUM_TEST_DB_URL")
            .expect("PODIUM_TEST_DB_URL must point at a disposable Postgres database");
        connect(&ConnectOpts::new(url, 5)).await.unwrap()
    }

    fn attendee(internal_user_id: &str) -> Attendee {
        Attendee {
            internal_user_id: internal_user_id.into(),
            full_name: format!("user {internal_user_id}"),
            ..Attendee::default()
        }
    }

    // Event arrives while no row exists; the row shows up within the
    // race window; the handler then marks it running.
    #[tokio::test]
    #[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
    async fn created_event_waits_for_create_forwarding() {
        let pool = test_pool().await;
        let handler = EventHandler::new(pool.clone());

        let id = format!("tenant:{}", uuid());
        let internal = format!("int-{}", uuid());

        let insert_pool = pool.clone();
        let insert_id = id.clone();
        let insert_internal = internal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            MeetingState::new(
                &insert_id,
                Meeting {
                    meeting_id: insert_id.clone(),
                    internal_meeting_id: insert_internal.clone(),
                    ..Meeting::default()
                },
            )
            .with_internal_id(&insert_internal)
            .insert(&insert_pool)
            .await
            .unwrap();
        });

        handler
            .dispatch(&Event::MeetingCreated {
                internal_meeting_id: internal.clone(),
                meeting_id: id.clone(),
            })
            .await
            .unwrap();

        let state = meeting_state::get_meeting_state_by_internal_id(&pool, &internal)
            .await
            .unwrap()
            .unwrap();
        assert!(state.meeting.0.running);

        meeting_state::delete_meeting_state(&pool, &id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
    async fn join_and_leave_events_are_idempotent() {
        let pool = test_pool().await;
        let handler = EventHandler::new(pool.clone());

        let id = format!("tenant:{}", uuid());
        let internal = format!("int-{}", uuid());
        MeetingState::new(
            &id,
            Meeting {
                meeting_id: id.clone(),
                internal_meeting_id: internal.clone(),
                running: true,
                ..Meeting::default()
            },
        )
        .with_internal_id(&internal)
        .insert(&pool)
        .await
        .unwrap();

        let joined = Event::UserJoinedMeeting {
            internal_meeting_id: internal.clone(),
            attendee: attendee("w_1"),
        };
        // At-least-once delivery: applying the same join twice keeps a
        // single attendee.
        handler.dispatch(&joined).await.unwrap();
        handler.dispatch(&joined).await.unwrap();

        let state = meeting_state::get_meeting_state_by_internal_id(&pool, &internal)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.meeting.0.attendees.attendee.len(), 1);

        let left = Event::UserLeftMeeting {
            internal_meeting_id: internal.clone(),
            internal_user_id: "w_1".into(),
        };
        handler.dispatch(&left).await.unwrap();
        handler.dispatch(&left).await.unwrap();

        let state = meeting_state::get_meeting_state_by_internal_id(&pool, &internal)
            .await
            .unwrap()
            .unwrap();
        assert!(state.meeting.0.attendees.attendee.is_empty());

        meeting_state::delete_meeting_state(&pool, &id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a Postgres database (PODIUM_TEST_DB_URL)"]
    async fn destroyed_event_deletes_the_row() {
        let pool = test_pool().await;
        let handler = EventHandler::new(pool.clone());

        let id = format!("tenant:{}", uuid());
        let internal = format!("int-{}", uuid());
        MeetingState::new(&id, Meeting::default())
            .with_internal_id(&internal)
            .insert(&pool)
            .await
            .unwrap();

        handler
            .dispatch(&Event::MeetingDestroyed {
                internal_meeting_id: internal.clone(),
            })
            .await
            .unwrap();

        assert!(
            meeting_state::get_meeting_state_by_internal_id(&pool, &internal)
                .await
                .unwrap()
                .is_none()
        );
    }

    fn uuid() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
