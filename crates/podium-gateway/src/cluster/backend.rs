//! Backend agents.
//!
//! One agent per backend row, owned by the controller. The agent loops keep
//! `node_state`, `latency_ms` and the meeting replica current; the same
//! type also carries the per-request operation surface the gateway uses to
//! forward, so the replica bookkeeping lives next to the forwarding code.

use std::time::{Duration, Instant};

use rand::Rng;
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use podium_core::bbb;
use podium_core::bbb::params::PARAM_MEETING_ID;
use podium_core::bbb::request::{resources, Request};
use podium_core::bbb::response::{
    GetMeetingsResponse, MeetingResponse, Meetings, RawResponse, Response, CONTENT_TYPE_HTML,
    RET_SUCCESS,
};
use podium_core::bbb::{Client, Params};
use podium_store::backend_state::{self, AdminState, BackendState, NodeState};
use podium_store::command_queue::{CommandQueue, DEFAULT_COMMAND_TTL};
use podium_store::meeting_state::{self, MeetingState};
use podium_store::{with_tx_retry, FrontendState, Query, StoreError};

use super::commands;
use crate::error::GatewayError;
use crate::templates;

/// A meeting id no backend can ever know. Probing with it exercises auth,
/// routing and the XML encoder of the node without side effects.
pub const PROBE_MEETING_ID: &str = "00000000-0000-0000-0000-000000000001";

const PROBE_PERIOD: Duration = Duration::from_secs(10);
const SYNC_PERIOD: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(20);

/// A conferencing node in the cluster.
pub struct Backend {
    pool: PgPool,
    client: Client,
    state: BackendState,
    queue: CommandQueue,

    // Agent-private probe counters.
    probes_ok: u64,
    probes_failed: u64,
}

impl Backend {
    pub fn new(pool: PgPool, client: Client, state: BackendState) -> Self {
        let queue = CommandQueue::new(pool.clone());
        Self {
            pool,
            client,
            state,
            queue,
            probes_ok: 0,
            probes_failed: 0,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.state.id
    }

    pub fn state(&self) -> &BackendState {
        &self.state
    }

    fn wire(&self) -> bbb::Backend {
        bbb::Backend::new(self.state.host.clone(), self.state.secret.clone())
    }

    // =====================================================================
    // Agent loops
    // =====================================================================

    /// Run the periodic duties until shutdown: liveness probe and meeting
    /// sync, with independent jittered periods.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..2000));
        let start = tokio::time::Instant::now() + jitter;
        let mut probe = tokio::time::interval_at(start, PROBE_PERIOD);
        let mut sync = tokio::time::interval_at(start + Duration::from_secs(3), SYNC_PERIOD);
        probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(backend = %self.state.id, host = %self.state.host, "backend agent started");

        loop {
            tokio::select! {
                _ = probe.tick() => {
                    if let Err(err) = self.load_node_state().await {
                        warn!(backend = %self.state.id, error = %err, "node state sync failed");
                    }
                }
                _ = sync.tick() => {
                    if let Err(err) = self.sync_meetings().await {
                        warn!(backend = %self.state.id, error = %err, "meeting sync failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(
            backend = %self.state.id,
            probes_ok = self.probes_ok,
            probes_failed = self.probes_failed,
            "backend agent stopped"
        );
    }

    /// Liveness probe: ask for a meeting the node can never know and
    /// measure how long it takes to say no.
    async fn load_node_state(&mut self) -> Result<(), GatewayError> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        self.state.refresh(&mut conn).await?;

        if matches!(
            self.state.admin_state,
            AdminState::Stopped | AdminState::Decommissioned
        ) {
            if self.state.node_state != NodeState::Stopped {
                backend_state::update_node_health(
                    &mut *conn,
                    self.state.id,
                    NodeState::Stopped,
                    self.state.latency_ms,
                    None,
                )
                .await?;
                self.state.node_state = NodeState::Stopped;
            }
            return Ok(());
        }

        let req = Request::new(
            resources::IS_MEETING_RUNNING,
            Params::from([(PARAM_MEETING_ID, PROBE_MEETING_ID)]),
        );

        let started = Instant::now();
        let outcome = self
            .client
            .execute(&self.wire(), &req, Some(PROBE_TIMEOUT))
            .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let (next, last_error) = match outcome {
            Ok(res) if res.is_success() => (NodeState::Ready, None),
            Ok(res) => {
                let message = match &res {
                    Response::IsMeetingRunning(r) => format!(
                        "{}: {}",
                        r.message_key.as_deref().unwrap_or("unknown"),
                        r.message.as_deref().unwrap_or("probe refused")
                    ),
                    _ => "unexpected probe response".to_string(),
                };
                (NodeState::Error, Some(message))
            }
            Err(err) => (NodeState::Error, Some(err.to_string())),
        };

        if next == NodeState::Ready {
            self.probes_ok += 1;
        } else {
            self.probes_failed += 1;
        }

        if next != self.state.node_state {
            info!(
                backend = %self.state.id,
                from = self.state.node_state.as_str(),
                to = next.as_str(),
                "node state changed"
            );
        }

        backend_state::update_node_health(
            &mut *conn,
            self.state.id,
            next,
            Some(latency_ms),
            last_error.as_deref(),
        )
        .await?;
        self.state.node_state = next;
        Ok(())
    }

    /// Meeting sync: fetch the node's meeting list and diff it against the
    /// replica, keyed by internal meeting id, in one transaction.
    async fn sync_meetings(&mut self) -> Result<(), GatewayError> {
        {
            let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
            self.state.refresh(&mut conn).await?;
        }
        if self.state.node_state != NodeState::Ready {
            return Ok(());
        }

        let req = Request::new(resources::GET_MEETINGS, Params::new());
        let res = self
            .client
            .execute(&self.wire(), &req, Some(UPSTREAM_TIMEOUT))
            .await?;
        let Response::GetMeetings(list) = res else {
            return Err(GatewayError::UpstreamUnreadable(
                "getMeetings: unexpected payload".into(),
            ));
        };
        if list.returncode != RET_SUCCESS {
            return Err(GatewayError::UpstreamUnreadable(format!(
                "getMeetings refused: {}",
                list.message.as_deref().unwrap_or("no message")
            )));
        }

        let meetings = list.meetings.meeting;
        let backend_id = self.state.id;
        let meetings_count = meetings.len();

        with_tx_retry(&self.pool, move |tx| {
            let meetings = meetings.clone();
            Box::pin(async move {
                let mut present = Vec::with_capacity(meetings.len());
                for meeting in &meetings {
                    if meeting.internal_meeting_id.is_empty() {
                        continue;
                    }
                    present.push(meeting.internal_meeting_id.clone());
                    MeetingState::new(meeting.meeting_id.clone(), meeting.clone())
                        .with_internal_id(meeting.internal_meeting_id.clone())
                        .with_backend(backend_id)
                        .save(&mut *tx)
                        .await?;
                }
                meeting_state::delete_absent_for_backend(&mut *tx, backend_id, &present).await?;
                backend_state::update_synced_at(&mut *tx, backend_id).await?;
                Ok(())
            })
        })
        .await?;

        debug!(backend = %backend_id, meetings = meetings_count, "meeting sync complete");
        Ok(())
    }

    // =====================================================================
    // Operation surface
    // =====================================================================

    /// Dispatch a forwarded request by resource.
    pub async fn handle(
        &self,
        frontend: &FrontendState,
        req: &Request,
    ) -> Result<Response, GatewayError> {
        match req.resource.as_str() {
            resources::CREATE => self.create(frontend, req).await,
            resources::JOIN => self.join(frontend, req).await,
            resources::IS_MEETING_RUNNING => self.is_meeting_running(req).await,
            resources::END => self.end(req).await,
            resources::GET_MEETING_INFO => self.get_meeting_info(req).await,
            resources::GET_MEETINGS => self.get_meetings(frontend).await,
            _ => self.passthrough(req).await,
        }
    }

    /// Create a meeting. When the replica already knows a running meeting
    /// under this id, answer from the replica instead of re-creating.
    async fn create(
        &self,
        frontend: &FrontendState,
        req: &Request,
    ) -> Result<Response, GatewayError> {
        let meeting_id = req
            .params
            .meeting_id()
            .ok_or(GatewayError::MissingParam("meetingID"))?;

        if let Some(existing) =
            meeting_state::get_meeting_state_by_id(&self.pool, meeting_id).await?
        {
            let probe = Request::new(
                resources::IS_MEETING_RUNNING,
                Params::from([(PARAM_MEETING_ID, meeting_id)]),
            );
            if let Ok(res) = self
                .client
                .execute(&self.wire(), &probe, Some(UPSTREAM_TIMEOUT))
                .await
            {
                if res.is_success() {
                    return Ok(Response::Create(MeetingResponse::success_from_meeting(
                        existing.meeting.0,
                    )));
                }
            }
        }

        let res = self
            .client
            .execute(&self.wire(), req, Some(UPSTREAM_TIMEOUT))
            .await?;

        if let Response::Create(create) = &res {
            if create.returncode == RET_SUCCESS && !create.internal_meeting_id.is_empty() {
                MeetingState::new(meeting_id, create.meeting())
                    .with_internal_id(create.internal_meeting_id.clone())
                    .with_frontend(frontend.id)
                    .with_backend(self.state.id)
                    .save(&self.pool)
                    .await?;
            }
        }

        Ok(res)
    }

    /// Join is handled entirely by the client's browser: session cookies
    /// prevent proxying the node's response, so we answer with a redirect
    /// to the signed backend URL plus an HTML fallback, and queue a replica
    /// refresh for the membership change.
    async fn join(
        &self,
        frontend: &FrontendState,
        req: &Request,
    ) -> Result<Response, GatewayError> {
        let meeting_id = req
            .params
            .meeting_id()
            .ok_or(GatewayError::MissingParam("meetingID"))?;

        let Some(meeting) =
            meeting_state::get_meeting_state_by_id(&self.pool, meeting_id).await?
        else {
            return Ok(Response::Raw(RawResponse::new(
                404,
                CONTENT_TYPE_HTML,
                templates::meeting_not_found().into_bytes(),
            )));
        };

        // The meeting is tracked but not placed on this node: either the
        // create is still settling, or its home backend dropped out of the
        // candidate set. A redirect would land on a node that refuses the
        // join, so hand the browser a page that retries the gateway URL.
        if meeting.backend_id != Some(self.state.id) {
            return Ok(Response::Raw(RawResponse::new(
                200,
                CONTENT_TYPE_HTML,
                templates::retry_join(&tenant_join_url(frontend, req)).into_bytes(),
            )));
        }

        let url = req.url(&self.wire());

        self.queue
            .enqueue(
                commands::UPDATE_MEETING_STATE,
                serde_json::json!({ "id": meeting_id }),
                DEFAULT_COMMAND_TTL,
            )
            .await?;

        Ok(Response::Raw(
            RawResponse::new(
                302,
                CONTENT_TYPE_HTML,
                templates::redirect(&url).into_bytes(),
            )
            .with_header("location", url),
        ))
    }

    /// Forward `isMeetingRunning`. A refusal means the node no longer
    /// knows the meeting, so the replica row is pruned.
    async fn is_meeting_running(&self, req: &Request) -> Result<Response, GatewayError> {
        let res = self
            .client
            .execute(&self.wire(), req, Some(UPSTREAM_TIMEOUT))
            .await?;

        if !res.is_success() {
            if let Some(meeting_id) = req.params.meeting_id() {
                meeting_state::delete_meeting_state(&self.pool, meeting_id).await?;
            }
        }

        Ok(res)
    }

    /// Forward `end` and drop the replica row once the node confirmed.
    async fn end(&self, req: &Request) -> Result<Response, GatewayError> {
        let res = self
            .client
            .execute(&self.wire(), req, Some(UPSTREAM_TIMEOUT))
            .await?;

        if res.is_success() {
            if let Some(meeting_id) = req.params.meeting_id() {
                meeting_state::delete_meeting_state(&self.pool, meeting_id).await?;
            }
        }

        Ok(res)
    }

    /// Forward `getMeetingInfo` and refresh the replica snapshot.
    pub async fn get_meeting_info(&self, req: &Request) -> Result<Response, GatewayError> {
        let res = self
            .client
            .execute(&self.wire(), req, Some(UPSTREAM_TIMEOUT))
            .await?;

        if let Response::GetMeetingInfo(info) = &res {
            if info.returncode == RET_SUCCESS {
                if let Some(meeting_id) = req.params.meeting_id() {
                    if let Err(err) = self.store_meeting_snapshot(meeting_id, info).await {
                        // The response is still good for the caller.
                        warn!(meeting = meeting_id, error = %err, "snapshot update failed");
                    }
                }
            }
        }

        Ok(res)
    }

    async fn store_meeting_snapshot(
        &self,
        meeting_id: &str,
        info: &MeetingResponse,
    ) -> Result<(), GatewayError> {
        let Some(mut existing) =
            meeting_state::get_meeting_state_by_id(&self.pool, meeting_id).await?
        else {
            debug!(meeting = meeting_id, "meeting not in replica, skipping snapshot");
            return Ok(());
        };
        existing.meeting = Json(info.meeting());
        existing.save(&self.pool).await?;
        Ok(())
    }

    /// `getMeetings` is answered from the replica, scoped to the
    /// requesting frontend. No backend sees another tenant's list.
    async fn get_meetings(&self, frontend: &FrontendState) -> Result<Response, GatewayError> {
        let q = Query::new().eq("meetings.frontend_id", frontend.id);
        let states = meeting_state::get_meeting_states(&self.pool, &q).await?;

        Ok(Response::GetMeetings(GetMeetingsResponse {
            returncode: RET_SUCCESS.into(),
            message: None,
            message_key: None,
            meetings: Meetings {
                meeting: states.into_iter().map(|s| s.meeting.0).collect(),
            },
        }))
    }

    /// Plain signed forwarding for resources without replica bookkeeping
    /// (recordings, config XML, text tracks).
    pub async fn passthrough(&self, req: &Request) -> Result<Response, GatewayError> {
        Ok(self
            .client
            .execute(&self.wire(), req, Some(UPSTREAM_TIMEOUT))
            .await?)
    }
}

/// The tenant-facing URL of a join request, suitable for a retry page.
/// The tenant's own checksum is still in the parameter map, so restoring
/// the un-prefixed meeting id reproduces the URL the client asked for.
fn tenant_join_url(frontend: &FrontendState, req: &Request) -> String {
    let mut params = req.params.clone();
    if let Some(meeting_id) = params.meeting_id().map(str::to_string) {
        params.set(
            PARAM_MEETING_ID,
            crate::gateway::strip_meeting_id(&frontend.key, &meeting_id),
        );
    }
    let checksum = params.checksum().unwrap_or_default().to_string();
    format!(
        "/bbb/{}/{}?{}&checksum={}",
        frontend.key,
        req.resource,
        params.canonical(),
        checksum
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_join_url_restores_the_original_request() {
        let frontend = FrontendState::new("tenant-a", "fe-secret");
        let req = Request::new(
            resources::JOIN,
            Params::from([
                ("meetingID", "tenant-a:room1"),
                ("fullName", "Alice"),
                ("checksum", "cafe0000"),
            ]),
        );

        assert_eq!(
            tenant_join_url(&frontend, &req),
            "/bbb/tenant-a/join?fullName=Alice&meetingID=room1&checksum=cafe0000"
        );
    }
}
