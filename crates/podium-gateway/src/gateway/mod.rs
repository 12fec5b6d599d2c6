//! The request pipeline.
//!
//! Every tenant request runs the same fixed stage order: authenticate,
//! rewrite the meeting id into its globally unique form, bind the meeting
//! to its frontend, inject the default presentation, dispatch to a
//! resource handler, and un-rewrite ids on the way out. Any stage may
//! short-circuit with a [`GatewayError`].

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use podium_core::bbb::request::{is_idempotent, resources, Request};
use podium_core::bbb::response::{
    GetRecordingsResponse, Recording, Response, TextTrack, XmlResponse,
    GetRecordingTextTracksResponse, RET_SUCCESS,
};
use podium_core::bbb::{Client, Params};
use podium_store::command_queue::{CommandQueue, DEFAULT_COMMAND_TTL};
use podium_store::frontend_state::{self, FrontendState};
use podium_store::meeting_state;

use crate::cluster::{commands, Backend};
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::router::{Router, RoutingRequest};
use crate::templates;

/// A parsed tenant request, as handed over by the HTTP edge.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub frontend_key: String,
    pub resource: String,
    pub params: Params,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
    /// Best-effort client address for the audit log.
    pub client_addr: Option<String>,
}

/// What the HTTP edge writes back, verbatim.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Meeting ids are unique per tenant, not globally. The gateway stores and
/// forwards the `frontend_key:meetingID` form; the rewrite is deterministic
/// and reversible.
pub fn rewrite_meeting_id(frontend_key: &str, meeting_id: &str) -> String {
    let prefix = format!("{frontend_key}:");
    if meeting_id.starts_with(&prefix) {
        meeting_id.to_string()
    } else {
        format!("{prefix}{meeting_id}")
    }
}

/// Inverse of [`rewrite_meeting_id`].
pub fn strip_meeting_id(frontend_key: &str, meeting_id: &str) -> String {
    let prefix = format!("{frontend_key}:");
    meeting_id
        .strip_prefix(&prefix)
        .unwrap_or(meeting_id)
        .to_string()
}

/// The request gateway.
pub struct Gateway {
    pool: PgPool,
    client: Client,
    router: Router,
    queue: CommandQueue,
    metrics: Arc<Metrics>,
}

impl Gateway {
    pub fn new(pool: PgPool, client: Client, router: Router, metrics: Arc<Metrics>) -> Self {
        let queue = CommandQueue::new(pool.clone());
        Self {
            pool,
            client,
            router,
            queue,
            metrics,
        }
    }

    /// Run a request through the pipeline, turning errors into wire
    /// responses.
    pub async fn dispatch(&self, req: GatewayRequest) -> GatewayResponse {
        Metrics::inc(&self.metrics.requests);
        match self.handle(req).await {
            Ok(res) => res,
            Err(err) => error_response(&err),
        }
    }

    async fn handle(&self, req: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        // Authenticate against the tenant frontend.
        let frontend = frontend_state::get_frontend_state_by_key(&self.pool, &req.frontend_key)
            .await?
            .ok_or_else(|| {
                Metrics::inc(&self.metrics.auth_failures);
                warn!(
                    frontend = %req.frontend_key,
                    client = req.client_addr.as_deref().unwrap_or("-"),
                    "request for unknown frontend key"
                );
                GatewayError::AuthFailed
            })?;

        let mut breq = Request::new(req.resource.clone(), req.params);
        if let (Some(body), Some(content_type)) = (req.body, req.content_type) {
            breq = breq.with_body(body, content_type);
        }

        if let Err(err) = breq.verify(&frontend.secret) {
            Metrics::inc(&self.metrics.auth_failures);
            warn!(
                frontend = %frontend.key,
                resource = %breq.resource,
                client = req.client_addr.as_deref().unwrap_or("-"),
                error = %err,
                "checksum verification failed"
            );
            return Err(GatewayError::AuthFailed);
        }

        // Rewrite the tenant meeting id into its globally unique form.
        if let Some(meeting_id) = breq.params.meeting_id().map(str::to_string) {
            let unique = rewrite_meeting_id(&frontend.key, &meeting_id);
            breq.params
                .set(podium_core::bbb::params::PARAM_MEETING_ID, unique);
        }

        // Bind the meeting to the authenticated frontend.
        self.bind_meeting_frontend(&frontend, breq.params.meeting_id())
            .await?;

        // Inject the frontend's default presentation into `create`.
        self.set_default_presentation(&frontend, &mut breq);

        // Resource-specific handling.
        let mut response = match breq.resource.as_str() {
            resources::CREATE
            | resources::JOIN
            | resources::IS_MEETING_RUNNING
            | resources::END
            | resources::GET_MEETING_INFO
            | resources::GET_MEETINGS
            | resources::GET_DEFAULT_CONFIG_XML
            | resources::SET_CONFIG_XML => self.dispatch_meeting(&frontend, &breq).await?,

            resources::GET_RECORDINGS
            | resources::PUBLISH_RECORDINGS
            | resources::DELETE_RECORDINGS
            | resources::UPDATE_RECORDINGS
            | resources::GET_RECORDING_TEXT_TRACKS
            | resources::PUT_RECORDING_TEXT_TRACK => {
                self.dispatch_recordings(&frontend, &breq).await?
            }

            other => {
                debug!(resource = other, "unsupported resource");
                Response::End(XmlResponse::failed(
                    "unsupportedRequest",
                    format!("{other} is not supported"),
                ))
            }
        };

        // Give the tenant back its own meeting ids.
        strip_response_meeting_ids(&mut response, &frontend.key);

        let status = response.status();
        let headers = response.headers().to_vec();
        let (body, content_type) = response.marshal()?;
        Ok(GatewayResponse {
            status,
            content_type,
            headers,
            body,
        })
    }

    /// Route a meeting resource and forward to the chosen backend. One
    /// alternate candidate is tried for idempotent resources only.
    async fn dispatch_meeting(
        &self,
        frontend: &FrontendState,
        req: &Request,
    ) -> Result<Response, GatewayError> {
        let routing = RoutingRequest {
            frontend: frontend.clone(),
            resource: req.resource.clone(),
            meeting_id: req.params.meeting_id().map(str::to_string),
        };
        let candidates = self.router.select(&routing).await?;
        if candidates.is_empty() {
            return Err(GatewayError::NoBackendAvailable);
        }

        let attempts = if is_idempotent(&req.resource) { 2 } else { 1 };
        let mut last_err = None;

        for state in candidates.into_iter().take(attempts) {
            let backend = Backend::new(self.pool.clone(), self.client.clone(), state);
            let backend_id = backend.id();
            match backend.handle(frontend, req).await {
                Ok(res) => {
                    Metrics::inc(&self.metrics.forwarded);
                    return Ok(res);
                }
                Err(err) if err.degrades_backend() => {
                    Metrics::inc(&self.metrics.upstream_errors);
                    self.degrade_backend(backend_id, &err).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or(GatewayError::NoBackendAvailable))
    }

    /// Recordings live on the node that recorded them, so reads fan out to
    /// every serviceable backend and merge; mutations must succeed on all.
    async fn dispatch_recordings(
        &self,
        frontend: &FrontendState,
        req: &Request,
    ) -> Result<Response, GatewayError> {
        let routing = RoutingRequest {
            frontend: frontend.clone(),
            resource: req.resource.clone(),
            meeting_id: None,
        };
        let candidates = self.router.select(&routing).await?;
        if candidates.is_empty() {
            return Err(GatewayError::NoBackendAvailable);
        }

        match req.resource.as_str() {
            resources::GET_RECORDINGS => self.merge_recordings(candidates, req).await,
            resources::GET_RECORDING_TEXT_TRACKS => self.merge_text_tracks(candidates, req).await,
            resources::PUBLISH_RECORDINGS
            | resources::DELETE_RECORDINGS
            | resources::UPDATE_RECORDINGS => self.mutate_recordings(candidates, req).await,
            // putRecordingTextTrack carries a body; send it to the best
            // candidate only.
            _ => {
                let Some(state) = candidates.into_iter().next() else {
                    return Err(GatewayError::NoBackendAvailable);
                };
                let backend = Backend::new(self.pool.clone(), self.client.clone(), state);
                let res = backend.passthrough(req).await?;
                Metrics::inc(&self.metrics.forwarded);
                Ok(res)
            }
        }
    }

    async fn merge_recordings(
        &self,
        candidates: Vec<podium_store::BackendState>,
        req: &Request,
    ) -> Result<Response, GatewayError> {
        let mut recordings: Vec<Recording> = Vec::new();
        let mut last_err = None;
        let mut successes = 0;

        for state in candidates {
            let backend = Backend::new(self.pool.clone(), self.client.clone(), state);
            let backend_id = backend.id();
            match backend.passthrough(req).await {
                Ok(Response::GetRecordings(res)) if res.returncode == RET_SUCCESS => {
                    successes += 1;
                    recordings.extend(res.recordings.recording);
                }
                Ok(_) => {}
                Err(err) if err.degrades_backend() => {
                    self.degrade_backend(backend_id, &err).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        if successes == 0 {
            if let Some(err) = last_err {
                return Err(err);
            }
        }

        Metrics::inc(&self.metrics.forwarded);
        Ok(Response::GetRecordings(GetRecordingsResponse {
            returncode: RET_SUCCESS.into(),
            message: None,
            message_key: None,
            recordings: podium_core::bbb::response::Recordings {
                recording: recordings,
            },
        }))
    }

    async fn merge_text_tracks(
        &self,
        candidates: Vec<podium_store::BackendState>,
        req: &Request,
    ) -> Result<Response, GatewayError> {
        let mut tracks: Vec<TextTrack> = Vec::new();
        let mut last_err = None;
        let mut successes = 0;

        for state in candidates {
            let backend = Backend::new(self.pool.clone(), self.client.clone(), state);
            let backend_id = backend.id();
            match backend.passthrough(req).await {
                Ok(Response::GetRecordingTextTracks(res)) if res.returncode == RET_SUCCESS => {
                    successes += 1;
                    tracks.extend(res.tracks);
                }
                Ok(_) => {}
                Err(err) if err.degrades_backend() => {
                    self.degrade_backend(backend_id, &err).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        if successes == 0 {
            if let Some(err) = last_err {
                return Err(err);
            }
        }

        Metrics::inc(&self.metrics.forwarded);
        Ok(Response::GetRecordingTextTracks(
            GetRecordingTextTracksResponse {
                returncode: RET_SUCCESS.into(),
                message_key: None,
                message: None,
                tracks,
            },
        ))
    }

    /// publish/delete/updateRecordings fan out to every backend; the first
    /// refusal or failure is surfaced verbatim.
    async fn mutate_recordings(
        &self,
        candidates: Vec<podium_store::BackendState>,
        req: &Request,
    ) -> Result<Response, GatewayError> {
        let mut merged: Option<Response> = None;

        for state in candidates {
            let backend = Backend::new(self.pool.clone(), self.client.clone(), state);
            let backend_id = backend.id();
            match backend.passthrough(req).await {
                Ok(res) if res.is_success() => {
                    merged.get_or_insert(res);
                }
                Ok(refused) => return Ok(refused),
                Err(err) if err.degrades_backend() => {
                    self.degrade_backend(backend_id, &err).await;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }

        Metrics::inc(&self.metrics.forwarded);
        Ok(merged.unwrap_or_else(|| Response::End(XmlResponse::success())))
    }

    /// Forwarding failures never mutate backend rows inline: the node is
    /// degraded through a queued command processed by a controller.
    async fn degrade_backend(&self, backend_id: Uuid, err: &GatewayError) {
        let params = serde_json::json!({
            "id": backend_id,
            "error": err.to_string(),
        });
        if let Err(queue_err) = self
            .queue
            .enqueue(commands::MARK_BACKEND_DEGRADED, params, DEFAULT_COMMAND_TTL)
            .await
        {
            warn!(backend = %backend_id, error = %queue_err, "failed to queue degrade command");
        }
    }

    async fn bind_meeting_frontend(
        &self,
        frontend: &FrontendState,
        meeting_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        let Some(meeting_id) = meeting_id else {
            return Ok(());
        };
        let Some(meeting) = meeting_state::get_meeting_state_by_id(&self.pool, meeting_id).await?
        else {
            return Ok(());
        };

        match meeting.frontend_id {
            Some(owner) if owner != frontend.id => Err(GatewayError::Conflict),
            Some(_) => Ok(()),
            None => {
                meeting_state::bind_meeting_frontend(&self.pool, meeting_id, frontend.id).await?;
                Ok(())
            }
        }
    }

    fn set_default_presentation(&self, frontend: &FrontendState, req: &mut Request) {
        if req.resource != resources::CREATE {
            return;
        }
        let Some(presentation) = &frontend.settings.0.default_presentation else {
            return;
        };
        if presentation.url.is_empty() {
            return;
        }
        if req.has_body() && !presentation.force {
            return;
        }

        let filename = presentation
            .url
            .rsplit('/')
            .next()
            .unwrap_or("presentation");
        let body = templates::default_presentation_body(&presentation.url, filename);
        req.body = Some(body.into_bytes());
        req.content_type = Some("application/xml".to_string());
    }
}

/// Un-rewrite meeting ids in outgoing payloads.
fn strip_response_meeting_ids(response: &mut Response, frontend_key: &str) {
    match response {
        Response::Create(res) | Response::GetMeetingInfo(res) => {
            res.meeting_id = strip_meeting_id(frontend_key, &res.meeting_id);
        }
        Response::GetMeetings(res) => {
            for meeting in &mut res.meetings.meeting {
                meeting.meeting_id = strip_meeting_id(frontend_key, &meeting.meeting_id);
            }
        }
        Response::GetRecordings(res) => {
            for recording in &mut res.recordings.recording {
                recording.meeting_id = strip_meeting_id(frontend_key, &recording.meeting_id);
            }
        }
        _ => {}
    }
}

/// Render an error as a wire response. Upstream errors are surfaced
/// verbatim when a body is available.
fn error_response(err: &GatewayError) -> GatewayResponse {
    if let GatewayError::Upstream { status, body } = err {
        if *status != 0 && !body.is_empty() {
            return GatewayResponse {
                status: *status,
                content_type: "application/xml".to_string(),
                headers: Vec::new(),
                body: body.clone(),
            };
        }
    }

    if matches!(err, GatewayError::MeetingNotFound) {
        return GatewayResponse {
            status: err.status(),
            content_type: "text/html".to_string(),
            headers: Vec::new(),
            body: templates::meeting_not_found().into_bytes(),
        };
    }

    let payload = Response::End(XmlResponse::failed(err.message_key(), err.to_string()));
    let (body, content_type) = payload
        .marshal()
        .unwrap_or_else(|_| (Vec::new(), "application/xml".to_string()));
    GatewayResponse {
        status: err.status(),
        content_type,
        headers: Vec::new(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meeting_id_rewrite_round_trips() {
        let unique = rewrite_meeting_id("tenant-a", "room1");
        assert_eq!(unique, "tenant-a:room1");
        assert_eq!(strip_meeting_id("tenant-a", &unique), "room1");
    }

    #[test]
    fn rewrite_is_idempotent() {
        let once = rewrite_meeting_id("tenant-a", "room1");
        let twice = rewrite_meeting_id("tenant-a", &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn strip_leaves_foreign_ids_alone() {
        assert_eq!(strip_meeting_id("tenant-a", "tenant-b:room1"), "tenant-b:room1");
        assert_eq!(strip_meeting_id("tenant-a", "room1"), "room1");
    }

    #[test]
    fn error_response_carries_message_key() {
        let res = error_response(&GatewayError::NoBackendAvailable);
        assert_eq!(res.status, 503);
        let body = String::from_utf8(res.body).unwrap();
        assert!(body.contains("noBackendAvailable"));
        assert!(body.contains("FAILED"));
    }

    #[test]
    fn upstream_error_is_surfaced_verbatim() {
        let res = error_response(&GatewayError::Upstream {
            status: 502,
            body: b"<html>bad gateway</html>".to_vec(),
        });
        assert_eq!(res.status, 502);
        assert_eq!(res.body, b"<html>bad gateway</html>");
    }

    #[test]
    fn strip_rewrites_meeting_lists() {
        use podium_core::bbb::response::{GetMeetingsResponse, Meeting, Meetings};

        let mut response = Response::GetMeetings(GetMeetingsResponse {
            returncode: RET_SUCCESS.into(),
            message: None,
            message_key: None,
            meetings: Meetings {
                meeting: vec![Meeting {
                    meeting_id: "tenant-a:room1".into(),
                    ..Meeting::default()
                }],
            },
        });
        strip_response_meeting_ids(&mut response, "tenant-a");

        let Response::GetMeetings(res) = response else {
            unreachable!();
        };
        assert_eq!(res.meetings.meeting[0].meeting_id, "room1");
    }
}
