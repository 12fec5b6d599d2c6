//! BBB API requests.

use serde::{Deserialize, Serialize};

use super::params::Params;
use super::signing::{self, ChecksumError};

/// API resource names.
pub mod resources {
    pub const CREATE: &str = "create";
    pub const JOIN: &str = "join";
    pub const IS_MEETING_RUNNING: &str = "isMeetingRunning";
    pub const END: &str = "end";
    pub const GET_MEETING_INFO: &str = "getMeetingInfo";
    pub const GET_MEETINGS: &str = "getMeetings";
    pub const GET_RECORDINGS: &str = "getRecordings";
    pub const PUBLISH_RECORDINGS: &str = "publishRecordings";
    pub const DELETE_RECORDINGS: &str = "deleteRecordings";
    pub const UPDATE_RECORDINGS: &str = "updateRecordings";
    pub const GET_DEFAULT_CONFIG_XML: &str = "getDefaultConfigXML";
    pub const SET_CONFIG_XML: &str = "setConfigXML";
    pub const GET_RECORDING_TEXT_TRACKS: &str = "getRecordingTextTracks";
    pub const PUT_RECORDING_TEXT_TRACK: &str = "putRecordingTextTrack";
}

/// True for resources that are safe to replay against an alternate backend.
pub fn is_idempotent(resource: &str) -> bool {
    matches!(
        resource,
        resources::IS_MEETING_RUNNING
            | resources::GET_MEETINGS
            | resources::GET_RECORDINGS
            | resources::GET_MEETING_INFO
    )
}

/// Address and credentials of an upstream conferencing node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub host: String,
    pub secret: String,
}

impl Backend {
    pub fn new(host: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secret: secret.into(),
        }
    }
}

/// A parsed API request: resource, ordered parameters and an optional body.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub resource: String,
    pub params: Params,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

impl Request {
    pub fn new(resource: impl Into<String>, params: Params) -> Self {
        Self {
            resource: resource.into(),
            params,
            body: None,
            content_type: None,
        }
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: impl Into<String>) -> Self {
        self.body = Some(body);
        self.content_type = Some(content_type.into());
        self
    }

    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// Compute the request checksum with the given secret.
    pub fn sign(&self, secret: &str) -> String {
        signing::checksum(&self.resource, &self.params, secret)
    }

    /// Verify the checksum carried in the request parameters.
    pub fn verify(&self, secret: &str) -> Result<(), ChecksumError> {
        let provided = self.params.checksum().ok_or(ChecksumError::Missing)?;
        signing::verify(&self.resource, &self.params, secret, provided)
    }

    /// The full signed URL against a backend.
    pub fn url(&self, backend: &Backend) -> String {
        let sep = if backend.host.ends_with('/') { "" } else { "/" };
        let checksum = self.sign(&backend.secret);
        let query = self.params.canonical();
        if query.is_empty() {
            format!("{}{}{}?checksum={}", backend.host, sep, self.resource, checksum)
        } else {
            format!(
                "{}{}{}?{}&checksum={}",
                backend.host, sep, self.resource, query, checksum
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "639259d4-9dd8-4b25-bf01-95f9567eaf4b";

    #[test]
    fn signed_url_with_params() {
        let backend = Backend::new("https://bbbackend", SECRET);
        let req = Request::new(
            resources::CREATE,
            Params::from([
                ("name", "Test Meeting"),
                ("meetingID", "abc123"),
                ("attendeePW", "111222"),
                ("moderatorPW", "333444"),
            ]),
        );

        assert_eq!(
            req.url(&backend),
            "https://bbbackend/create\
             ?attendeePW=111222&meetingID=abc123\
             &moderatorPW=333444&name=Test+Meeting&\
             checksum=94ec9a89c7dc53af01537aef9f8ecbae5e95cd7f37cd4bf18101b976a4a8b097"
        );
    }

    #[test]
    fn signed_url_without_params() {
        let backend = Backend::new("https://bbbackend", SECRET);
        let req = Request::new(resources::CREATE, Params::new());

        assert_eq!(
            req.url(&backend),
            "https://bbbackend/create\
             ?checksum=272c9555258496a3f19c5ad8f599af2a4ebec031381ff1e37b34842c42c12284"
        );
    }

    #[test]
    fn trailing_slash_host_is_not_doubled() {
        let backend = Backend::new("https://node/bigbluebutton/api/", SECRET);
        let req = Request::new(resources::GET_MEETINGS, Params::new());
        assert!(req
            .url(&backend)
            .starts_with("https://node/bigbluebutton/api/getMeetings?"));
    }

    #[test]
    fn verify_round_trip() {
        let mut params = Params::from([("meetingID", "abc123")]);
        let checksum = Request::new(resources::END, params.clone()).sign(SECRET);
        params.set("checksum", checksum);

        let req = Request::new(resources::END, params);
        assert!(req.verify(SECRET).is_ok());
        assert!(req.verify("other-secret").is_err());
    }

    #[test]
    fn verify_requires_checksum_param() {
        let req = Request::new(resources::END, Params::from([("meetingID", "abc123")]));
        assert_eq!(req.verify(SECRET), Err(ChecksumError::Missing));
    }

    #[test]
    fn idempotent_resources() {
        assert!(is_idempotent(resources::GET_MEETING_INFO));
        assert!(is_idempotent(resources::IS_MEETING_RUNNING));
        assert!(!is_idempotent(resources::CREATE));
        assert!(!is_idempotent(resources::END));
    }
}
