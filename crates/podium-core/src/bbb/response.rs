//! Typed BBB API responses.
//!
//! Upstream responses are XML documents rooted at `<response>` with a common
//! `returncode` header and a resource-specific body, except the recording
//! text-track resources which are JSON-wrapped. [`Response`] is the tagged
//! variant the gateway dispatches on; [`Response::unmarshal`] selects the
//! payload type by resource name.
//!
//! The `create` and `getMeetingInfo` documents carry the meeting fields flat
//! inside `<response>`, so [`MeetingResponse`] mirrors that wire layout and
//! converts to and from the nested [`Meeting`] domain type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::request::resources;

/// Success return code.
pub const RET_SUCCESS: &str = "SUCCESS";

/// Failure return code.
pub const RET_FAILED: &str = "FAILED";

/// Free-form `<metadata>` key/value elements.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("XML decode failed: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("XML encode failed: {0}")]
    Xml(#[from] quick_xml::SeError),

    #[error("JSON encode failed: {0}")]
    Json(#[from] serde_json::Error),
}

// =========================================================================
// Domain types
// =========================================================================

/// A meeting participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attendee {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "internalUserID")]
    pub internal_user_id: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub role: String,
    #[serde(rename = "isPresenter")]
    pub is_presenter: bool,
    #[serde(rename = "isListeningOnly")]
    pub is_listening_only: bool,
    #[serde(rename = "hasJoinedVoice")]
    pub has_joined_voice: bool,
    #[serde(rename = "hasVideo")]
    pub has_video: bool,
    #[serde(rename = "clientType")]
    pub client_type: String,
}

/// Wrapper for the `<attendees><attendee/>...</attendees>` nesting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attendees {
    pub attendee: Vec<Attendee>,
}

/// Breakout-room info of a child meeting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Breakout {
    #[serde(rename = "parentMeetingID")]
    pub parent_meeting_id: String,
    pub sequence: i64,
    #[serde(rename = "freeJoin")]
    pub free_join: bool,
}

/// Wrapper for the `<breakoutRooms><breakout/>...</breakoutRooms>` nesting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutRooms {
    pub breakout: Vec<String>,
}

/// The mirrored meeting snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meeting {
    #[serde(rename = "meetingName")]
    pub meeting_name: String,
    #[serde(rename = "meetingID")]
    pub meeting_id: String,
    #[serde(rename = "internalMeetingID")]
    pub internal_meeting_id: String,
    #[serde(rename = "createTime")]
    pub create_time: i64,
    #[serde(rename = "createDate")]
    pub create_date: String,
    #[serde(rename = "voiceBridge")]
    pub voice_bridge: String,
    #[serde(rename = "dialNumber")]
    pub dial_number: String,
    #[serde(rename = "attendeePW")]
    pub attendee_pw: String,
    #[serde(rename = "moderatorPW")]
    pub moderator_pw: String,
    pub running: bool,
    pub duration: i64,
    pub recording: bool,
    #[serde(rename = "hasBeenForciblyEnded")]
    pub has_been_forcibly_ended: bool,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(rename = "endTime")]
    pub end_time: i64,
    #[serde(rename = "participantCount")]
    pub participant_count: i64,
    #[serde(rename = "listenerCount")]
    pub listener_count: i64,
    #[serde(rename = "voiceParticipantCount")]
    pub voice_participant_count: i64,
    #[serde(rename = "videoCount")]
    pub video_count: i64,
    #[serde(rename = "maxUsers")]
    pub max_users: i64,
    #[serde(rename = "moderatorCount")]
    pub moderator_count: i64,
    #[serde(rename = "isBreakout")]
    pub is_breakout: bool,
    pub metadata: Metadata,
    pub attendees: Attendees,
    #[serde(rename = "breakoutRooms")]
    pub breakout_rooms: BreakoutRooms,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakout: Option<Breakout>,
}

impl Meeting {
    /// Insert or replace an attendee. Identity is `internal_user_id`, so
    /// replaying a join event cannot produce duplicates.
    pub fn upsert_attendee(&mut self, attendee: Attendee) {
        self.remove_attendee(&attendee.internal_user_id);
        self.attendees.attendee.push(attendee);
    }

    /// Remove an attendee by `internal_user_id`. Unknown ids are a no-op.
    pub fn remove_attendee(&mut self, internal_user_id: &str) {
        self.attendees
            .attendee
            .retain(|a| a.internal_user_id != internal_user_id);
    }
}

/// A single playback format of a recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Format {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(rename = "processingTime")]
    pub processing_time: i64,
    pub length: i64,
}

/// Wrapper for the `<playback><format/>...</playback>` nesting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Playback {
    pub format: Vec<Format>,
}

/// A recorded meeting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recording {
    #[serde(rename = "recordID")]
    pub record_id: String,
    #[serde(rename = "meetingID")]
    pub meeting_id: String,
    #[serde(rename = "internalMeetingID")]
    pub internal_meeting_id: String,
    pub name: String,
    #[serde(rename = "isBreakout")]
    pub is_breakout: bool,
    pub published: bool,
    pub state: String,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(rename = "endTime")]
    pub end_time: i64,
    pub participants: i64,
    pub metadata: Metadata,
    pub playback: Playback,
}

// =========================================================================
// XML response documents
// =========================================================================

/// Header-only `<response>` document (`end`, errors, refusals).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XmlResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl XmlResponse {
    pub fn success() -> Self {
        Self {
            returncode: RET_SUCCESS.into(),
            ..Self::default()
        }
    }

    pub fn failed(message_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            returncode: RET_FAILED.into(),
            message: Some(message.into()),
            message_key: Some(message_key.into()),
            version: None,
        }
    }
}

/// `<response>` carrying the meeting fields flat (`create`,
/// `getMeetingInfo`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeetingResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "meetingName")]
    pub meeting_name: String,
    #[serde(rename = "meetingID")]
    pub meeting_id: String,
    #[serde(rename = "internalMeetingID")]
    pub internal_meeting_id: String,
    #[serde(rename = "createTime")]
    pub create_time: i64,
    #[serde(rename = "createDate")]
    pub create_date: String,
    #[serde(rename = "voiceBridge")]
    pub voice_bridge: String,
    #[serde(rename = "dialNumber")]
    pub dial_number: String,
    #[serde(rename = "attendeePW")]
    pub attendee_pw: String,
    #[serde(rename = "moderatorPW")]
    pub moderator_pw: String,
    pub running: bool,
    pub duration: i64,
    pub recording: bool,
    #[serde(rename = "hasBeenForciblyEnded")]
    pub has_been_forcibly_ended: bool,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(rename = "endTime")]
    pub end_time: i64,
    #[serde(rename = "participantCount")]
    pub participant_count: i64,
    #[serde(rename = "listenerCount")]
    pub listener_count: i64,
    #[serde(rename = "voiceParticipantCount")]
    pub voice_participant_count: i64,
    #[serde(rename = "videoCount")]
    pub video_count: i64,
    #[serde(rename = "maxUsers")]
    pub max_users: i64,
    #[serde(rename = "moderatorCount")]
    pub moderator_count: i64,
    #[serde(rename = "isBreakout")]
    pub is_breakout: bool,
    pub metadata: Metadata,
    pub attendees: Attendees,
    #[serde(rename = "breakoutRooms")]
    pub breakout_rooms: BreakoutRooms,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakout: Option<Breakout>,
}

impl MeetingResponse {
    /// Build a successful response from a replica meeting snapshot.
    pub fn success_from_meeting(meeting: Meeting) -> Self {
        Self {
            returncode: RET_SUCCESS.into(),
            message: None,
            message_key: None,
            version: None,
            meeting_name: meeting.meeting_name,
            meeting_id: meeting.meeting_id,
            internal_meeting_id: meeting.internal_meeting_id,
            create_time: meeting.create_time,
            create_date: meeting.create_date,
            voice_bridge: meeting.voice_bridge,
            dial_number: meeting.dial_number,
            attendee_pw: meeting.attendee_pw,
            moderator_pw: meeting.moderator_pw,
            running: meeting.running,
            duration: meeting.duration,
            recording: meeting.recording,
            has_been_forcibly_ended: meeting.has_been_forcibly_ended,
            start_time: meeting.start_time,
            end_time: meeting.end_time,
            participant_count: meeting.participant_count,
            listener_count: meeting.listener_count,
            voice_participant_count: meeting.voice_participant_count,
            video_count: meeting.video_count,
            max_users: meeting.max_users,
            moderator_count: meeting.moderator_count,
            is_breakout: meeting.is_breakout,
            metadata: meeting.metadata,
            attendees: meeting.attendees,
            breakout_rooms: meeting.breakout_rooms,
            breakout: meeting.breakout,
        }
    }

    /// Extract the meeting snapshot carried by this response.
    pub fn meeting(&self) -> Meeting {
        Meeting {
            meeting_name: self.meeting_name.clone(),
            meeting_id: self.meeting_id.clone(),
            internal_meeting_id: self.internal_meeting_id.clone(),
            create_time: self.create_time,
            create_date: self.create_date.clone(),
            voice_bridge: self.voice_bridge.clone(),
            dial_number: self.dial_number.clone(),
            attendee_pw: self.attendee_pw.clone(),
            moderator_pw: self.moderator_pw.clone(),
            running: self.running,
            duration: self.duration,
            recording: self.recording,
            has_been_forcibly_ended: self.has_been_forcibly_ended,
            start_time: self.start_time,
            end_time: self.end_time,
            participant_count: self.participant_count,
            listener_count: self.listener_count,
            voice_participant_count: self.voice_participant_count,
            video_count: self.video_count,
            max_users: self.max_users,
            moderator_count: self.moderator_count,
            is_breakout: self.is_breakout,
            metadata: self.metadata.clone(),
            attendees: self.attendees.clone(),
            breakout_rooms: self.breakout_rooms.clone(),
            breakout: self.breakout.clone(),
        }
    }
}

/// `join` response payload. The interesting part is usually the redirect,
/// not this body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    #[serde(rename = "meeting_id")]
    pub meeting_id: String,
    #[serde(rename = "user_id")]
    pub user_id: String,
    #[serde(rename = "auth_token")]
    pub auth_token: String,
    #[serde(rename = "session_token")]
    pub session_token: String,
    pub url: String,
}

/// `isMeetingRunning` response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsMeetingRunningResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    pub running: bool,
}

/// Wrapper for the `<meetings><meeting/>...</meetings>` nesting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meetings {
    pub meeting: Vec<Meeting>,
}

/// `getMeetings` response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetMeetingsResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    pub meetings: Meetings,
}

/// Wrapper for the `<recordings><recording/>...</recordings>` nesting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recordings {
    pub recording: Vec<Recording>,
}

/// `getRecordings` response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetRecordingsResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    pub recordings: Recordings,
}

/// `publishRecordings` response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishRecordingsResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    pub published: bool,
}

/// `deleteRecordings` response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteRecordingsResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    pub deleted: bool,
}

/// `updateRecordings` response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRecordingsResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    pub updated: bool,
}

/// `setConfigXML` response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetConfigXmlResponse {
    pub returncode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    pub token: String,
}

// =========================================================================
// JSON response documents (recording text tracks)
// =========================================================================

/// JSON envelope: `{"response": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonWrapper<T> {
    response: T,
}

/// A caption/subtitle track of a recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextTrack {
    pub href: String,
    pub kind: String,
    pub label: String,
    pub lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// `getRecordingTextTracks` response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetRecordingTextTracksResponse {
    pub returncode: String,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub tracks: Vec<TextTrack>,
}

/// `putRecordingTextTrack` response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PutRecordingTextTrackResponse {
    pub returncode: String,
    #[serde(rename = "messageKey", skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "recordId", skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

// =========================================================================
// Raw and tagged responses
// =========================================================================

/// An opaque response: bytes plus transport metadata. Used for config XML
/// passthrough, redirects and error surfacing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Content types used on the wire.
pub const CONTENT_TYPE_XML: &str = "application/xml";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_HTML: &str = "text/html";

/// A decoded upstream response, tagged by resource family.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Create(MeetingResponse),
    Join(JoinResponse),
    IsMeetingRunning(IsMeetingRunningResponse),
    End(XmlResponse),
    GetMeetingInfo(MeetingResponse),
    GetMeetings(GetMeetingsResponse),
    GetRecordings(GetRecordingsResponse),
    PublishRecordings(PublishRecordingsResponse),
    DeleteRecordings(DeleteRecordingsResponse),
    UpdateRecordings(UpdateRecordingsResponse),
    SetConfigXml(SetConfigXmlResponse),
    GetRecordingTextTracks(GetRecordingTextTracksResponse),
    PutRecordingTextTrack(PutRecordingTextTrackResponse),
    /// Raw passthrough: config XML, redirects, synthesized error bodies.
    Raw(RawResponse),
}

fn from_xml<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    let text = String::from_utf8_lossy(data);
    Ok(quick_xml::de::from_str(&text)?)
}

fn from_json<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    let wrapper: JsonWrapper<T> = serde_json::from_slice(data)?;
    Ok(wrapper.response)
}

impl Response {
    /// Decode wire bytes into the payload type selected by `resource`.
    pub fn unmarshal(resource: &str, data: &[u8]) -> Result<Self, DecodeError> {
        let res = match resource {
            resources::CREATE => Self::Create(from_xml(data)?),
            resources::JOIN => Self::Join(from_xml(data)?),
            resources::IS_MEETING_RUNNING => Self::IsMeetingRunning(from_xml(data)?),
            resources::END => Self::End(from_xml(data)?),
            resources::GET_MEETING_INFO => Self::GetMeetingInfo(from_xml(data)?),
            resources::GET_MEETINGS => Self::GetMeetings(from_xml(data)?),
            resources::GET_RECORDINGS => Self::GetRecordings(from_xml(data)?),
            resources::PUBLISH_RECORDINGS => Self::PublishRecordings(from_xml(data)?),
            resources::DELETE_RECORDINGS => Self::DeleteRecordings(from_xml(data)?),
            resources::UPDATE_RECORDINGS => Self::UpdateRecordings(from_xml(data)?),
            resources::SET_CONFIG_XML => Self::SetConfigXml(from_xml(data)?),
            resources::GET_RECORDING_TEXT_TRACKS => {
                Self::GetRecordingTextTracks(from_json(data)?)
            }
            resources::PUT_RECORDING_TEXT_TRACK => {
                Self::PutRecordingTextTrack(from_json(data)?)
            }
            // getDefaultConfigXML and anything unknown passes through.
            _ => Self::Raw(RawResponse::new(200, CONTENT_TYPE_XML, data.to_vec())),
        };
        Ok(res)
    }

    /// Encode back to wire bytes, returning the body and content type.
    pub fn marshal(&self) -> Result<(Vec<u8>, String), EncodeError> {
        fn xml<T: Serialize>(value: &T) -> Result<(Vec<u8>, String), EncodeError> {
            let body = quick_xml::se::to_string_with_root("response", value)?;
            Ok((body.into_bytes(), CONTENT_TYPE_XML.to_string()))
        }
        fn json<T: Serialize + Clone>(value: &T) -> Result<(Vec<u8>, String), EncodeError> {
            let body = serde_json::to_vec(&JsonWrapper {
                response: value.clone(),
            })?;
            Ok((body, CONTENT_TYPE_JSON.to_string()))
        }

        match self {
            Self::Create(r) | Self::GetMeetingInfo(r) => xml(r),
            Self::Join(r) => xml(r),
            Self::IsMeetingRunning(r) => xml(r),
            Self::End(r) => xml(r),
            Self::GetMeetings(r) => xml(r),
            Self::GetRecordings(r) => xml(r),
            Self::PublishRecordings(r) => xml(r),
            Self::DeleteRecordings(r) => xml(r),
            Self::UpdateRecordings(r) => xml(r),
            Self::SetConfigXml(r) => xml(r),
            Self::GetRecordingTextTracks(r) => json(r),
            Self::PutRecordingTextTrack(r) => json(r),
            Self::Raw(r) => Ok((r.body.clone(), r.content_type.clone())),
        }
    }

    /// The `returncode` header, when the payload carries one.
    pub fn returncode(&self) -> Option<&str> {
        let code = match self {
            Self::Create(r) | Self::GetMeetingInfo(r) => &r.returncode,
            Self::Join(r) => &r.returncode,
            Self::IsMeetingRunning(r) => &r.returncode,
            Self::End(r) => &r.returncode,
            Self::GetMeetings(r) => &r.returncode,
            Self::GetRecordings(r) => &r.returncode,
            Self::PublishRecordings(r) => &r.returncode,
            Self::DeleteRecordings(r) => &r.returncode,
            Self::UpdateRecordings(r) => &r.returncode,
            Self::SetConfigXml(r) => &r.returncode,
            Self::GetRecordingTextTracks(r) => &r.returncode,
            Self::PutRecordingTextTrack(r) => &r.returncode,
            Self::Raw(_) => return None,
        };
        Some(code.as_str())
    }

    /// True when `returncode` is `SUCCESS`. Raw payloads count as success.
    pub fn is_success(&self) -> bool {
        self.returncode().is_none_or(|code| code == RET_SUCCESS)
    }

    /// HTTP status to write. Defaults to 200 except for raw payloads.
    pub fn status(&self) -> u16 {
        match self {
            Self::Raw(r) if r.status != 0 => r.status,
            _ => 200,
        }
    }

    /// Extra response headers (raw payloads only, e.g. `location`).
    pub fn headers(&self) -> &[(String, String)] {
        match self {
            Self::Raw(r) => &r.headers,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_create_response() {
        let data = br#"<?xml version="1.0"?>
            <response>
                <returncode>SUCCESS</returncode>
                <meetingID>abc123</meetingID>
                <internalMeetingID>int-1</internalMeetingID>
                <attendeePW>111222</attendeePW>
                <moderatorPW>333444</moderatorPW>
                <createTime>1531155809613</createTime>
                <running>false</running>
            </response>"#;

        let res = Response::unmarshal(resources::CREATE, data).unwrap();
        let Response::Create(create) = res else {
            panic!("expected create response");
        };
        assert_eq!(create.returncode, RET_SUCCESS);
        assert_eq!(create.meeting_id, "abc123");
        assert_eq!(create.internal_meeting_id, "int-1");
        assert_eq!(create.create_time, 1_531_155_809_613);
        assert!(!create.running);
    }

    #[test]
    fn decode_meeting_info_with_attendees() {
        let data = br#"<response>
            <returncode>SUCCESS</returncode>
            <meetingID>demo</meetingID>
            <internalMeetingID>int-9</internalMeetingID>
            <running>true</running>
            <participantCount>2</participantCount>
            <attendees>
                <attendee>
                    <userID>u1</userID>
                    <internalUserID>iu1</internalUserID>
                    <fullName>Alice</fullName>
                    <role>MODERATOR</role>
                    <isPresenter>true</isPresenter>
                </attendee>
                <attendee>
                    <userID>u2</userID>
                    <internalUserID>iu2</internalUserID>
                    <fullName>Bob</fullName>
                    <role>VIEWER</role>
                </attendee>
            </attendees>
            <metadata>
                <origin>greenfield</origin>
            </metadata>
        </response>"#;

        let res = Response::unmarshal(resources::GET_MEETING_INFO, data).unwrap();
        let Response::GetMeetingInfo(info) = res else {
            panic!("expected meeting info response");
        };
        let meeting = info.meeting();
        assert!(meeting.running);
        assert_eq!(meeting.participant_count, 2);
        assert_eq!(meeting.attendees.attendee.len(), 2);
        assert_eq!(meeting.attendees.attendee[0].full_name, "Alice");
        assert_eq!(
            meeting.metadata.get("origin").map(String::as_str),
            Some("greenfield")
        );
    }

    #[test]
    fn decode_failed_response() {
        let data = br#"<response>
            <returncode>FAILED</returncode>
            <messageKey>checksumError</messageKey>
            <message>You did not pass the checksum security check</message>
        </response>"#;

        let res = Response::unmarshal(resources::END, data).unwrap();
        assert!(!res.is_success());
        assert_eq!(res.returncode(), Some(RET_FAILED));
    }

    #[test]
    fn decode_get_meetings() {
        let data = br#"<response>
            <returncode>SUCCESS</returncode>
            <meetings>
                <meeting>
                    <meetingID>m1</meetingID>
                    <internalMeetingID>i1</internalMeetingID>
                    <running>true</running>
                </meeting>
                <meeting>
                    <meetingID>m2</meetingID>
                    <internalMeetingID>i2</internalMeetingID>
                </meeting>
            </meetings>
        </response>"#;

        let res = Response::unmarshal(resources::GET_MEETINGS, data).unwrap();
        let Response::GetMeetings(list) = res else {
            panic!("expected getMeetings response");
        };
        assert_eq!(list.meetings.meeting.len(), 2);
        assert_eq!(list.meetings.meeting[0].internal_meeting_id, "i1");
    }

    #[test]
    fn decode_empty_meetings_list() {
        let data = br#"<response>
            <returncode>SUCCESS</returncode>
            <meetings></meetings>
        </response>"#;

        let res = Response::unmarshal(resources::GET_MEETINGS, data).unwrap();
        let Response::GetMeetings(list) = res else {
            panic!("expected getMeetings response");
        };
        assert!(list.meetings.meeting.is_empty());
    }

    #[test]
    fn decode_text_tracks_json() {
        let data = br#"{
            "response": {
                "returncode": "SUCCESS",
                "tracks": [
                    {
                        "href": "https://node/track.vtt",
                        "kind": "subtitles",
                        "label": "English",
                        "lang": "en"
                    }
                ]
            }
        }"#;

        let res = Response::unmarshal(resources::GET_RECORDING_TEXT_TRACKS, data).unwrap();
        let Response::GetRecordingTextTracks(tracks) = res else {
            panic!("expected text tracks response");
        };
        assert_eq!(tracks.tracks.len(), 1);
        assert_eq!(tracks.tracks[0].lang, "en");
    }

    #[test]
    fn marshal_round_trips_meetings() {
        let res = Response::GetMeetings(GetMeetingsResponse {
            returncode: RET_SUCCESS.into(),
            meetings: Meetings {
                meeting: vec![Meeting {
                    meeting_id: "m1".into(),
                    internal_meeting_id: "i1".into(),
                    running: true,
                    ..Meeting::default()
                }],
            },
            ..GetMeetingsResponse::default()
        });

        let (body, content_type) = res.marshal().unwrap();
        assert_eq!(content_type, CONTENT_TYPE_XML);

        let parsed = Response::unmarshal(resources::GET_MEETINGS, &body).unwrap();
        assert_eq!(parsed, res);
    }

    #[test]
    fn attendee_upsert_is_idempotent() {
        let mut meeting = Meeting::default();
        let alice = Attendee {
            internal_user_id: "iu1".into(),
            full_name: "Alice".into(),
            ..Attendee::default()
        };

        meeting.upsert_attendee(alice.clone());
        meeting.upsert_attendee(alice);
        assert_eq!(meeting.attendees.attendee.len(), 1);

        meeting.remove_attendee("iu1");
        meeting.remove_attendee("iu1");
        assert!(meeting.attendees.attendee.is_empty());
    }

    #[test]
    fn raw_response_passes_through() {
        let res = Response::unmarshal(resources::GET_DEFAULT_CONFIG_XML, b"<config/>").unwrap();
        let (body, _) = res.marshal().unwrap();
        assert_eq!(body, b"<config/>");
        assert!(res.is_success());
    }
}
