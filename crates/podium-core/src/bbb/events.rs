//! Node event stream messages.
//!
//! Conferencing nodes publish meeting lifecycle events as JSON envelopes on
//! a redis channel. Only the five event kinds that affect the meeting
//! replica are decoded; everything else is skipped by the monitor.
//!
//! Envelope shape:
//! `{"envelope": {"name": "..."}, "core": {"header": {...}, "body": {...}}}`

use serde_json::Value;

use super::response::Attendee;

/// Redis channel the node publishes meeting events on.
pub const EVENTS_CHANNEL: &str = "from-akka-apps-redis-channel";

/// A typed meeting lifecycle event, keyed by `internal_meeting_id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MeetingCreated {
        internal_meeting_id: String,
        meeting_id: String,
    },
    MeetingEnded {
        internal_meeting_id: String,
    },
    MeetingDestroyed {
        internal_meeting_id: String,
    },
    UserJoinedMeeting {
        internal_meeting_id: String,
        attendee: Attendee,
    },
    UserLeftMeeting {
        internal_meeting_id: String,
        internal_user_id: String,
    },
}

impl Event {
    /// The internal meeting id this event applies to.
    pub fn internal_meeting_id(&self) -> &str {
        match self {
            Self::MeetingCreated {
                internal_meeting_id,
                ..
            }
            | Self::MeetingEnded {
                internal_meeting_id,
            }
            | Self::MeetingDestroyed {
                internal_meeting_id,
            }
            | Self::UserJoinedMeeting {
                internal_meeting_id,
                ..
            }
            | Self::UserLeftMeeting {
                internal_meeting_id,
                ..
            } => internal_meeting_id,
        }
    }

    /// Parse an event from a raw channel payload.
    ///
    /// Returns `None` for event kinds we do not track and for payloads
    /// missing required fields. Delivery is at-least-once, so the handlers
    /// downstream must stay idempotent anyway.
    pub fn parse(payload: &str) -> Option<Self> {
        let doc: Value = serde_json::from_str(payload).ok()?;
        let name = doc.pointer("/envelope/name")?.as_str()?;
        let header = doc.pointer("/core/header");
        let body = doc.pointer("/core/body");

        let header_meeting_id = header
            .and_then(|h| h.get("meetingId"))
            .and_then(Value::as_str);

        match name {
            "MeetingCreatedEvtMsg" => {
                let props = body?.pointer("/props/meetingProp")?;
                Some(Self::MeetingCreated {
                    internal_meeting_id: props.get("intId")?.as_str()?.to_string(),
                    meeting_id: props.get("extId")?.as_str()?.to_string(),
                })
            }
            "MeetingEndedEvtMsg" => Some(Self::MeetingEnded {
                internal_meeting_id: body?
                    .get("meetingId")
                    .and_then(Value::as_str)
                    .or(header_meeting_id)?
                    .to_string(),
            }),
            "MeetingDestroyedEvtMsg" => Some(Self::MeetingDestroyed {
                internal_meeting_id: body?
                    .get("meetingId")
                    .and_then(Value::as_str)
                    .or(header_meeting_id)?
                    .to_string(),
            }),
            "UserJoinedMeetingEvtMsg" => {
                let body = body?;
                let attendee = Attendee {
                    internal_user_id: body.get("intId")?.as_str()?.to_string(),
                    user_id: body
                        .get("extId")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    full_name: body
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    role: body
                        .get("role")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    is_presenter: body
                        .get("presenter")
                        .and_then(Value::as_bool)
                        .unwrap_or_default(),
                    is_listening_only: body
                        .get("listenOnly")
                        .and_then(Value::as_bool)
                        .unwrap_or_default(),
                    ..Attendee::default()
                };
                Some(Self::UserJoinedMeeting {
                    internal_meeting_id: header_meeting_id?.to_string(),
                    attendee,
                })
            }
            "UserLeftMeetingEvtMsg" => Some(Self::UserLeftMeeting {
                internal_meeting_id: header_meeting_id?.to_string(),
                internal_user_id: body?.get("intId")?.as_str()?.to_string(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_meeting_created() {
        let payload = r#"{
            "envelope": {"name": "MeetingCreatedEvtMsg"},
            "core": {
                "header": {"name": "MeetingCreatedEvtMsg"},
                "body": {
                    "props": {
                        "meetingProp": {
                            "intId": "int-abc-1",
                            "extId": "abc",
                            "name": "Demo"
                        }
                    }
                }
            }
        }"#;

        assert_eq!(
            Event::parse(payload),
            Some(Event::MeetingCreated {
                internal_meeting_id: "int-abc-1".into(),
                meeting_id: "abc".into(),
            })
        );
    }

    #[test]
    fn parse_user_joined() {
        let payload = r#"{
            "envelope": {"name": "UserJoinedMeetingEvtMsg"},
            "core": {
                "header": {"meetingId": "int-abc-1", "userId": "w_x1"},
                "body": {
                    "intId": "w_x1",
                    "extId": "u1",
                    "name": "Alice",
                    "role": "MODERATOR",
                    "presenter": true,
                    "listenOnly": false
                }
            }
        }"#;

        let Some(Event::UserJoinedMeeting {
            internal_meeting_id,
            attendee,
        }) = Event::parse(payload)
        else {
            panic!("expected user joined event");
        };
        assert_eq!(internal_meeting_id, "int-abc-1");
        assert_eq!(attendee.internal_user_id, "w_x1");
        assert_eq!(attendee.full_name, "Alice");
        assert!(attendee.is_presenter);
    }

    #[test]
    fn parse_user_left() {
        let payload = r#"{
            "envelope": {"name": "UserLeftMeetingEvtMsg"},
            "core": {
                "header": {"meetingId": "int-abc-1"},
                "body": {"intId": "w_x1"}
            }
        }"#;

        assert_eq!(
            Event::parse(payload),
            Some(Event::UserLeftMeeting {
                internal_meeting_id: "int-abc-1".into(),
                internal_user_id: "w_x1".into(),
            })
        );
    }

    #[test]
    fn parse_meeting_ended_and_destroyed() {
        let ended = r#"{
            "envelope": {"name": "MeetingEndedEvtMsg"},
            "core": {"header": {}, "body": {"meetingId": "int-1"}}
        }"#;
        let destroyed = r#"{
            "envelope": {"name": "MeetingDestroyedEvtMsg"},
            "core": {"header": {}, "body": {"meetingId": "int-1"}}
        }"#;

        assert_eq!(
            Event::parse(ended).map(|e| e.internal_meeting_id().to_string()),
            Some("int-1".to_string())
        );
        assert!(matches!(
            Event::parse(destroyed),
            Some(Event::MeetingDestroyed { .. })
        ));
    }

    #[test]
    fn unknown_events_are_skipped() {
        let payload = r#"{
            "envelope": {"name": "SomeOtherEvtMsg"},
            "core": {"header": {}, "body": {}}
        }"#;
        assert_eq!(Event::parse(payload), None);
        assert_eq!(Event::parse("not json"), None);
    }
}
