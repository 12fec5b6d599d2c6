//! Gateway error taxonomy.

use podium_core::bbb::client::ClientError;
use podium_core::bbb::response::EncodeError;
use podium_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Checksum mismatch or unknown frontend key.
    #[error("authentication failed")]
    AuthFailed,

    /// The router returned an empty candidate set.
    #[error("no backend available")]
    NoBackendAvailable,

    /// Transport failure or HTTP >= 500 from the chosen backend. The body,
    /// when present, is surfaced verbatim.
    #[error("upstream error (status {status})")]
    Upstream { status: u16, body: Vec<u8> },

    /// The backend answered with something we could not decode.
    #[error("upstream response unreadable: {0}")]
    UpstreamUnreadable(String),

    /// Meeting already bound to a different frontend.
    #[error("meeting is owned by another frontend")]
    Conflict,

    /// A required request parameter is missing.
    #[error("missing parameter: {0}")]
    MissingParam(&'static str),

    /// Join target does not exist in the replica.
    #[error("meeting not found")]
    MeetingNotFound,

    /// The caller-provided deadline tripped.
    #[error("request cancelled by deadline")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("response encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

impl GatewayError {
    /// HTTP status to answer the tenant with.
    pub fn status(&self) -> u16 {
        match self {
            Self::AuthFailed => 401,
            Self::NoBackendAvailable => 503,
            Self::Upstream { status, .. } => {
                if *status >= 500 {
                    *status
                } else {
                    502
                }
            }
            Self::UpstreamUnreadable(_) => 502,
            Self::Conflict => 409,
            Self::MissingParam(_) => 400,
            Self::MeetingNotFound => 404,
            Self::Cancelled => 504,
            Self::Store(StoreError::Unavailable(_)) => 503,
            Self::Store(_) | Self::Encode(_) => 500,
        }
    }

    /// True when the failed backend should be marked degraded.
    pub fn degrades_backend(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::UpstreamUnreadable(_))
    }

    /// Message key used in the XML error body.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::AuthFailed => "checksumError",
            Self::NoBackendAvailable => "noBackendAvailable",
            Self::Upstream { .. } | Self::UpstreamUnreadable(_) => "upstreamError",
            Self::Conflict => "meetingOwnedByOtherFrontend",
            Self::MissingParam(_) => "missingParameter",
            Self::MeetingNotFound => "notFound",
            Self::Cancelled => "requestTimeout",
            Self::Store(_) | Self::Encode(_) => "internalError",
        }
    }
}

impl From<ClientError> for GatewayError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Http(e) if e.is_timeout() => Self::Cancelled,
            ClientError::Http(e) => Self::Upstream {
                status: 0,
                body: format!("upstream transport error: {e}").into_bytes(),
            },
            ClientError::Upstream { status, body } => Self::Upstream { status, body },
            ClientError::Decode { resource, source } => {
                Self::UpstreamUnreadable(format!("{resource}: {source}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(GatewayError::AuthFailed.status(), 401);
        assert_eq!(GatewayError::NoBackendAvailable.status(), 503);
        assert_eq!(GatewayError::Conflict.status(), 409);
        assert_eq!(GatewayError::Cancelled.status(), 504);
        assert_eq!(
            GatewayError::Upstream {
                status: 503,
                body: vec![]
            }
            .status(),
            503
        );
        assert_eq!(
            GatewayError::Store(StoreError::Unavailable("pool drained".into())).status(),
            503
        );
    }

    #[test]
    fn only_upstream_failures_degrade_the_backend() {
        assert!(GatewayError::Upstream {
            status: 500,
            body: vec![]
        }
        .degrades_backend());
        assert!(!GatewayError::AuthFailed.degrades_backend());
        assert!(!GatewayError::Conflict.degrades_backend());
    }
}
