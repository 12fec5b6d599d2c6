//! Command vocabulary.
//!
//! Commands must stay idempotent: a failed execution is terminal and the
//! enqueuer may re-enqueue the same action.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Refresh the replica snapshot of one meeting from its backend.
pub const UPDATE_MEETING_STATE: &str = "update_meeting_state";

/// Take a backend out of the cluster permanently.
pub const DECOMMISSION_BACKEND: &str = "decommission_backend";

/// Record a forwarding failure observed by a gateway. Keeps `node_state`
/// writes off the request path.
pub const MARK_BACKEND_DEGRADED: &str = "mark_backend_degraded";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMeetingStateParams {
    /// Globally unique (frontend-prefixed) meeting id.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecommissionBackendParams {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkBackendDegradedParams {
    pub id: Uuid,
    pub error: String,
}
