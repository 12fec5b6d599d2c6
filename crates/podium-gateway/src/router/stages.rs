//! Stock routing stages.

use std::collections::HashMap;

use futures::future::BoxFuture;
use sqlx::PgPool;
use uuid::Uuid;

use podium_store::backend_state::BackendState;
use podium_store::meeting_state;
use podium_store::settings::tags_cover;
use podium_store::StoreError;

use super::{Next, RouterStage, RoutingRequest};

/// Drop any backend whose tags do not cover the frontend's required tags.
pub struct RequiredTags;

impl RouterStage for RequiredTags {
    fn name(&self) -> &'static str {
        "required_tags"
    }

    fn apply<'a>(
        &'a self,
        _pool: &'a PgPool,
        candidates: Vec<BackendState>,
        req: &'a RoutingRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Vec<BackendState>, StoreError>> {
        Box::pin(async move {
            let filtered = filter_required_tags(candidates, &req.frontend.settings.0.required_tags);
            next.run(filtered, req).await
        })
    }
}

/// A meeting stays on its backend: when the store already binds the
/// request's meeting, that backend is placed first in whatever order the
/// rest of the chain produced.
pub struct StickyMeeting;

impl RouterStage for StickyMeeting {
    fn name(&self) -> &'static str {
        "sticky_meeting"
    }

    fn apply<'a>(
        &'a self,
        pool: &'a PgPool,
        candidates: Vec<BackendState>,
        req: &'a RoutingRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Vec<BackendState>, StoreError>> {
        Box::pin(async move {
            let routed = next.run(candidates, req).await?;

            let Some(meeting_id) = &req.meeting_id else {
                return Ok(routed);
            };
            let Some(meeting) = meeting_state::get_meeting_state_by_id(pool, meeting_id).await?
            else {
                return Ok(routed);
            };
            let Some(backend_id) = meeting.backend_id else {
                return Ok(routed);
            };

            Ok(promote(routed, backend_id))
        })
    }
}

/// Ascending by replica participant count, then probe latency. Ties break
/// on the backend id so the order is deterministic.
pub struct SortLoad;

impl RouterStage for SortLoad {
    fn name(&self) -> &'static str {
        "sort_load"
    }

    fn apply<'a>(
        &'a self,
        pool: &'a PgPool,
        candidates: Vec<BackendState>,
        req: &'a RoutingRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Vec<BackendState>, StoreError>> {
        Box::pin(async move {
            let loads: HashMap<Uuid, i64> = meeting_state::get_backend_loads(pool)
                .await?
                .into_iter()
                .collect();
            next.run(sort_by_load(candidates, &loads), req).await
        })
    }
}

// ---- Pure stage logic ----

fn filter_required_tags(candidates: Vec<BackendState>, required: &[String]) -> Vec<BackendState> {
    candidates
        .into_iter()
        .filter(|backend| tags_cover(&backend.tags, required))
        .collect()
}

fn promote(mut candidates: Vec<BackendState>, backend_id: Uuid) -> Vec<BackendState> {
    if let Some(pos) = candidates.iter().position(|b| b.id == backend_id) {
        let backend = candidates.remove(pos);
        candidates.insert(0, backend);
    }
    candidates
}

fn sort_by_load(
    mut candidates: Vec<BackendState>,
    loads: &HashMap<Uuid, i64>,
) -> Vec<BackendState> {
    candidates.sort_by_key(|backend| {
        (
            loads.get(&backend.id).copied().unwrap_or(0),
            backend.latency_ms.unwrap_or(i64::MAX),
            backend.id,
        )
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(tags: &[&str], latency_ms: Option<i64>) -> BackendState {
        let mut state = BackendState::new("https://node/api/", "secret");
        state.tags = tags.iter().map(ToString::to_string).collect();
        state.latency_ms = latency_ms;
        state
    }

    #[test]
    fn required_tags_drops_uncovered_backends() {
        // Two backends: B1 {eu, paid}, B2 {eu}. Frontend requires {paid}.
        let b1 = backend(&["eu", "paid"], None);
        let b2 = backend(&["eu"], None);
        let b1_id = b1.id;

        let routed = filter_required_tags(vec![b1, b2], &["paid".to_string()]);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].id, b1_id);
    }

    #[test]
    fn no_required_tags_keeps_everything() {
        let routed = filter_required_tags(vec![backend(&[], None), backend(&["eu"], None)], &[]);
        assert_eq!(routed.len(), 2);
    }

    #[test]
    fn sticky_meeting_overrides_load_order() {
        // Meeting bound to B2 (0 participants), B1 carries 5. The chain
        // sorts by load and the sticky promotion still puts B2 first.
        let b1 = backend(&["eu"], Some(10));
        let b2 = backend(&["eu"], Some(10));
        let (b1_id, b2_id) = (b1.id, b2.id);

        let loads = HashMap::from([(b1_id, 5), (b2_id, 0)]);
        let routed = promote(sort_by_load(vec![b1, b2], &loads), b2_id);

        assert_eq!(routed[0].id, b2_id);
        assert_eq!(routed[1].id, b1_id);
    }

    #[test]
    fn promote_unknown_backend_is_a_noop() {
        let b1 = backend(&[], None);
        let b1_id = b1.id;
        let routed = promote(vec![b1], Uuid::new_v4());
        assert_eq!(routed[0].id, b1_id);
    }

    #[test]
    fn sort_orders_by_load_then_latency_then_id() {
        let mut low_latency = backend(&[], Some(5));
        let mut high_latency = backend(&[], Some(50));
        let busy = backend(&[], Some(1));

        // Make id ordering deterministic for the latency tie below.
        if low_latency.id > high_latency.id {
            std::mem::swap(&mut low_latency.id, &mut high_latency.id);
        }

        let loads = HashMap::from([(busy.id, 12)]);
        let (low_id, high_id, busy_id) = (low_latency.id, high_latency.id, busy.id);

        let routed = sort_by_load(vec![busy, high_latency, low_latency], &loads);
        assert_eq!(
            routed.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![low_id, high_id, busy_id]
        );
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            // router.applies(f, b) iff f.required_tags is a subset of b.tags
            #[test]
            fn tag_filter_matches_subset_semantics(
                backend_tags in proptest::collection::vec("[a-c]{1,2}", 0..4),
                required in proptest::collection::vec("[a-c]{1,2}", 0..4)
            ) {
                let b = {
                    let mut state = BackendState::new("https://node/api/", "s");
                    state.tags = backend_tags.clone();
                    state
                };
                let kept = !filter_required_tags(vec![b], &required).is_empty();
                let subset = required.iter().all(|t| backend_tags.contains(t));
                prop_assert_eq!(kept, subset);
            }
        }
    }
}
