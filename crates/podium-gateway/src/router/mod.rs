//! Backend selection.
//!
//! The router turns the set of serviceable backends into an ordered
//! candidate list for one request. Stages compose by wrapping, like HTTP
//! middleware: the outermost stage sees the full candidate set, delegates
//! to the rest of the chain via [`Next`], and may adjust the result on the
//! way out. The gateway tries the resulting order front to back.

pub mod stages;

use futures::future::BoxFuture;
use sqlx::PgPool;

use podium_store::backend_state::{self, BackendState};
use podium_store::{FrontendState, Query, StoreError};

pub use stages::{RequiredTags, SortLoad, StickyMeeting};

/// The routing-relevant slice of a request.
#[derive(Debug, Clone)]
pub struct RoutingRequest {
    pub frontend: FrontendState,
    pub resource: String,
    /// Globally unique (frontend-prefixed) meeting id, when the request
    /// carries one.
    pub meeting_id: Option<String>,
}

/// One stage of the routing chain.
pub trait RouterStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply<'a>(
        &'a self,
        pool: &'a PgPool,
        candidates: Vec<BackendState>,
        req: &'a RoutingRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Vec<BackendState>, StoreError>>;
}

/// The remainder of the stage chain.
pub struct Next<'a> {
    pool: &'a PgPool,
    stages: &'a [Box<dyn RouterStage>],
}

impl<'a> Next<'a> {
    pub async fn run(
        self,
        candidates: Vec<BackendState>,
        req: &'a RoutingRequest,
    ) -> Result<Vec<BackendState>, StoreError> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                stage
                    .apply(
                        self.pool,
                        candidates,
                        req,
                        Next {
                            pool: self.pool,
                            stages: rest,
                        },
                    )
                    .await
            }
            None => Ok(candidates),
        }
    }
}

/// Filters and orders backends per request.
pub struct Router {
    pool: PgPool,
    stages: Vec<Box<dyn RouterStage>>,
}

impl Router {
    /// The stock chain: required tags, sticky meeting, load order.
    pub fn new(pool: PgPool) -> Self {
        Self::with_stages(
            pool,
            vec![
                Box::new(RequiredTags),
                Box::new(StickyMeeting),
                Box::new(SortLoad),
            ],
        )
    }

    pub fn with_stages(pool: PgPool, stages: Vec<Box<dyn RouterStage>>) -> Self {
        Self { pool, stages }
    }

    /// Produce the ordered candidate list for a request. An empty result
    /// means no backend can serve it.
    pub async fn select(&self, req: &RoutingRequest) -> Result<Vec<BackendState>, StoreError> {
        let q = Query::new()
            .eq("backends.admin_state", "ready")
            .eq("backends.node_state", "ready");
        let candidates = backend_state::get_backend_states(&self.pool, &q).await?;

        Next {
            pool: &self.pool,
            stages: &self.stages,
        }
        .run(candidates, req)
        .await
    }
}
