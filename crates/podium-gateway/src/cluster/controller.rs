//! The cluster controller.
//!
//! Owns the set of live backend agents, reconciling it against the store,
//! and runs this replica's command-queue consumer loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::PgPool;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use podium_core::bbb::request::{resources, Request};
use podium_core::bbb::{Client, Params};
use podium_store::backend_state::{self, AdminState, NodeState};
use podium_store::command_queue::{self, Command, CommandHandler, CommandQueue};
use podium_store::meeting_state;
use podium_store::query::Arg;
use podium_store::Query;

use super::backend::Backend;
use super::commands::{
    self, DecommissionBackendParams, MarkBackendDegradedParams, UpdateMeetingStateParams,
};

const RECONCILE_PERIOD: Duration = Duration::from_secs(30);
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Replica rows unconfirmed for this long are garbage collected.
const MEETING_GC_AGE: Duration = Duration::from_secs(24 * 60 * 60);

type HandlerError = Box<dyn std::error::Error + Send + Sync>;

struct AgentHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Supervisor of backend agents and command consumer.
pub struct Controller {
    pool: PgPool,
    client: Client,
    agents: RwLock<HashMap<Uuid, AgentHandle>>,
}

impl Controller {
    pub fn new(pool: PgPool, client: Client) -> Arc<Self> {
        Arc::new(Self {
            pool,
            client,
            agents: RwLock::new(HashMap::new()),
        })
    }

    /// Spawn the controller tasks: agent reconciliation, command consumer,
    /// and queue housekeeping.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!("starting cluster controller");
        vec![
            tokio::spawn(Arc::clone(self).reconcile_loop(shutdown.clone())),
            tokio::spawn(Arc::clone(self).receive_loop(shutdown.clone())),
            tokio::spawn(command_queue::run_housekeeping(self.pool.clone(), shutdown)),
        ]
    }

    async fn reconcile_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(err) = self.reconcile().await {
                warn!(error = %err, "agent reconciliation failed");
            }
            tokio::select! {
                () = tokio::time::sleep(RECONCILE_PERIOD) => {}
                _ = shutdown.changed() => break,
            }
        }
        self.stop_agents().await;
    }

    /// Align the agent set with the backend table: spawn agents for new
    /// rows, stop agents for rows gone or decommissioned.
    pub async fn reconcile(&self) -> Result<(), podium_store::StoreError> {
        let q = Query::new().where_sql(
            "backends.admin_state <> ?",
            [Arg::from(AdminState::Decommissioned.as_str())],
        );
        let states = backend_state::get_backend_states(&self.pool, &q).await?;
        let live: HashSet<Uuid> = states.iter().map(|s| s.id).collect();

        let mut agents = self.agents.write().await;

        for state in states {
            if agents.contains_key(&state.id) {
                continue;
            }
            info!(backend = %state.id, host = %state.host, "spawning backend agent");
            let (tx, rx) = watch::channel(false);
            let agent = Backend::new(self.pool.clone(), self.client.clone(), state.clone());
            agents.insert(
                state.id,
                AgentHandle {
                    shutdown: tx,
                    task: tokio::spawn(agent.run(rx)),
                },
            );
        }

        agents.retain(|id, handle| {
            if live.contains(id) && !handle.task.is_finished() {
                return true;
            }
            info!(backend = %id, "stopping backend agent");
            let _ = handle.shutdown.send(true);
            false
        });
        drop(agents);

        match meeting_state::delete_stale_meetings(&self.pool, MEETING_GC_AGE).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "garbage collected stale meetings"),
            Err(err) => warn!(error = %err, "stale meeting sweep failed"),
        }

        Ok(())
    }

    async fn stop_agents(&self) {
        let mut agents = self.agents.write().await;
        for (id, handle) in agents.drain() {
            let _ = handle.shutdown.send(true);
            if let Err(err) = handle.task.await {
                warn!(backend = %id, error = %err, "agent task ended abnormally");
            }
        }
    }

    /// This replica's command consumer. A failed receive is logged and
    /// retried after a delay.
    async fn receive_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut queue = CommandQueue::new(self.pool.clone());
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                result = queue.receive(self.as_ref() as &dyn CommandHandler) => {
                    if let Err(err) = result {
                        warn!(error = %err, "command receive failed");
                        tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    async fn handle_command(&self, cmd: &Command) -> Result<serde_json::Value, HandlerError> {
        match cmd.action.as_str() {
            commands::UPDATE_MEETING_STATE => {
                let params: UpdateMeetingStateParams = cmd.params_as()?;
                self.update_meeting_state(&params.id).await
            }
            commands::DECOMMISSION_BACKEND => {
                let params: DecommissionBackendParams = cmd.params_as()?;
                self.decommission_backend(params.id).await
            }
            commands::MARK_BACKEND_DEGRADED => {
                let params: MarkBackendDegradedParams = cmd.params_as()?;
                backend_state::update_node_health(
                    &self.pool,
                    params.id,
                    NodeState::Error,
                    None,
                    Some(&params.error),
                )
                .await?;
                Ok(serde_json::json!("degraded"))
            }
            other => Err(format!("unknown command action `{other}`").into()),
        }
    }

    async fn update_meeting_state(&self, id: &str) -> Result<serde_json::Value, HandlerError> {
        let Some(meeting) = meeting_state::get_meeting_state_by_id(&self.pool, id).await? else {
            return Ok(serde_json::json!("unknown meeting"));
        };
        let Some(backend_id) = meeting.backend_id else {
            return Ok(serde_json::json!("meeting has no backend"));
        };
        let Some(state) = backend_state::get_backend_state(
            &self.pool,
            &Query::new().eq("backends.id", backend_id),
        )
        .await?
        else {
            return Ok(serde_json::json!("unknown backend"));
        };

        let backend = Backend::new(self.pool.clone(), self.client.clone(), state);
        let req = Request::new(
            resources::GET_MEETING_INFO,
            Params::from([("meetingID", id)]),
        );
        backend.get_meeting_info(&req).await?;
        Ok(serde_json::json!("updated"))
    }

    async fn decommission_backend(&self, id: Uuid) -> Result<serde_json::Value, HandlerError> {
        backend_state::update_admin_state(&self.pool, id, AdminState::Decommissioned).await?;
        // The node is leaving the cluster; its replica rows go with it.
        meeting_state::delete_absent_for_backend(&self.pool, id, &[]).await?;
        self.reconcile().await?;
        Ok(serde_json::json!("decommissioned"))
    }
}

impl CommandHandler for Controller {
    fn handle<'a>(
        &'a self,
        cmd: &'a Command,
    ) -> BoxFuture<'a, Result<serde_json::Value, HandlerError>> {
        Box::pin(self.handle_command(cmd))
    }
}
