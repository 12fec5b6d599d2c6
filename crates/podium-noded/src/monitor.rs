//! Node event monitor.
//!
//! Subscribes to the node's redis event channel, decodes the meeting
//! lifecycle events and hands them to the [`EventHandler`]. The
//! subscription reconnects with backoff; replayed events are harmless
//! because the handlers are idempotent.

use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use podium_core::bbb::events::{Event, EVENTS_CHANNEL};

use crate::handler::EventHandler;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("event stream closed")]
    Disconnected,
}

/// Long-running event stream subscriber.
pub struct Monitor {
    url: String,
    handler: EventHandler,
}

impl Monitor {
    pub fn new(url: String, handler: EventHandler) -> Self {
        Self { url, handler }
    }

    /// Subscribe and dispatch until shutdown, reconnecting on failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                result = self.subscribe_and_dispatch() => {
                    let err = match result {
                        Ok(never) => match never {},
                        Err(err) => err,
                    };
                    warn!(error = %err, retry_in = ?backoff, "event stream disconnected");
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => return,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// One subscription lifetime. Returns only with an error.
    async fn subscribe_and_dispatch(&self) -> Result<std::convert::Infallible, MonitorError> {
        let client = redis::Client::open(self.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(EVENTS_CHANNEL).await?;
        info!(channel = EVENTS_CHANNEL, "subscribed to node events");

        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            let payload: String = message.get_payload()?;
            let Some(event) = Event::parse(&payload) else {
                debug!("skipping unhandled event payload");
                continue;
            };
            if let Err(err) = self.handler.dispatch(&event).await {
                warn!(
                    internal_meeting_id = event.internal_meeting_id(),
                    error = %err,
                    "event handler failed"
                );
            }
        }

        Err(MonitorError::Disconnected)
    }
}
