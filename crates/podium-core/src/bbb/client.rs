//! HTTP client for backend nodes.
//!
//! One shared client serves every backend agent and gateway request. The
//! underlying reqwest client is concurrency-safe; on top of it the number
//! of in-flight requests per backend host is capped with a semaphore so a
//! slow node cannot monopolise the connection pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};

use super::request::{Backend, Request};
use super::response::{DecodeError, Response};

/// In-flight request cap per backend host.
pub const DEFAULT_PER_HOST_LIMIT: usize = 32;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a server error. The body is kept so the
    /// gateway can surface the upstream response verbatim.
    #[error("backend returned status {status}")]
    Upstream { status: u16, body: Vec<u8> },

    #[error("failed to decode {resource} response: {source}")]
    Decode {
        resource: String,
        #[source]
        source: DecodeError,
    },
}

impl ClientError {
    /// True for transport-level failures (connect, TLS, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

/// Shared HTTP client for the cluster.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    limits: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
    per_host: usize,
}

impl Client {
    /// Create a client with the default per-host cap.
    pub fn new() -> Result<Self, ClientError> {
        Self::with_per_host_limit(DEFAULT_PER_HOST_LIMIT)
    }

    pub fn with_per_host_limit(per_host: usize) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("podium/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            limits: Arc::new(Mutex::new(HashMap::new())),
            per_host: per_host.max(1),
        })
    }

    async fn host_limit(&self, host: &str) -> Arc<Semaphore> {
        let mut limits = self.limits.lock().await;
        limits
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone()
    }

    /// Sign and execute a request against a backend, decoding the response
    /// by resource. The deadline is supplied by the caller.
    pub async fn execute(
        &self,
        backend: &Backend,
        req: &Request,
        deadline: Option<Duration>,
    ) -> Result<Response, ClientError> {
        let url = req.url(backend);

        let limit = self.host_limit(&backend.host).await;
        // Closing never happens, the semaphore lives as long as the map.
        let _permit = limit.acquire_owned().await.expect("host limit closed");

        let mut builder = match &req.body {
            Some(body) if !body.is_empty() => {
                let mut b = self.http.post(&url).body(body.clone());
                if let Some(content_type) = &req.content_type {
                    b = b.header(reqwest::header::CONTENT_TYPE, content_type);
                }
                b
            }
            _ => self.http.get(&url),
        };
        if let Some(deadline) = deadline {
            builder = builder.timeout(deadline);
        }

        let res = builder.send().await?;
        let status = res.status();
        let body = res.bytes().await?;

        if status.is_server_error() {
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                body: body.to_vec(),
            });
        }

        Response::unmarshal(&req.resource, &body).map_err(|source| ClientError::Decode {
            resource: req.resource.clone(),
            source,
        })
    }
}
