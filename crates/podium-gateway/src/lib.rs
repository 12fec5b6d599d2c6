//! Podium gateway.
//!
//! The request-router / state-replication core: authenticates tenant
//! requests, picks a backend honoring capability tags and load, re-signs
//! and forwards, and keeps the shared meeting replica current.

pub mod cluster;
pub mod error;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod router;
pub mod templates;

pub use error::GatewayError;
