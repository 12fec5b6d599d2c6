//! Podium core library.
//!
//! Shared functionality for podium components:
//! - BBB wire protocol: parameter encoding, request signing, typed responses
//! - Node event stream messages
//! - Environment configuration resolution
//! - Tracing/logging bootstrap

pub mod bbb;
pub mod config;
pub mod tracing_init;
