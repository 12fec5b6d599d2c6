//! Authoritative cluster state store.
//!
//! Four logical tables shared by all gateway replicas: `backends`,
//! `frontends`, `meetings` and `commands`. The store exclusively owns the
//! durable rows; in-memory copies are caches that must be re-read through
//! the store to observe changes.

pub mod backend_state;
pub mod command_queue;
pub mod db;
pub mod frontend_state;
pub mod meeting_state;
pub mod query;
pub mod settings;

#[cfg(test)]
mod tests;

pub use backend_state::{AdminState, BackendState, NodeState};
pub use command_queue::{Command, CommandHandler, CommandQueue, CommandState};
pub use db::{connect, with_tx_retry, ConnectOpts, StoreError};
pub use frontend_state::FrontendState;
pub use meeting_state::MeetingState;
pub use query::{Arg, Query};
pub use settings::{BackendSettings, FrontendSettings};
