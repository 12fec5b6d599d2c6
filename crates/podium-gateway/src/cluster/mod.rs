//! Cluster plumbing: backend agents, their controller, and the command
//! vocabulary they exchange over the queue.

pub mod backend;
pub mod commands;
pub mod controller;

pub use backend::Backend;
pub use controller::Controller;
