//! BBB wire protocol.
//!
//! Requests are plain HTTP GET/POST calls against a named resource with a
//! checksum-signed query string. Responses are XML documents with a common
//! `returncode` header, except the recording text-track resources which are
//! JSON-wrapped.

pub mod client;
pub mod events;
pub mod params;
pub mod request;
pub mod response;
pub mod signing;

pub use client::{Client, ClientError};
pub use events::Event;
pub use params::Params;
pub use request::{Backend, Request};
pub use response::{Attendee, Meeting, Recording, Response};
