//! Domain types for the agentdesk job correlation protocol.
//!
//! Pure data and validation only; all I/O lives in `agentdesk-client`.

pub mod error;
pub mod job;
pub mod job_events;
pub mod models;
pub mod project;
pub mod types;
