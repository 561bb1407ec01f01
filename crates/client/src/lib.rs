//! Client for the coding-agent backend.
//!
//! A job is started with a request/response call and its outcome arrives
//! later, pushed over a persistent WebSocket. This crate keeps that
//! connection alive, tags each submission with the live connection id,
//! correlates pushed events with the single in-flight job, enforces a
//! local deadline, and re-fetches the authoritative records once a job
//! succeeds.
//!
//! The entry point is [`session::AgentSession::spawn`], wired to a
//! [`connection::WsConnectionRegistry`] and an [`api::AgentApi`].

pub mod api;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod events;
pub mod identity;
pub mod messages;
pub mod reconciler;
pub mod reconnect;
pub mod session;
pub mod submitter;
pub mod transport;
