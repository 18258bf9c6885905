//! Async client for the Home Assistant hub APIs consumed by hearth.
//!
//! The hub exposes two surfaces and this crate wraps both behind a single
//! [`HassClient`]:
//!
//! - **WebSocket** — challenge/response authentication, event
//!   subscriptions, and `call_service` frames with per-connection message
//!   ids. A background task owns the read half of the socket and
//!   dispatches incoming events to registered handlers; when the
//!   connection drops while the client is running, the same task
//!   reconnects with exponential backoff and resumes subscriptions.
//! - **REST** — `GET /api/states/{entity_id}` for on-demand sensor reads,
//!   authorized with the same bearer token.
//!
//! Consumers never see raw socket or HTTP types: every operation returns
//! [`Error`], and incoming payloads are parsed into the [`models`] types.

pub mod client;
pub mod error;
pub mod models;
pub mod retry;
pub mod transport;

pub use client::{HassClient, HubOptions};
pub use error::Error;
pub use models::{HassEvent, HassState, ServiceCall, StateChange, WsMessage};
pub use retry::ReconnectConfig;
pub use transport::TransportConfig;
