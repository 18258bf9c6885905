//! Wire types for the hub's WebSocket and REST payloads.
//!
//! Shapes follow the Home Assistant API: entity states carry ISO-8601
//! timestamps (a trailing `Z` is accepted), `state` is always a string
//! and is coerced to a number on demand, and `state_changed` event data
//! nests full old/new state objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Entity state ─────────────────────────────────────────────────────

/// A hub entity state as returned by `GET /api/states/{entity_id}` and
/// embedded in `state_changed` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HassState {
    pub entity_id: String,

    /// Raw state value. Always a string on the wire, even for sensors.
    pub state: String,

    #[serde(default)]
    pub attributes: Value,

    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl HassState {
    /// Coerce the state string into a numeric reading.
    ///
    /// Returns `None` for non-numeric states such as `"unavailable"`.
    pub fn numeric_state(&self) -> Option<f64> {
        self.state.trim().parse().ok()
    }
}

// ── State change events ──────────────────────────────────────────────

/// Payload of a `state_changed` event.
#[derive(Debug, Clone, Deserialize)]
pub struct StateChange {
    pub entity_id: String,
    pub new_state: Option<HassState>,
    pub old_state: Option<HassState>,
}

/// A hub event as delivered over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct HassEvent {
    pub event_type: String,

    #[serde(default)]
    pub data: Value,

    #[serde(default = "default_origin")]
    pub origin: String,

    pub time_fired: DateTime<Utc>,

    #[serde(default)]
    pub context: Option<Value>,
}

fn default_origin() -> String {
    "LOCAL".into()
}

impl HassEvent {
    /// Returns `true` for `state_changed` events.
    pub fn is_state_changed(&self) -> bool {
        self.event_type == "state_changed"
    }

    /// Parse the event data as a state change.
    ///
    /// Returns `None` for other event types or malformed payloads.
    pub fn state_change(&self) -> Option<StateChange> {
        if !self.is_state_changed() {
            return None;
        }
        match serde_json::from_value(self.data.clone()) {
            Ok(change) => Some(change),
            Err(e) => {
                tracing::warn!(error = %e, "malformed state_changed payload");
                None
            }
        }
    }
}

// ── Service calls ────────────────────────────────────────────────────

/// A `call_service` request body (without the frame envelope).
#[derive(Debug, Clone, Serialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
}

impl ServiceCall {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data: None,
            target: None,
        }
    }

    pub fn data(mut self, data: Value) -> Self {
        self.service_data = Some(data);
        self
    }
}

// ── Incoming WebSocket frames ────────────────────────────────────────

/// The subset of incoming WebSocket frames the client reacts to.
///
/// Anything else (`pong`, result frames for subscriptions, future frame
/// types) folds into [`WsMessage::Unknown`] and is ignored by the
/// receive loop.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: String,
    },
    Event {
        #[serde(default)]
        id: u64,
        event: HassEvent,
    },
    Result {
        #[serde(default)]
        id: u64,
        success: bool,
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

// ── Tests ────────────────────────────────────────────────────────────
