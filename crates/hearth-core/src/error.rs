// ── Core error types ──
//
// Domain-facing errors from hearth-core. Consumers never see raw HTTP
// status codes or socket errors directly; the `From<hearth_api::Error>`
// impl translates transport-layer failures into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("cannot connect to hub: {reason}")]
    ConnectionFailed { reason: String },

    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    /// Public API called while the controller is not running.
    #[error("controller is not running")]
    NotRunning,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    /// A sensor reported a state that cannot be read as a temperature.
    #[error("invalid reading from {entity_id}: {value:?}")]
    InvalidObservation { entity_id: String, value: String },

    // ── Hub errors (wrapped, not exposed raw) ────────────────────────
    #[error("hub error: {message}")]
    Hub { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hearth_api::Error> for CoreError {
    fn from(err: hearth_api::Error) -> Self {
        match err {
            hearth_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            hearth_api::Error::Transport(ref e) => {
                if e.is_timeout() || e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Hub {
                        message: e.to_string(),
                    }
                }
            }
            hearth_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            hearth_api::Error::WebSocket(reason) => CoreError::ConnectionFailed { reason },
            hearth_api::Error::ConnectExhausted { attempts, last } => {
                CoreError::ConnectionFailed {
                    reason: format!("gave up after {attempts} attempts: {last}"),
                }
            }
            hearth_api::Error::NotConnected => CoreError::ConnectionFailed {
                reason: "not connected".into(),
            },
            hearth_api::Error::NotFound { entity_id } => CoreError::EntityNotFound { entity_id },
            hearth_api::Error::Hub { status, message } => CoreError::Hub {
                message: format!("HTTP {status}: {message}"),
            },
            hearth_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("deserialization error: {message}"))
            }
        }
    }
}
