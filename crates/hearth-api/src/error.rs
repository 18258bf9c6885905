use thiserror::Error;

/// Top-level error type for the `hearth-api` crate.
///
/// Covers every failure mode across both hub surfaces: authentication,
/// HTTP transport, the REST state API, and the WebSocket connection.
/// `hearth-core` maps these into domain-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The hub rejected the bearer token during the WebSocket handshake
    /// (`auth_invalid`) or a REST call (HTTP 401).
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// WebSocket transport failure (connect, send, or read).
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Initial connection attempts exhausted.
    #[error("failed to connect to hub after {attempts} attempts: {last}")]
    ConnectExhausted { attempts: u32, last: String },

    /// Operation requires a live connection.
    #[error("not connected to the hub")]
    NotConnected,

    // ── REST API ────────────────────────────────────────────────────
    /// Entity does not exist on the hub (HTTP 404).
    #[error("entity not found: {entity_id}")]
    NotFound { entity_id: String },

    /// Any other non-success REST response.
    #[error("hub error (HTTP {status}): {message}")]
    Hub { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocket(_) | Self::ConnectExhausted { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the hub rejected our credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
