//! CLI error types with miette diagnostics.
//!
//! Maps configuration and core errors into user-facing diagnostics with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use hearth_config::ConfigError;
use hearth_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    #[error("configuration error")]
    #[diagnostic(
        code(hearth::config),
        help(
            "Check the configuration file (hearth.toml) and any HEARTH_* \
             environment overrides.\nValidate with: hearth validate"
        )
    )]
    Config(#[source] ConfigError),

    #[error("could not connect to the hub")]
    #[diagnostic(
        code(hearth::connection_failed),
        help(
            "Check that the hub is running and the hub.ws_url / \
             hub.rest_url endpoints are reachable."
        )
    )]
    ConnectionFailed {
        #[source]
        source: CoreError,
    },

    #[error("the hub rejected the bearer token")]
    #[diagnostic(
        code(hearth::auth_failed),
        help(
            "Generate a long-lived access token on the hub and configure \
             it via hub.token_env or the HEARTH_TOKEN variable."
        )
    )]
    AuthFailed {
        #[source]
        source: CoreError,
    },

    #[error("controller error")]
    #[diagnostic(code(hearth::controller))]
    Controller(#[source] CoreError),
}

impl AppError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => exit_code::CONFIG,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Controller(_) => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { .. } => Self::AuthFailed { source: err },
            CoreError::ConnectionFailed { .. } => Self::ConnectionFailed { source: err },
            other => Self::Controller(other),
        }
    }
}
