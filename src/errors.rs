//! Error taxonomy for the route generator and request pipeline.
//!
//! Configuration problems are raised while the registry is being built and
//! must never surface at request time. Request-time failures are mapped to
//! the response envelope by the orchestrator, which decides how much detail
//! the client may see.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::StatusCode;

/// Errors produced by registration, mapping construction and request handling.
#[derive(Debug)]
pub enum ApiError {
    /// Invalid registration input (bad computed-prop naming, unknown
    /// entity/prop references, impossible option combinations).
    /// Raised at startup, never deferred to request time.
    Config { message: String },

    /// A single-entity lookup missed. Always surfaced as a 404, never as a
    /// silent `null`.
    NotFound {
        resource: String,
        id: Option<String>,
    },

    /// Payload failed field-level validation. Errors are keyed by
    /// `<table>.<prop>` and returned in the envelope's `validationErrors`.
    Validation {
        errors: BTreeMap<String, Vec<String>>,
    },

    /// The request itself was unusable (bad id segment, unreadable body).
    BadRequest { message: String },

    /// Anything unexpected from the persistence collaborator or the
    /// pipeline itself. `internal` is logged server-side and only exposed
    /// to clients when the registry runs in development mode.
    Internal {
        message: String,
        internal: Option<String>,
    },
}

impl ApiError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: Option<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal(internal: impl fmt::Display) -> Self {
        Self::Internal {
            message: "Bad request".to_string(),
            internal: Some(internal.to_string()),
        }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } | Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to put in the envelope. Internal detail is only included
    /// when `expose_internal` (development mode) is set; the full detail is
    /// always logged by the caller.
    #[must_use]
    pub fn client_message(&self, expose_internal: bool) -> String {
        match self {
            Self::Config { message } => {
                if expose_internal {
                    format!("Configuration error: {message}")
                } else {
                    "Bad request".to_string()
                }
            }
            Self::NotFound { resource, id } => match id {
                Some(id) => format!("{resource} with id {id} not found"),
                None => format!("{resource} not found"),
            },
            Self::Validation { .. } => "Validation failed".to_string(),
            Self::BadRequest { message } => message.clone(),
            Self::Internal { message, internal } => {
                if expose_internal {
                    internal.clone().unwrap_or_else(|| message.clone())
                } else {
                    message.clone()
                }
            }
        }
    }

    #[must_use]
    pub fn validation_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            Self::Validation { errors } => Some(errors),
            _ => None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message } => write!(f, "configuration error: {message}"),
            Self::NotFound { resource, id } => match id {
                Some(id) => write!(f, "{resource} with id {id} not found"),
                None => write!(f, "{resource} not found"),
            },
            Self::Validation { errors } => write!(f, "validation failed ({} fields)", errors.len()),
            Self::BadRequest { message } => write!(f, "bad request: {message}"),
            Self::Internal { internal, .. } => match internal {
                Some(detail) => write!(f, "internal error: {detail}"),
                None => write!(f, "internal error"),
            },
        }
    }
}

impl std::error::Error for ApiError {}
