use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    RemoteFailure,
    Validation,
    Superseded,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Conflict => "CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::RemoteFailure => "REMOTE_FAILURE",
            Self::Validation => "VALIDATION_FAILED",
            Self::Superseded => "SUPERSEDED",
        }
    }

    #[must_use]
    pub const fn http_status_hint(self) -> Option<u16> {
        match self {
            Self::Conflict => Some(409),
            Self::NotFound => Some(404),
            Self::Validation => Some(422),
            Self::RemoteFailure | Self::Superseded => None,
        }
    }
}

/// A single rejected field, as reported by the remote's validation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Network or server-side failure underneath a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFailure {
    pub status: Option<u16>,
    pub message: String,
    pub request_id: Option<String>,
    pub retryable: bool,
}

impl TransportFailure {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            request_id: None,
            retryable: true,
        }
    }

    #[must_use]
    pub fn timeout(timeout_ms: u64) -> Self {
        Self {
            status: None,
            message: format!("timed out after {timeout_ms}ms"),
            request_id: None,
            retryable: true,
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            request_id: None,
            retryable: matches!(status, 408 | 429 | 500..=599),
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TransportFailure {}

/// Errors a [`RemoteCollection`](crate::remote::RemoteCollection) reports.
///
/// Already classified by the remote adapter; the store maps each variant
/// onto exactly one [`StoreError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote record not found: {message}")]
    NotFound { message: String },

    #[error("remote conflict: {message}")]
    Conflict { message: String },

    #[error("remote rejected payload: {message}")]
    Rejected {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("transport failure: {0}")]
    Transport(#[from] TransportFailure),
}

impl RemoteError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            fields: Vec::new(),
        }
    }
}

/// The error surface of the store. Every mutation resolves to one of these
/// or to the reconciled entity; nothing escapes as a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record {id} already has a pending operation")]
    Conflict { id: String, detail: Option<String> },

    #[error("record {id} not found")]
    NotFound { id: String },

    #[error("remote failure: {0}")]
    RemoteFailure(#[source] TransportFailure),

    #[error("validation failed: {message}")]
    ValidationFailure {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("load superseded by a newer request")]
    Superseded,
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn conflict(id: impl fmt::Display) -> Self {
        Self::Conflict {
            id: id.to_string(),
            detail: None,
        }
    }

    pub fn not_found(id: impl fmt::Display) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailure {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Classify a remote failure for the record `id`.
    pub fn from_remote(id: impl fmt::Display, error: RemoteError) -> Self {
        match error {
            RemoteError::NotFound { .. } => Self::not_found(id),
            RemoteError::Conflict { message } => Self::Conflict {
                id: id.to_string(),
                detail: Some(message),
            },
            RemoteError::Rejected { message, fields } => {
                Self::ValidationFailure { message, fields }
            }
            RemoteError::Transport(cause) => Self::RemoteFailure(cause),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::RemoteFailure(_) => ErrorKind::RemoteFailure,
            Self::ValidationFailure { .. } => ErrorKind::Validation,
            Self::Superseded => ErrorKind::Superseded,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Whether a fresh, explicit call from the view layer could succeed.
    /// The store itself never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteFailure(cause) => cause.retryable,
            _ => false,
        }
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::Conflict { detail: None, .. } => {
                "This record is still being saved. Please wait a moment and try again.".into()
            }
            Self::Conflict {
                detail: Some(_), ..
            } => "This action conflicts with a recent change. Please refresh and try again."
                .into(),
            Self::NotFound { .. } => {
                "This record no longer exists. It may have been deleted by someone else.".into()
            }
            Self::RemoteFailure(cause) if cause.retryable => {
                "Unable to reach the server. Please check your connection and try again.".into()
            }
            Self::RemoteFailure(_) => {
                "The server could not complete the request. Please try again later.".into()
            }
            Self::ValidationFailure { message, .. } => message.clone(),
            Self::Superseded => "A newer refresh replaced this one.".into(),
        }
    }
}
