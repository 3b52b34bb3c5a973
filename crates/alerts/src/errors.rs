//! Error types for the alerts crate.

use thiserror::Error;

/// Broad error category, used by outer layers to pick a response class and
/// a localized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input rejected before any state was touched
    Validation,
    /// Caller is not allowed to perform the operation
    Authorization,
    /// Referenced entity does not exist
    NotFound,
    /// Operation not valid in the current state
    Conflict,
    /// Infrastructure failure; the caller may retry
    Transient,
    /// Caller cancelled or the deadline passed
    Cancelled,
}

/// Comprehensive error types for the alerting core
#[derive(Error, Debug, Clone)]
pub enum AlertError {
    // Validation errors
    #[error("Invalid location: {field} {value} is out of range")]
    InvalidLocation { field: &'static str, value: f64 },

    #[error("Invalid phone number: {reason}")]
    InvalidPhoneFormat { reason: String },

    #[error("Invalid argument '{field}': {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    // Authorization errors
    #[error("Session '{session_id}' must be verified to report alerts")]
    Unauthenticated { session_id: String },

    #[error("Session '{session_id}' may not modify alert '{alert_id}'")]
    Forbidden {
        alert_id: String,
        session_id: String,
    },

    // Lookup errors
    #[error("Alert '{alert_id}' not found")]
    NotFound { alert_id: String },

    #[error("Session '{session_id}' not found")]
    UnknownSession { session_id: String },

    // Session state machine errors
    #[error("Cannot {action} session '{session_id}' while {phase}")]
    InvalidTransition {
        session_id: String,
        phase: String,
        action: &'static str,
    },

    #[error("Verification code for session '{session_id}' has expired")]
    CodeExpired { session_id: String },

    #[error("Verification code mismatch for session '{session_id}' ({attempts_remaining} attempts left)")]
    CodeMismatch {
        session_id: String,
        attempts_remaining: u32,
    },

    #[error("Too many verification attempts for session '{session_id}', request a new code")]
    VerificationAttemptsExhausted { session_id: String },

    // Infrastructure errors
    #[error("Verification transport unavailable: {reason}")]
    VerificationUnavailable { reason: String },

    #[error("Location unavailable: {reason}")]
    LocationUnavailable { reason: String },

    #[error("Storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    // General errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl AlertError {
    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidLocation { .. }
            | Self::InvalidPhoneFormat { .. }
            | Self::InvalidArgument { .. }
            | Self::CodeExpired { .. }
            | Self::CodeMismatch { .. }
            | Self::VerificationAttemptsExhausted { .. } => ErrorKind::Validation,
            Self::Unauthenticated { .. } | Self::Forbidden { .. } => ErrorKind::Authorization,
            Self::NotFound { .. } | Self::UnknownSession { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::VerificationUnavailable { .. }
            | Self::LocationUnavailable { .. }
            | Self::StorageUnavailable { .. }
            | Self::Internal { .. } => ErrorKind::Transient,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Name of the offending input field, when there is one.
    #[must_use]
    pub const fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidLocation { field, .. } | Self::InvalidArgument { field, .. } => {
                Some(*field)
            }
            Self::InvalidPhoneFormat { .. } => Some("phone_number"),
            Self::CodeExpired { .. }
            | Self::CodeMismatch { .. }
            | Self::VerificationAttemptsExhausted { .. } => Some("code"),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AlertError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageUnavailable {
            reason: format!("corrupt record: {err}"),
        }
    }
}

/// Result type alias for alerting operations
pub type AlertResult<T> = Result<T, AlertError>;
