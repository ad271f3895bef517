//! Error types for the social arena service
//!
//! Domain operations return [`ArenaError`]; bootstrap and service wiring use
//! `anyhow` the same way configuration loading does.

/// Result type alias for domain operations
pub type Result<T> = std::result::Result<T, ArenaError>;

/// Coarse error families, used to pick HTTP status codes and log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    NotFound,
    Infrastructure,
}

/// Errors raised by the match store, state machine, queue and transport
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArenaError {
    #[error("{reason}")]
    Validation { reason: String },

    #[error("{reason}")]
    Unauthorized { reason: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Internal service error: {message}")]
    Internal { message: String },
}

impl ArenaError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error family this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArenaError::Validation { .. } => ErrorKind::Validation,
            ArenaError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ArenaError::NotFound { .. } => ErrorKind::NotFound,
            ArenaError::Persistence { .. }
            | ArenaError::Protocol { .. }
            | ArenaError::Internal { .. } => ErrorKind::Infrastructure,
        }
    }

    /// Whether the error is the caller's fault rather than the service's
    pub fn is_caller_error(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Infrastructure)
    }
}

/// Shorthand for mapping a poisoned lock into an internal error
pub(crate) fn lock_poisoned(name: &str) -> ArenaError {
    ArenaError::internal(format!("Failed to acquire {} lock", name))
}
