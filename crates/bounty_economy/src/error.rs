//! # Economy Error Types
//!
//! All errors that can occur in the economy system.

use thiserror::Error;

/// Errors that can occur in the economy system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    /// Caller input was missing or malformed. Nothing was touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown donation, placement, store item or record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not allowed in the current state
    /// (expired/fulfilled donation, insufficient funds, wrong placement state...).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Storage, wallet or encoding failure not attributable to the caller.
    #[error("internal error: {0}")]
    Internal(String),

    /// A version-checked write lost against a concurrent writer.
    #[error("concurrent modification of {collection}/{key} owned by {owner_id}")]
    ConcurrentModification {
        /// Storage collection.
        collection: String,
        /// Storage key.
        key: String,
        /// Owner of the object.
        owner_id: String,
    },

    /// A multi-step operation failed and at least one compensation also failed.
    ///
    /// External state may be inconsistent and needs reconciliation.
    #[error("{cause} (compensation incomplete: {})", failures.join("; "))]
    PartiallyCompensated {
        /// The failure that triggered the unwind.
        cause: Box<EconomyError>,
        /// One entry per compensation that failed.
        failures: Vec<String>,
    },

    /// The caller's context was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse error classification handed to the RPC layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`EconomyError::InvalidArgument`].
    InvalidArgument,
    /// See [`EconomyError::NotFound`].
    NotFound,
    /// See [`EconomyError::FailedPrecondition`].
    FailedPrecondition,
    /// See [`EconomyError::Internal`].
    Internal,
    /// See [`EconomyError::ConcurrentModification`].
    ConcurrentModification,
    /// See [`EconomyError::Cancelled`].
    Cancelled,
}

impl EconomyError {
    /// Returns the classification of this error.
    ///
    /// A partially compensated failure reports the kind of its cause.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::InvalidConfig(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            Self::Internal(_) => ErrorKind::Internal,
            Self::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::PartiallyCompensated { cause, .. } => cause.kind(),
        }
    }

    /// Shorthand for an [`EconomyError::InvalidArgument`].
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Shorthand for an [`EconomyError::FailedPrecondition`].
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    /// Shorthand for an [`EconomyError::Internal`].
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<serde_json::Error> for EconomyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("record encoding: {e}"))
    }
}

/// Result type for economy operations.
pub type EconomyResult<T> = Result<T, EconomyError>;
