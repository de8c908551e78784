//! Reconciliation error types

use thiserror::Error;

/// Errors produced by the reconciliation core.
///
/// Remote-facing variants carry the resource identity and the last
/// known status/message so an operator can diagnose a failure without
/// re-querying the remote system.
#[derive(Error, Debug)]
pub enum ConvergeError {
    /// The identified remote object does not exist. Callers decide
    /// whether this means "drop from tracked state" or a hard failure.
    #[error("Resource not found: {id}")]
    NotFound { id: String },

    /// The remote API rejected the payload. Never retried.
    #[error("Validation rejected for {id}: {message}")]
    Validation { id: String, message: String },

    /// A transient remote failure, candidate for the retry policy.
    /// Carries the identity of the resource the call targeted (or a
    /// placeholder for create, where none exists yet).
    #[error("Transient error for {id} ({code}): {message}")]
    Transient {
        id: String,
        code: String,
        message: String,
    },

    /// A patch was requested for an attribute the addressing scheme
    /// marks immutable. Programmer error; fails fast at build time.
    #[error("Attribute is immutable and cannot be patched: {path}")]
    ImmutableAttribute { path: String },

    /// A patch was requested for a path the addressing scheme does not
    /// know how to express.
    #[error("No wire address for attribute path: {path}")]
    Unaddressable { path: String },

    /// A value cannot be rendered as a single wire string (e.g. a
    /// whole collection in a scalar position).
    #[error("Value at {path} has no scalar wire encoding")]
    Unencodable { path: String },

    /// Duplicate attribute path within one attribute set.
    #[error("Duplicate attribute path: {path}")]
    DuplicateAttribute { path: String },

    /// An attribute was declared both user-managed and computed-only.
    #[error("Attribute flags conflict (user_managed and computed_only): {path}")]
    ConflictingFlags { path: String },

    /// The waiter's deadline elapsed before a stable target status.
    #[error("Timed out waiting for {id} to converge (last status: {last_status}): {message}")]
    ConvergenceTimeout {
        id: String,
        last_status: String,
        message: String,
    },

    /// The waiter observed an explicit terminal-failure status.
    #[error("Resource {id} entered failure status {status}: {message}")]
    ConvergenceFailed {
        id: String,
        status: String,
        message: String,
    },

    /// The waiter observed a status outside the pending, target, and
    /// failure sets.
    #[error("Resource {id} reported unexpected status: {status}")]
    UnexpectedStatus { id: String, status: String },
}

impl ConvergeError {
    /// Whether this error originates from the remote system and may
    /// clear up on its own (subject to the retryable-condition check).
    pub fn is_transient(&self) -> bool {
        matches!(self, ConvergeError::Transient { .. })
    }

    /// Whether this error means the remote object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConvergeError::NotFound { .. })
    }

    /// Error code for transient errors, empty otherwise.
    pub fn code(&self) -> &str {
        match self {
            ConvergeError::Transient { code, .. } => code,
            _ => "",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvergeError>;
