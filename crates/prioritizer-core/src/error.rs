//! Error types for the prioritization orchestration engine.

use thiserror::Error;

/// Errors surfaced by any operation on the engine.
///
/// Variant names track the error Kinds named in the design (validation,
/// not-found, conflict, permission, upstream, timeout, internal) rather than
/// any one collaborator's native error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Input failed a constraint or a strict-JSON schema mismatch.
    #[error("validation error: {0}")]
    Validation(String),

    /// A session, outcome, task, or reflection row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested write conflicts with state that changed underneath it
    /// (session replaced, duplicate manual task, cycle detected on insert).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller does not own the row it is trying to act on.
    #[error("permission denied: {0}")]
    Permission(String),

    /// A collaborator (LLM, embedding service, store) failed transiently;
    /// retriable.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A collaborator failed in a way retrying will not fix (persistent
    /// refusal, invalid credentials).
    #[error("fatal upstream error: {0}")]
    FatalUpstream(String),

    /// A call exceeded its budget (§5 timeouts).
    #[error("timed out: {0}")]
    Timeout(String),

    /// JSON (de)serialization failure not otherwise classified above.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else; preserved for display, never matched on by callers.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn upstream_unavailable(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    pub fn fatal_upstream(msg: impl Into<String>) -> Self {
        Self::FatalUpstream(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors the retry queue and hybrid loop should retry rather
    /// than surface immediately.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_) | Self::Timeout(_))
    }
}

/// Crate-local result alias, matching the teacher's `Result<T>` convention.
pub type Result<T> = std::result::Result<T, Error>;
