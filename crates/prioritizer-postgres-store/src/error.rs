//! Error types for the Postgres-backed `PersistentStore`.

use thiserror::Error;

/// Errors that can occur while talking to Postgres on behalf of
/// [`crate::PostgresStore`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PostgresStoreError {
    /// Postgres connection or query error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// JSON (de)serialization error on a JSONB column.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A row the caller expected to exist was absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A table/column name failed identifier validation before being
    /// interpolated into SQL.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Anything else.
    #[error("{0}")]
    Generic(String),
}

/// Converts a store error into the engine's error taxonomy (§7): a missing
/// row becomes `NotFound`, everything else is an `UpstreamUnavailable` the
/// retry queue can act on.
impl From<PostgresStoreError> for prioritizer_core::error::Error {
    fn from(err: PostgresStoreError) -> Self {
        match err {
            PostgresStoreError::NotFound(msg) => prioritizer_core::error::Error::not_found(msg),
            PostgresStoreError::Json(e) => {
                prioritizer_core::error::Error::validation(format!("json: {e}"))
            }
            PostgresStoreError::Postgres(e) => {
                prioritizer_core::error::Error::upstream_unavailable(format!("postgres: {e}"))
            }
            PostgresStoreError::InvalidIdentifier(msg) => {
                prioritizer_core::error::Error::internal(format!("invalid identifier: {msg}"))
            }
            PostgresStoreError::Generic(msg) => prioritizer_core::error::Error::internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = PostgresStoreError::NotFound("task t1".to_string());
        assert_eq!(err.to_string(), "not found: task t1");
    }

    #[test]
    fn not_found_converts_to_core_not_found() {
        let err = PostgresStoreError::NotFound("session s1".to_string());
        let core_err: prioritizer_core::error::Error = err.into();
        assert!(matches!(core_err, prioritizer_core::error::Error::NotFound(_)));
    }

    #[test]
    fn generic_converts_to_internal() {
        let err = PostgresStoreError::Generic("connection reset".to_string());
        let core_err: prioritizer_core::error::Error = err.into();
        assert!(matches!(core_err, prioritizer_core::error::Error::Internal(_)));
    }

    #[test]
    fn invalid_identifier_display_includes_name() {
        let err = PostgresStoreError::InvalidIdentifier("bad-name".to_string());
        assert!(err.to_string().contains("bad-name"));
    }
}
