//! Error types for the cayx persistence engine.
//!
//! All public APIs return `CayxResult<T>`; no panics in library code.

use thiserror::Error;

/// Unified error type for all cayx operations.
#[derive(Debug, Error)]
pub enum CayxError {
    /// Metadata or runtime configuration error (missing DbAttribute, unknown
    /// entity, unmapped adapter, ...). Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Translator invariant violation (alias not found, malformed join tree).
    #[error("translation error: {message}\nContext: {context}")]
    Translation { message: String, context: String },

    /// Expression string could not be parsed
    #[error("expression parse error: {message}\nExpression: {expression}")]
    ExpressionParse { message: String, expression: String },

    /// Commit failed and the transaction was rolled back
    #[error("commit failed: {message}")]
    Commit {
        message: String,
        #[source]
        source: Option<Box<CayxError>>,
    },

    /// Insert/update/delete of an object mapped as read-only
    #[error("attempt to {operation} a read-only entity '{entity}'")]
    ReadOnlyEntity { entity: String, operation: String },

    /// Relationship between objects registered in different contexts
    #[error("cross-context relationship: {0}")]
    CrossContext(String),

    /// Hollow object could not be resolved
    #[error("fault failure: {0}")]
    FaultFailure(String),

    /// UPDATE/DELETE matched no row with the expected snapshot
    #[error("optimistic lock failure on '{entity}': {message}")]
    OptimisticLock { entity: String, message: String },

    /// Object failed validation before commit
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Delete blocked by a DENY delete rule
    #[error("delete denied for '{entity}' via relationship '{relationship}'")]
    DeleteDenied { entity: String, relationship: String },

    /// Invalid operation
    #[error("invalid operation: {message}\nContext: {context}")]
    InvalidOperation { message: String, context: String },

    /// Feature not supported by the translator or adapter
    #[error("not supported: {0}")]
    NotSupported(String),

    /// SQL driver error
    #[error("SQL error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },

    /// Standard I/O error
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for all cayx operations.
pub type CayxResult<T> = Result<T, CayxError>;

impl CayxError {
    pub(crate) fn translation(message: impl Into<String>, context: impl Into<String>) -> Self {
        CayxError::Translation {
            message: message.into(),
            context: context.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>, context: impl Into<String>) -> Self {
        CayxError::InvalidOperation {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Wraps an execution failure as a commit error, keeping the cause.
    pub(crate) fn commit(source: CayxError) -> Self {
        match source {
            // already descriptive enough on their own
            e @ (CayxError::Commit { .. }
            | CayxError::OptimisticLock { .. }
            | CayxError::ReadOnlyEntity { .. }
            | CayxError::Validation(_)) => e,
            other => CayxError::Commit {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}

impl From<serde_json::Error> for CayxError {
    fn from(err: serde_json::Error) -> Self {
        CayxError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn error_display_configuration() {
        let err = CayxError::Configuration("no DbAttribute for 'artistName'".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: no DbAttribute for 'artistName'"
        );
    }

    #[test]
    fn error_display_read_only() {
        let err = CayxError::ReadOnlyEntity {
            entity: "ROArtist".to_string(),
            operation: "insert".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "attempt to insert a read-only entity 'ROArtist'"
        );
    }

    #[test]
    fn error_display_validation_joins_failures() {
        let err = CayxError::Validation(vec![
            "Artist.artistName is required".to_string(),
            "Painting.paintingTitle is too long".to_string(),
        ]);
        assert!(err.to_string().contains("artistName is required; Painting"));
    }

    #[test]
    fn commit_wraps_cause() {
        let err = CayxError::commit(CayxError::Io {
            source: std::io::Error::other("connection reset"),
        });
        assert!(matches!(err, CayxError::Commit { .. }));
        assert!(err.to_string().contains("connection reset"));
        assert!(err.source().is_some());
    }

    #[test]
    fn commit_keeps_specific_errors() {
        let err = CayxError::commit(CayxError::OptimisticLock {
            entity: "Artist".to_string(),
            message: "no row updated".to_string(),
        });
        assert!(matches!(err, CayxError::OptimisticLock { .. }));
    }

    #[test]
    fn cayx_result_err() {
        let result: CayxResult<i32> = Err(CayxError::FaultFailure("Artist<1>".to_string()));
        assert!(result.is_err());
    }
}
