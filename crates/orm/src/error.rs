//! Error types for the persistence engine
//!
//! Every fallible operation of the engine returns [`OrmResult`]. Connection
//! providers report their failures as [`OrmError::Connection`]; the session
//! wraps those with the entity and operation that was being executed when a
//! commit fails.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for engine operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for engine operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// The entity type was never registered with the resolver
    #[error("No metadata registered for entity type '{0}'")]
    MetadataNotFound(String),

    /// Entity metadata is inconsistent (duplicate fields, unknown targets, ...)
    #[error("Invalid entity metadata: {0}")]
    InvalidMetadata(String),

    /// Malformed predicate or token stream
    #[error("Query error: {0}")]
    Query(String),

    /// A required load found no row
    #[error("{entity} with id {id} was not found")]
    EntityNotFound { entity: String, id: i64 },

    /// A version guarded statement affected no rows
    #[error(
        "Concurrency conflict: {entity} with id {id} was changed by another writer (expected version {version})"
    )]
    ConcurrencyConflict {
        entity: String,
        id: i64,
        version: i64,
    },

    /// A delete was blocked by a mandatory, non cascading reference
    #[error("Cannot delete {entity} with id {id}: it is referenced by {referenced_by}.{field}")]
    ReferentialIntegrity {
        entity: String,
        id: i64,
        referenced_by: String,
        field: String,
    },

    /// Entity validation failed before any statement was issued
    #[error("Validation failed for {entity}.{field}: {reason}")]
    Validation {
        entity: String,
        field: String,
        reason: String,
    },

    /// The session was closed
    #[error("The session has been closed")]
    SessionClosed,

    /// An operation was not valid for the current entity or session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failure reported by the connection provider
    #[error("Connection error: {0}")]
    Connection(String),

    /// A commit listener or entity listener refused the commit
    #[error("Listener error: {0}")]
    Listener(String),

    /// A database value could not be converted to the requested type
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A statement failed while a commit was being flushed
    #[error("{operation} of {entity} failed: {source}")]
    CommitFailed {
        operation: String,
        entity: String,
        #[source]
        source: Box<OrmError>,
    },
}

impl OrmError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        OrmError::Connection(message.into())
    }

    /// Create a query error
    pub fn query<S: Into<String>>(message: S) -> Self {
        OrmError::Query(message.into())
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        OrmError::InvalidState(message.into())
    }

    /// Create a conversion error
    pub fn conversion<S: Into<String>>(message: S) -> Self {
        OrmError::Conversion(message.into())
    }

    /// Wrap a failure with the commit step that produced it
    pub fn commit_failed(operation: &str, entity: &str, source: OrmError) -> Self {
        match source {
            // Conflicts and already wrapped failures keep their own identity
            conflict @ OrmError::ConcurrencyConflict { .. } => conflict,
            wrapped @ OrmError::CommitFailed { .. } => wrapped,
            other => OrmError::CommitFailed {
                operation: operation.to_string(),
                entity: entity.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through commit context
    pub fn root_cause(&self) -> &OrmError {
        match self {
            OrmError::CommitFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self.root_cause(), OrmError::ConcurrencyConflict { .. })
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self.root_cause(), OrmError::Connection(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), OrmError::EntityNotFound { .. })
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::InvalidMetadata(format!("Schema description could not be parsed: {}", err))
    }
}
