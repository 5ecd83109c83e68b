//! Error types for typequery

use thiserror::Error;

/// Result type alias for typequery operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Errors recorded while a query is being built.
///
/// Build errors are local to one query value: they are stored on the
/// descriptor as soon as the offending operator is called and returned by the
/// first compile or terminal call. Callers can inspect them with
/// [`crate::Query::build_error`] and recover with
/// [`crate::Query::take_build_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Operand type is incompatible with the field type.
    #[error("Type mismatch on '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// A property path does not exist in the entity schema.
    #[error("Unknown property path '{path}' on entity '{entity}'")]
    UnknownFieldPath { entity: String, path: String },

    /// The builder was used in an unsupported way (unbalanced junctions, missing projection, ...).
    #[error("Invalid query: {0}")]
    InvalidUsage(String),
}

/// Error types for query building, compilation and execution
#[derive(Debug, Error)]
pub enum OrmError {
    /// The query was built with an invalid operator, operand or path.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Internal compiler invariant violation.
    #[error("Compilation error: {0}")]
    Compilation(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Storage collaborator failure (non-Postgres backends)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// More rows than the operation allows
    #[error("Too many rows: expected {expected}, got {got}")]
    TooManyRows { expected: usize, got: usize },

    /// NOWAIT row lock could not be acquired
    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    /// A locking query was issued outside of a transaction
    #[error("Transaction required: {0}")]
    TransactionRequired(String),

    /// The iterator was already closed
    #[error("Query iterator is closed")]
    IteratorClosed,

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a too-many-rows error
    pub fn too_many_rows(expected: usize, got: usize) -> Self {
        Self::TooManyRows { expected, got }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a too-many-rows error
    pub fn is_too_many_rows(&self) -> bool {
        matches!(self, Self::TooManyRows { .. })
    }

    /// Check if this is a lock conflict error
    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self, Self::LockUnavailable(_))
    }

    /// Check if this is a type mismatch build error
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, Self::Build(BuildError::TypeMismatch { .. }))
    }

    /// Check if this is an unknown property path build error
    pub fn is_unknown_field_path(&self) -> bool {
        matches!(self, Self::Build(BuildError::UnknownFieldPath { .. }))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            // lock_not_available, raised by FOR UPDATE NOWAIT
            if db_err.code().code() == "55P03" {
                return Self::LockUnavailable(db_err.message().to_string());
            }
        }
        Self::Query(err)
    }
}
