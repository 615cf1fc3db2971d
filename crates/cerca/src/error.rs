//! Query building and execution error types.

use thiserror::Error;

/// Errors raised while translating criteria or executing queries.
///
/// Parse-time problems are never swallowed: an unknown operator or an
/// unresolvable join path fails the whole build rather than silently
/// widening the result set.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unsupported operator '{operator}' for field '{field}'")]
    UnsupportedOperator { operator: String, field: String },

    #[error("invalid criterion on field '{field}': {message}")]
    InvalidCriterion { field: String, message: String },

    #[error("cannot resolve join path '{path}': unknown relation '{segment}'")]
    UnresolvedJoinPath { path: String, segment: String },

    #[error("unsafe identifier '{name}'")]
    UnsafeIdentifier { name: String },

    #[error("parameter '{name}' referenced but never bound")]
    UnboundParameter { name: String },

    #[error("no persistent filter registered under '{name}'")]
    UnknownFilter { name: String },

    #[error("no macro registered under '{name}'")]
    UnknownMacro { name: String },

    #[error("no result found for criteria {criteria}")]
    NotFound { criteria: String },

    #[error("expected one result for criteria {criteria}, found {count}")]
    MultipleFound { criteria: String, count: u64 },

    #[error("filter callback failed: {0}")]
    Callback(anyhow::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Result type alias using QueryError.
pub type QueryResult<T> = Result<T, QueryError>;
