use thiserror::Error;

/// Configuration-time table errors.
///
/// These are raised at registration time only; the runtime mutation surface
/// (set/update/reset) is infallible and silently skips invalid accessors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("a table named {0:?} is already registered")]
    DuplicateTableName(String),

    #[error("table name may not be empty")]
    EmptyTableName,

    #[error("invalid name mapping regex {pattern:?}: {message}")]
    InvalidMappingRegex { pattern: String, message: String },
}
