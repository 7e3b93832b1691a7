//! Error types for the query engine and table catalog

use std::fmt;
use thiserror::Error;

/// Result type alias for engine and catalog operations
pub type Result<T> = std::result::Result<T, QueryError>;

/// Sub-kind of a catalog I/O failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogIoKind {
    /// Underlying filesystem failure
    Io,
    /// Metadata could not be encoded or decoded
    Serde,
    /// A compare-and-set commit lost against a concurrent writer
    Conflict,
    /// Unsupported connection URI or backend
    Unsupported,
    /// Metadata on disk is inconsistent
    Corrupt,
}

impl fmt::Display for CatalogIoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CatalogIoKind::Io => "io",
            CatalogIoKind::Serde => "serde",
            CatalogIoKind::Conflict => "conflict",
            CatalogIoKind::Unsupported => "unsupported",
            CatalogIoKind::Corrupt => "corrupt",
        };
        write!(f, "{}", s)
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Parse error at line {line}, column {column}: {message}")]
    Parse {
        message: String,
        line: u64,
        column: u64,
    },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unbound reference: {0}")]
    UnboundReference(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Duplicate field id: {0}")]
    DuplicateFieldId(u32),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Incompatible transform: {0}")]
    IncompatibleTransform(String),

    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("Execution error in {operator} ({context}): {message}")]
    Execution {
        operator: String,
        context: String,
        message: String,
    },

    #[error("Catalog I/O error ({kind}): {message}")]
    CatalogIo { kind: CatalogIoKind, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error taxonomy exposed across the boundary API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParseError,
    UnknownTable,
    UnboundReference,
    TypeMismatch,
    SchemaMismatch,
    DuplicateFieldId,
    UnknownField,
    IncompatibleTransform,
    TableAlreadyExists,
    ExecutionError,
    CatalogIOError,
    InvalidArgument,
}

impl ErrorKind {
    /// Stable tag for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParseError => "ParseError",
            ErrorKind::UnknownTable => "UnknownTable",
            ErrorKind::UnboundReference => "UnboundReference",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::DuplicateFieldId => "DuplicateFieldId",
            ErrorKind::UnknownField => "UnknownField",
            ErrorKind::IncompatibleTransform => "IncompatibleTransform",
            ErrorKind::TableAlreadyExists => "TableAlreadyExists",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::CatalogIOError => "CatalogIOError",
            ErrorKind::InvalidArgument => "InvalidArgument",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl QueryError {
    /// Build an execution error attributed to an operator
    pub fn execution(
        operator: impl Into<String>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        QueryError::Execution {
            operator: operator.into(),
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn catalog_io(kind: CatalogIoKind, message: impl Into<String>) -> Self {
        QueryError::CatalogIo {
            kind,
            message: message.into(),
        }
    }

    /// Map onto the stable taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Parse { .. } => ErrorKind::ParseError,
            QueryError::UnknownTable(_) => ErrorKind::UnknownTable,
            QueryError::UnboundReference(_) => ErrorKind::UnboundReference,
            QueryError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            QueryError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            QueryError::DuplicateFieldId(_) => ErrorKind::DuplicateFieldId,
            QueryError::UnknownField(_) => ErrorKind::UnknownField,
            QueryError::IncompatibleTransform(_) => ErrorKind::IncompatibleTransform,
            QueryError::TableAlreadyExists(_) => ErrorKind::TableAlreadyExists,
            QueryError::CatalogIo { .. } => ErrorKind::CatalogIOError,
            QueryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            QueryError::Execution { .. }
            | QueryError::Io(_)
            | QueryError::Arrow(_)
            | QueryError::Parquet(_)
            | QueryError::Json(_)
            | QueryError::NotImplemented(_)
            | QueryError::Internal(_) => ErrorKind::ExecutionError,
        }
    }

    /// True for a lost compare-and-set commit, which a caller may retry
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            QueryError::CatalogIo {
                kind: CatalogIoKind::Conflict,
                ..
            }
        )
    }

    /// Wrap an untyped failure as an execution error of `operator`.
    /// Typed taxonomy errors pass through unchanged.
    pub fn in_operator(self, operator: &str, context: impl Into<String>) -> Self {
        match self {
            QueryError::Arrow(e) => QueryError::execution(operator, context, e.to_string()),
            QueryError::Parquet(e) => QueryError::execution(operator, context, e.to_string()),
            QueryError::Io(e) => QueryError::execution(operator, context, e.to_string()),
            QueryError::Internal(msg) => QueryError::execution(operator, context, msg),
            other => other,
        }
    }
}

impl From<sqlparser::parser::ParserError> for QueryError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        let message = match &e {
            sqlparser::parser::ParserError::TokenizerError(m)
            | sqlparser::parser::ParserError::ParserError(m) => m.clone(),
            sqlparser::parser::ParserError::RecursionLimitExceeded => e.to_string(),
        };
        let (line, column) = parse_location(&message).unwrap_or((1, 1));
        QueryError::Parse {
            message,
            line,
            column,
        }
    }
}

/// Extract `Line: N, Column: M` from a sqlparser message
fn parse_location(message: &str) -> Option<(u64, u64)> {
    let re = regex::Regex::new(r"Line: (\d+), Column: (\d+)").ok()?;
    let caps = re.captures(message)?;
    let line = caps.get(1)?.as_str().parse().ok()?;
    let column = caps.get(2)?.as_str().parse().ok()?;
    Some((line, column))
}
