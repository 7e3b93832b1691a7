//! Columnar SQL execution engine over CSV files and Iceberg-style tables
//!
//! Queries are parsed with sqlparser, bound against registered sources,
//! rewritten by a rule-based optimizer and executed by Arrow-based physical
//! operators. Catalog tables keep snapshot history and partitioned Parquet
//! data files; inserts commit a new snapshot through the catalog.

pub mod api;
pub mod catalog;
pub mod error;
pub mod execution;
pub mod optimizer;
pub mod parser;
pub mod partition;
pub mod physical;
pub mod planner;
pub mod storage;
pub mod types;

pub use catalog::{open_catalog, Catalog, TableIdent, TableMetadata};
pub use error::{ErrorKind, QueryError, Result};
pub use execution::{ExecutionConfig, ExecutionContext, QueryMetrics, QueryResult, SourceDescriptor};
pub use planner::{Binder, LogicalPlan};
pub use types::{ColumnarBatch, PrimitiveType, ScalarValue, Schema};
