//! Physical operators

mod filter;
mod hash_agg;
mod hash_join;
mod insert;
mod limit;
mod nested_loop_join;
mod project;
mod scan;
mod sort;

pub use filter::{evaluate_expr, evaluate_filter, FilterExec};
pub use hash_agg::{AggregateExpr, HashAggregateExec};
pub use hash_join::HashJoinExec;
pub use insert::InsertExec;
pub use limit::LimitExec;
pub use nested_loop_join::NestedLoopJoinExec;
pub use project::ProjectExec;
pub use scan::{MemoryTable, SourceScanExec, TableProvider, TableStatistics, ValuesExec};
pub use sort::SortExec;

pub(crate) use scan::project_batches;
