//! Partition transform layer
//!
//! Transforms derive partition values from source columns. Specs group
//! them per table, route inserted rows to partition paths and prune data
//! files during scans.

mod pruning;
mod spec;
mod transform;

pub use spec::*;
pub use transform::Transform;
