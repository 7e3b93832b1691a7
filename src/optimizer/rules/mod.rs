//! Optimizer rules

mod predicate_pushdown;
mod projection_pushdown;

pub use predicate_pushdown::PredicatePushdown;
pub use projection_pushdown::ProjectionPushdown;
