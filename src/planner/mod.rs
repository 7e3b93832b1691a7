//! Query planner module
//!
//! Converts SQL AST to LogicalPlan

mod binder;
mod logical_expr;
mod logical_plan;
mod schema;

pub use binder::*;
pub use logical_expr::*;
pub use logical_plan::*;
pub use schema::*;
