//! Query optimizer module
//!
//! Rule-based rewrites of logical plans. Every rule preserves results:
//! running the plan unoptimized gives the same rows.

mod rules;

pub use rules::*;

use crate::error::Result;
use crate::planner::LogicalPlan;
use std::sync::Arc;

/// Optimizer trait for plan transformations
pub trait OptimizerRule: Send + Sync {
    /// Name of this rule
    fn name(&self) -> &str;

    /// Apply this rule to the plan
    fn optimize(&self, plan: &LogicalPlan) -> Result<LogicalPlan>;
}

/// Main optimizer that applies rules to logical plans
pub struct Optimizer {
    rules: Vec<Arc<dyn OptimizerRule>>,
    max_iterations: usize,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    pub fn new() -> Self {
        Self::with_rules(vec![
            Arc::new(rules::PredicatePushdown),
            Arc::new(rules::ProjectionPushdown),
        ])
    }

    /// Create optimizer with custom rules
    pub fn with_rules(rules: Vec<Arc<dyn OptimizerRule>>) -> Self {
        Self {
            rules,
            max_iterations: 4,
        }
    }

    /// Optimize a logical plan, applying the rules until it stops changing
    pub fn optimize(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        let mut current = plan;

        for iteration in 0..self.max_iterations {
            let mut changed = false;

            for rule in &self.rules {
                let new_plan = rule.optimize(&current)?;
                if new_plan != current {
                    tracing::debug!(rule = rule.name(), iteration, "Optimizer rule changed plan");
                    changed = true;
                    current = new_plan;
                }
            }

            if !changed {
                break;
            }
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{Expr, LogicalPlanBuilder, PlanSchema, SchemaField};
    use crate::types::ScalarValue;
    use arrow::datatypes::DataType;

    fn sample_schema() -> PlanSchema {
        PlanSchema::new(vec![
            SchemaField::new("id", DataType::Int64).with_relation("orders"),
            SchemaField::new("name", DataType::Utf8).with_relation("orders"),
            SchemaField::new("amount", DataType::Float64).with_relation("orders"),
        ])
    }

    #[test]
    fn test_optimizer_is_stable() {
        let plan = LogicalPlanBuilder::scan("orders", sample_schema())
            .filter(
                Expr::qualified_column("orders", "amount")
                    .gt(Expr::literal(ScalarValue::Float64(100.0.into()))),
            )
            .project(vec![Expr::qualified_column("orders", "id")])
            .unwrap()
            .build();

        let optimizer = Optimizer::new();
        let once = optimizer.optimize(plan).unwrap();
        let twice = optimizer.optimize(once.clone()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.schema().len(), 1);
    }
}
