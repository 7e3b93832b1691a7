//! Projection pushdown optimization rule

use crate::error::Result;
use crate::optimizer::OptimizerRule;
use crate::planner::{Column, Expr, LogicalPlan, ScanNode};
use std::collections::HashSet;
use std::sync::Arc;

/// Projection pushdown rule - annotates scans with the columns the plan uses
pub struct ProjectionPushdown;

impl OptimizerRule for ProjectionPushdown {
    fn name(&self) -> &str {
        "ProjectionPushdown"
    }

    fn optimize(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        // Collect all required columns from top and push down
        let required = self.collect_required_columns(plan);
        self.pushdown(plan, &required)
    }
}

impl ProjectionPushdown {
    fn collect_required_columns(&self, plan: &LogicalPlan) -> HashSet<Column> {
        let mut required = HashSet::new();
        self.collect_recursive(plan, &mut required);
        required
    }

    fn collect_recursive(&self, plan: &LogicalPlan, required: &mut HashSet<Column>) {
        let mut exprs: Vec<&Expr> = Vec::new();
        match plan {
            LogicalPlan::Scan(node) => exprs.extend(node.filter.iter()),
            LogicalPlan::Filter(node) => exprs.push(&node.predicate),
            LogicalPlan::Project(node) => exprs.extend(node.exprs.iter()),
            LogicalPlan::Join(node) => {
                for (l, r) in &node.on {
                    exprs.push(l);
                    exprs.push(r);
                }
                exprs.extend(node.filter.iter());
            }
            LogicalPlan::Aggregate(node) => {
                exprs.extend(node.group_by.iter());
                exprs.extend(node.aggregates.iter());
            }
            LogicalPlan::Sort(node) => exprs.extend(node.order_by.iter().map(|s| &s.expr)),
            LogicalPlan::Limit(_) | LogicalPlan::Insert(_) | LogicalPlan::EmptyRelation(_) => {}
        }

        for expr in exprs {
            required.extend(expr.columns());
        }
        for child in plan.children() {
            self.collect_recursive(child, required);
        }
    }

    fn pushdown(&self, plan: &LogicalPlan, required: &HashSet<Column>) -> Result<LogicalPlan> {
        match plan {
            LogicalPlan::Scan(node) => Ok(LogicalPlan::Scan(ScanNode {
                projection: self.scan_projection(node, required),
                ..node.clone()
            })),
            LogicalPlan::Insert(_) | LogicalPlan::EmptyRelation(_) => Ok(plan.clone()),
            _ => {
                let children = plan
                    .children()
                    .into_iter()
                    .map(|child| self.pushdown(child, required).map(Arc::new))
                    .collect::<Result<Vec<_>>>()?;
                plan.with_new_children(children)
            }
        }
    }

    /// Indices of the scan columns some node references; `None` when all are
    fn scan_projection(&self, scan: &ScanNode, required: &HashSet<Column>) -> Option<Vec<usize>> {
        let mut indices: Vec<usize> = scan
            .schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| {
                required.iter().any(|col| {
                    col.name == field.name
                        && match &col.relation {
                            Some(relation) => *relation == scan.relation,
                            // Unqualified names may come from any input
                            None => true,
                        }
                })
            })
            .map(|(i, _)| i)
            .collect();

        if indices.len() == scan.schema.len() {
            return None;
        }
        if indices.is_empty() {
            // Row counts still matter (COUNT(*)): keep one column
            indices.push(0);
        }
        Some(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{AggregateFunction, JoinType, LogicalPlanBuilder, PlanSchema, SchemaField};
    use arrow::datatypes::DataType;

    fn sample_schema() -> PlanSchema {
        PlanSchema::new(vec![
            SchemaField::new("id", DataType::Int64).with_relation("orders"),
            SchemaField::new("name", DataType::Utf8).with_relation("orders"),
            SchemaField::new("amount", DataType::Float64).with_relation("orders"),
        ])
    }

    fn scan_projection(plan: &LogicalPlan) -> Option<Vec<usize>> {
        match plan {
            LogicalPlan::Scan(scan) => scan.projection.clone(),
            other => other.children().into_iter().find_map(scan_projection),
        }
    }

    #[test]
    fn test_projection_pushdown() {
        let plan = LogicalPlanBuilder::scan("orders", sample_schema())
            .project(vec![
                Expr::qualified_column("orders", "amount"),
                Expr::qualified_column("orders", "id"),
            ])
            .unwrap()
            .build();

        let optimized = ProjectionPushdown.optimize(&plan).unwrap();
        assert_eq!(scan_projection(&optimized), Some(vec![0, 2]));
        // Output schema is unaffected
        assert_eq!(optimized.schema(), plan.schema());
    }

    #[test]
    fn test_join_schema_follows_narrowed_inputs() {
        let customers = PlanSchema::new(vec![
            SchemaField::new("id", DataType::Int64).with_relation("customers"),
            SchemaField::new("city", DataType::Utf8).with_relation("customers"),
        ]);
        for join_type in [JoinType::Inner, JoinType::Left, JoinType::Cross] {
            let on = match join_type {
                JoinType::Cross => vec![],
                _ => vec![(
                    Expr::qualified_column("orders", "id"),
                    Expr::qualified_column("customers", "id"),
                )],
            };
            let plan = LogicalPlanBuilder::scan("orders", sample_schema())
                .join(
                    LogicalPlanBuilder::scan("customers", customers.clone()).build(),
                    join_type,
                    on,
                    None,
                )
                .project(vec![Expr::qualified_column("orders", "amount")])
                .unwrap()
                .build();

            let optimized = ProjectionPushdown.optimize(&plan).unwrap();
            let LogicalPlan::Project(project) = &optimized else {
                panic!("expected a projection, got {}", optimized);
            };
            let LogicalPlan::Join(join) = project.input.as_ref() else {
                panic!("expected a join, got {}", project.input);
            };
            let expected = join.left.schema().len() + join.right.schema().len();
            assert_eq!(join.schema.len(), expected, "{}", join_type);
            assert!(expected < plan.children()[0].schema().len(), "{}", join_type);
            assert_eq!(optimized.schema(), plan.schema());
        }
    }

    #[test]
    fn test_count_star_keeps_one_column() {
        let plan = LogicalPlanBuilder::scan("orders", sample_schema())
            .aggregate(
                vec![],
                vec![Expr::Aggregate {
                    func: AggregateFunction::Count,
                    args: vec![Expr::Wildcard],
                }],
            )
            .unwrap()
            .build();

        let optimized = ProjectionPushdown.optimize(&plan).unwrap();
        assert_eq!(scan_projection(&optimized), Some(vec![0]));
    }
}
