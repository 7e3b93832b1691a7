//! Predicate pushdown optimization rule

use crate::error::Result;
use crate::optimizer::OptimizerRule;
use crate::planner::{Expr, FilterNode, JoinType, LogicalPlan, ScanNode};
use std::sync::Arc;

/// Copies filter conjuncts into the scans they constrain.
///
/// The Filter node is kept, so a scan filter only has to be conservative:
/// sources use it to skip data (partition pruning) and may ignore it.
/// Predicates travel through inner and cross joins to both sides, and
/// through left joins to the preserved side only.
pub struct PredicatePushdown;

impl OptimizerRule for PredicatePushdown {
    fn name(&self) -> &str {
        "PredicatePushdown"
    }

    fn optimize(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        self.pushdown(plan, &[])
    }
}

impl PredicatePushdown {
    fn pushdown(&self, plan: &LogicalPlan, predicates: &[Expr]) -> Result<LogicalPlan> {
        match plan {
            LogicalPlan::Filter(node) => {
                let mut all_predicates = predicates.to_vec();
                for term in node.predicate.split_conjunction() {
                    if !all_predicates.contains(term) {
                        all_predicates.push(term.clone());
                    }
                }
                let input = self.pushdown(&node.input, &all_predicates)?;
                Ok(LogicalPlan::Filter(FilterNode {
                    input: Arc::new(input),
                    predicate: node.predicate.clone(),
                }))
            }

            LogicalPlan::Scan(node) => {
                let pushable: Vec<Expr> = predicates
                    .iter()
                    .filter(|p| self.can_push_to_scan(p, node))
                    .cloned()
                    .collect();
                if pushable.is_empty() {
                    return Ok(plan.clone());
                }

                Ok(LogicalPlan::Scan(ScanNode {
                    filter: pushable.into_iter().reduce(Expr::and),
                    ..node.clone()
                }))
            }

            LogicalPlan::Join(node) => {
                let right_predicates: &[Expr] = match node.join_type {
                    JoinType::Inner | JoinType::Cross => predicates,
                    // Filtering the right input of a left join changes which
                    // left rows are null-extended
                    JoinType::Left => &[],
                };
                let left = self.pushdown(&node.left, predicates)?;
                let right = self.pushdown(&node.right, right_predicates)?;

                plan.with_new_children(vec![Arc::new(left), Arc::new(right)])
            }

            // Predicates above these nodes refer to their outputs, not the scan
            LogicalPlan::Project(_)
            | LogicalPlan::Aggregate(_)
            | LogicalPlan::Sort(_)
            | LogicalPlan::Limit(_) => {
                let children = plan
                    .children()
                    .into_iter()
                    .map(|child| self.pushdown(child, &[]).map(Arc::new))
                    .collect::<Result<Vec<_>>>()?;
                plan.with_new_children(children)
            }

            LogicalPlan::Insert(_) | LogicalPlan::EmptyRelation(_) => Ok(plan.clone()),
        }
    }

    /// True if every column of `expr` belongs to the scan's relation
    fn can_push_to_scan(&self, expr: &Expr, scan: &ScanNode) -> bool {
        let columns = expr.columns();
        !columns.is_empty()
            && columns.iter().all(|col| {
                col.relation.as_deref() == Some(scan.relation.as_str())
                    && scan.schema.resolve_column(col).is_ok()
            })
    }
}
