//! Data file pruning against pushed-down predicates
//!
//! Evaluation is conservative: anything that cannot be decided from the
//! partition tuple keeps the file.

use super::{PartitionField, PartitionSpec};
use crate::planner::{BinaryOp, Column, Expr};
use crate::types::{ScalarValue, Schema};
use std::cmp::Ordering;

impl PartitionSpec {
    /// Whether a data file with partition tuple `partition` may hold rows
    /// satisfying `predicate`
    pub fn might_contain(&self, partition: &[ScalarValue], predicate: &Expr, schema: &Schema) -> bool {
        if self.is_unpartitioned() || partition.len() != self.fields().len() {
            return true;
        }
        match predicate {
            Expr::BinaryExpr { left, op, right } => match op {
                BinaryOp::And => {
                    self.might_contain(partition, left, schema)
                        && self.might_contain(partition, right, schema)
                }
                BinaryOp::Or => {
                    self.might_contain(partition, left, schema)
                        || self.might_contain(partition, right, schema)
                }
                _ => match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(col), Expr::Literal(lit)) => {
                        self.check_comparison(partition, schema, col, *op, lit)
                    }
                    (Expr::Literal(lit), Expr::Column(col)) => match flip(*op) {
                        Some(op) => self.check_comparison(partition, schema, col, op, lit),
                        None => true,
                    },
                    _ => true,
                },
            },
            Expr::InList {
                expr,
                list,
                negated: false,
            } => match expr.as_ref() {
                Expr::Column(col) => {
                    let literals: Option<Vec<&ScalarValue>> = list
                        .iter()
                        .map(|e| match e {
                            Expr::Literal(v) => Some(v),
                            _ => None,
                        })
                        .collect();
                    match literals {
                        Some(literals) => literals.iter().any(|lit| {
                            self.check_comparison(partition, schema, col, BinaryOp::Eq, lit)
                        }),
                        None => true,
                    }
                }
                _ => true,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated: false,
            } => match (expr.as_ref(), low.as_ref(), high.as_ref()) {
                (Expr::Column(col), Expr::Literal(lo), Expr::Literal(hi)) => {
                    self.check_comparison(partition, schema, col, BinaryOp::GtEq, lo)
                        && self.check_comparison(partition, schema, col, BinaryOp::LtEq, hi)
                }
                _ => true,
            },
            Expr::Alias { expr, .. } => self.might_contain(partition, expr, schema),
            _ => true,
        }
    }

    /// `col op lit` against every partition field sourced from `col`
    fn check_comparison(
        &self,
        partition: &[ScalarValue],
        schema: &Schema,
        col: &Column,
        op: BinaryOp,
        literal: &ScalarValue,
    ) -> bool {
        let source = match col.field_id {
            Some(id) => schema.field_by_id(id),
            None => schema.resolve(&col.name).ok(),
        };
        let Some(source) = source else {
            return true;
        };
        // Comparisons with NULL are never true
        if literal.is_null() {
            return false;
        }
        let Ok(literal) = source.coerce_scalar(literal) else {
            return true;
        };

        self.fields()
            .iter()
            .zip(partition)
            .filter(|(field, _)| field.source_field_id == source.id)
            .all(|(field, value)| field_might_match(field, value, op, &literal))
    }
}

fn field_might_match(
    field: &PartitionField,
    value: &ScalarValue,
    op: BinaryOp,
    literal: &ScalarValue,
) -> bool {
    if !field.transform.preserves_order() {
        return true;
    }
    let Ok(transformed) = field.transform.apply_scalar(literal) else {
        return true;
    };
    // Rows whose source value is NULL land in the null partition and
    // never satisfy a comparison
    if value.is_null() {
        return false;
    }
    let Some(ordering) = value.compare(&transformed) else {
        return true;
    };
    let identity = matches!(field.transform, super::Transform::Identity);

    match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::NotEq => !(identity && ordering == Ordering::Equal),
        BinaryOp::Lt if identity => ordering == Ordering::Less,
        BinaryOp::Gt if identity => ordering == Ordering::Greater,
        BinaryOp::Lt | BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt | BinaryOp::GtEq => ordering != Ordering::Less,
        _ => true,
    }
}

/// Mirror a comparison so the column is on the left
fn flip(op: BinaryOp) -> Option<BinaryOp> {
    match op {
        BinaryOp::Eq => Some(BinaryOp::Eq),
        BinaryOp::NotEq => Some(BinaryOp::NotEq),
        BinaryOp::Lt => Some(BinaryOp::Gt),
        BinaryOp::LtEq => Some(BinaryOp::GtEq),
        BinaryOp::Gt => Some(BinaryOp::Lt),
        BinaryOp::GtEq => Some(BinaryOp::LtEq),
        _ => None,
    }
}
