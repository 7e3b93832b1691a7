//! Filter operator and vectorized expression evaluation

use crate::error::{QueryError, Result};
use crate::physical::{PhysicalOperator, RecordBatchStream};
use crate::planner::{
    coerce_numeric_types, comparison_type, BinaryOp, Column, Expr, UnaryOp,
};
use arrow::array::{new_null_array, Array, ArrayRef, BooleanArray};
use arrow::compute::kernels::boolean;
use arrow::compute::kernels::cmp;
use arrow::compute::kernels::numeric;
use arrow::compute::{self, CastOptions};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use std::fmt;
use std::sync::Arc;

/// Filter execution operator
#[derive(Debug)]
pub struct FilterExec {
    input: Arc<dyn PhysicalOperator>,
    predicate: Expr,
    schema: SchemaRef,
}

impl FilterExec {
    pub fn new(input: Arc<dyn PhysicalOperator>, predicate: Expr) -> Self {
        let schema = input.schema();
        Self {
            input,
            predicate,
            schema,
        }
    }
}

#[async_trait]
impl PhysicalOperator for FilterExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![self.input.clone()]
    }

    async fn execute(&self, partition: usize) -> Result<RecordBatchStream> {
        let input_stream = self.input.execute(partition).await?;
        let predicate = self.predicate.clone();

        let filtered_stream = input_stream.and_then(move |batch| {
            let result = evaluate_filter(&batch, &predicate)
                .map_err(|e| e.in_operator("Filter", predicate.to_string()));
            async move { result }
        });

        Ok(Box::pin(filtered_stream))
    }

    fn name(&self) -> &str {
        "Filter"
    }

    fn output_partitions(&self) -> usize {
        // Filter preserves partitioning
        self.input.output_partitions()
    }
}

impl fmt::Display for FilterExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter: {}", self.predicate)
    }
}

/// Keep the rows where `predicate` is TRUE; NULL drops the row
pub fn evaluate_filter(batch: &RecordBatch, predicate: &Expr) -> Result<RecordBatch> {
    let mask = as_boolean(&evaluate_expr(batch, predicate)?, "filter predicate")?;
    compute::filter_record_batch(batch, &mask).map_err(Into::into)
}

/// Evaluate an expression over every row of a batch
pub fn evaluate_expr(batch: &RecordBatch, expr: &Expr) -> Result<ArrayRef> {
    match expr {
        Expr::Column(col) => {
            let idx = find_column_index(batch, col)?;
            Ok(batch.column(idx).clone())
        }

        Expr::Literal(value) => Ok(value.to_array(batch.num_rows())),

        Expr::BinaryExpr { left, op, right } => {
            let left_arr = evaluate_expr(batch, left)?;
            let right_arr = evaluate_expr(batch, right)?;
            evaluate_binary_op(&left_arr, *op, &right_arr)
        }

        Expr::UnaryExpr { op, expr } => {
            let arr = evaluate_expr(batch, expr)?;
            evaluate_unary_op(*op, &arr)
        }

        Expr::Cast { expr, data_type } => {
            let arr = evaluate_expr(batch, expr)?;
            cast_strict(&arr, data_type)
        }

        Expr::Alias { expr, .. } => evaluate_expr(batch, expr),

        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate_expr(batch, expr)?;
            let list_values = list
                .iter()
                .map(|e| evaluate_expr(batch, e))
                .collect::<Result<Vec<_>>>()?;
            evaluate_in_list(&value, &list_values, *negated)
        }

        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = evaluate_expr(batch, expr)?;
            let low_val = evaluate_expr(batch, low)?;
            let high_val = evaluate_expr(batch, high)?;

            let ge_low = evaluate_binary_op(&value, BinaryOp::GtEq, &low_val)?;
            let le_high = evaluate_binary_op(&value, BinaryOp::LtEq, &high_val)?;
            let result = boolean::and_kleene(
                &as_boolean(&ge_low, "BETWEEN")?,
                &as_boolean(&le_high, "BETWEEN")?,
            )?;

            if *negated {
                Ok(Arc::new(boolean::not(&result)?))
            } else {
                Ok(Arc::new(result))
            }
        }

        Expr::Aggregate { .. } | Expr::Wildcard => Err(QueryError::Internal(format!(
            "{} cannot be evaluated per row",
            expr
        ))),
    }
}

fn find_column_index(batch: &RecordBatch, col: &Column) -> Result<usize> {
    let schema = batch.schema();

    if let Some(relation) = &col.relation {
        let qualified = format!("{}.{}", relation, col.name);
        if let Ok(idx) = schema.index_of(&qualified) {
            return Ok(idx);
        }
    }

    if let Ok(idx) = schema.index_of(&col.name) {
        return Ok(idx);
    }

    // Unqualified lookup against a qualified schema: must be unambiguous
    if col.relation.is_none() {
        let suffix = format!(".{}", col.name);
        let mut matches = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| field.name().ends_with(&suffix));
        if let (Some((idx, _)), None) = (matches.next(), matches.next()) {
            return Ok(idx);
        }
    }

    Err(QueryError::UnboundReference(col.qualified_name()))
}

/// Cast that fails on unconvertible values instead of producing NULL
pub(crate) fn cast_strict(array: &ArrayRef, data_type: &DataType) -> Result<ArrayRef> {
    if array.data_type() == data_type {
        return Ok(array.clone());
    }
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    compute::cast_with_options(array, data_type, &options).map_err(Into::into)
}

/// View an array as booleans; an untyped NULL column becomes all-NULL booleans
fn as_boolean(array: &ArrayRef, context: &str) -> Result<BooleanArray> {
    match array.data_type() {
        DataType::Boolean => array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .cloned()
            .ok_or_else(|| QueryError::Internal("boolean downcast failed".to_string())),
        DataType::Null => Ok(BooleanArray::new_null(array.len())),
        other => Err(QueryError::TypeMismatch(format!(
            "{} must be boolean, got {:?}",
            context, other
        ))),
    }
}

fn evaluate_binary_op(left: &ArrayRef, op: BinaryOp, right: &ArrayRef) -> Result<ArrayRef> {
    match op {
        BinaryOp::And => {
            let l = as_boolean(left, "AND operand")?;
            let r = as_boolean(right, "AND operand")?;
            Ok(Arc::new(boolean::and_kleene(&l, &r)?))
        }
        BinaryOp::Or => {
            let l = as_boolean(left, "OR operand")?;
            let r = as_boolean(right, "OR operand")?;
            Ok(Arc::new(boolean::or_kleene(&l, &r)?))
        }
        op if op.is_comparison() => {
            let common = comparison_type(left.data_type(), right.data_type())?;
            if common == DataType::Null {
                return Ok(new_null_array(&DataType::Boolean, left.len()));
            }
            let (l, r) = (cast_strict(left, &common)?, cast_strict(right, &common)?);
            let result = match op {
                BinaryOp::Eq => cmp::eq(&l, &r)?,
                BinaryOp::NotEq => cmp::neq(&l, &r)?,
                BinaryOp::Lt => cmp::lt(&l, &r)?,
                BinaryOp::LtEq => cmp::lt_eq(&l, &r)?,
                BinaryOp::Gt => cmp::gt(&l, &r)?,
                _ => cmp::gt_eq(&l, &r)?,
            };
            Ok(Arc::new(result))
        }
        _ => {
            let common =
                coerce_numeric_types(left.data_type(), right.data_type()).ok_or_else(|| {
                    QueryError::TypeMismatch(format!(
                        "cannot apply {} to {:?} and {:?}",
                        op,
                        left.data_type(),
                        right.data_type()
                    ))
                })?;
            if left.data_type() == &DataType::Null || right.data_type() == &DataType::Null {
                return Ok(new_null_array(&common, left.len()));
            }
            let (l, r) = (cast_strict(left, &common)?, cast_strict(right, &common)?);
            // Integer kernels are checked: overflow and division by zero error
            let result = match op {
                BinaryOp::Add => numeric::add(&l, &r)?,
                BinaryOp::Subtract => numeric::sub(&l, &r)?,
                BinaryOp::Multiply => numeric::mul(&l, &r)?,
                BinaryOp::Divide => numeric::div(&l, &r)?,
                _ => numeric::rem(&l, &r)?,
            };
            Ok(result)
        }
    }
}

fn evaluate_unary_op(op: UnaryOp, arr: &ArrayRef) -> Result<ArrayRef> {
    match op {
        UnaryOp::Not => Ok(Arc::new(boolean::not(&as_boolean(arr, "NOT operand")?)?)),
        UnaryOp::Negate if arr.data_type() == &DataType::Null => Ok(arr.clone()),
        UnaryOp::Negate => Ok(numeric::neg(arr.as_ref())?),
        UnaryOp::IsNull => Ok(Arc::new(compute::is_null(arr.as_ref())?)),
        UnaryOp::IsNotNull => Ok(Arc::new(compute::is_not_null(arr.as_ref())?)),
    }
}

/// `x IN (a, b)` is `x = a OR x = b` under three-valued logic
fn evaluate_in_list(value: &ArrayRef, list: &[ArrayRef], negated: bool) -> Result<ArrayRef> {
    let mut result = BooleanArray::from(vec![false; value.len()]);

    for list_val in list {
        let eq_result = evaluate_binary_op(value, BinaryOp::Eq, list_val)?;
        result = boolean::or_kleene(&result, &as_boolean(&eq_result, "IN comparison")?)?;
    }

    if negated {
        Ok(Arc::new(boolean::not(&result)?))
    } else {
        Ok(Arc::new(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::ValuesExec;
    use crate::types::ScalarValue;
    use arrow::array::{Date32Array, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};

    fn create_test_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("t.id", DataType::Int64, false),
            Field::new("t.value", DataType::Int64, true),
            Field::new("t.name", DataType::Utf8, true),
        ]));

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
                Arc::new(Int64Array::from(vec![Some(10), Some(20), None, Some(40), Some(50)])),
                Arc::new(StringArray::from(vec!["a", "b", "c", "d", "e"])),
            ],
        )
        .unwrap()
    }

    fn value() -> Expr {
        Expr::qualified_column("t", "value")
    }

    fn int(v: i64) -> Expr {
        Expr::literal(ScalarValue::Int64(v))
    }

    fn ids(batch: &RecordBatch) -> Vec<i64> {
        batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[tokio::test]
    async fn test_filter_simple() {
        let batch = create_test_batch();
        let scan = Arc::new(ValuesExec::new(batch.schema(), vec![batch]));

        let filter = FilterExec::new(scan, value().gt(int(25)));

        let results: Vec<RecordBatch> = filter.execute(0).await.unwrap().try_collect().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(ids(&results[0]), vec![4, 5]);
    }

    #[test]
    fn test_null_predicate_drops_row() {
        let batch = create_test_batch();
        let kept = evaluate_filter(&batch, &value().lt(int(100))).unwrap();
        assert_eq!(ids(&kept), vec![1, 2, 4, 5]);

        let not_kept = evaluate_filter(&batch, &value().lt(int(100)).not()).unwrap();
        assert_eq!(not_kept.num_rows(), 0);
    }

    #[test]
    fn test_kleene_logic() {
        let batch = create_test_batch();
        // NULL OR TRUE is TRUE
        let predicate = value().gt(int(25)).or(Expr::qualified_column("t", "id").eq(int(3)));
        assert_eq!(ids(&evaluate_filter(&batch, &predicate).unwrap()), vec![3, 4, 5]);

        let null_and_false = Expr::literal(ScalarValue::Null).and(int(1).eq(int(2)));
        let result = evaluate_expr(&batch, &null_and_false).unwrap();
        let result = result.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(!result.is_null(0));
        assert!(!result.value(0));
    }

    #[test]
    fn test_in_list_and_between() {
        let batch = create_test_batch();
        let in_list = Expr::InList {
            expr: Box::new(value()),
            list: vec![int(20), int(50)],
            negated: false,
        };
        assert_eq!(ids(&evaluate_filter(&batch, &in_list).unwrap()), vec![2, 5]);

        let between = Expr::Between {
            expr: Box::new(Expr::qualified_column("t", "id")),
            low: Box::new(int(2)),
            high: Box::new(int(4)),
            negated: true,
        };
        assert_eq!(ids(&evaluate_filter(&batch, &between).unwrap()), vec![1, 5]);
    }

    #[test]
    fn test_arithmetic_coercion() {
        let batch = create_test_batch();
        let expr = value().add(Expr::literal(ScalarValue::Float64(0.5.into())));
        let result = evaluate_expr(&batch, &expr).unwrap();
        let result = result.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(result.value(0), 10.5);
        assert!(result.is_null(2));
    }

    #[test]
    fn test_integer_overflow_and_division_by_zero() {
        let batch = create_test_batch();
        let overflow = value().add(int(i64::MAX));
        assert!(evaluate_expr(&batch, &overflow).is_err());

        let div_zero = value().divide(int(0));
        assert!(evaluate_expr(&batch, &div_zero).is_err());
    }

    #[test]
    fn test_date_compared_with_string() {
        let schema = Arc::new(Schema::new(vec![Field::new("d", DataType::Date32, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Date32Array::from(vec![0, 19797]))])
                .unwrap();
        let predicate = Expr::column("d").gt(Expr::literal(ScalarValue::Utf8("2024-01-01".into())));
        assert_eq!(evaluate_filter(&batch, &predicate).unwrap().num_rows(), 1);
    }

    #[test]
    fn test_unknown_column() {
        let batch = create_test_batch();
        let err = evaluate_expr(&batch, &Expr::column("missing")).unwrap_err();
        assert!(matches!(err, QueryError::UnboundReference(_)));
    }

    #[tokio::test]
    async fn test_filter_error_names_operator() {
        let batch = create_test_batch();
        let scan = Arc::new(ValuesExec::new(batch.schema(), vec![batch]));
        let filter = FilterExec::new(scan, value().divide(int(0)).gt(int(1)));

        let err = filter
            .execute(0)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Execution { ref operator, .. } if operator == "Filter"));
    }
}
