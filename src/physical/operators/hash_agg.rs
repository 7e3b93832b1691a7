//! Hash aggregate operator

use crate::error::{QueryError, Result};
use crate::physical::operators::filter::evaluate_expr;
use crate::physical::{collect_partitions, PhysicalOperator, RecordBatchStream};
use crate::planner::{AggregateFunction, Expr};
use crate::types::{PrimitiveType, ScalarValue};
use arrow::array::{new_null_array, Array, ArrayRef};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::stream;
use hashbrown::HashMap;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Hash aggregate execution operator.
///
/// Consumes every input partition and emits one batch. Groups appear in
/// the order their key was first seen; without GROUP BY exactly one row is
/// produced, even for empty input.
#[derive(Debug)]
pub struct HashAggregateExec {
    input: Arc<dyn PhysicalOperator>,
    group_by: Vec<Expr>,
    aggregates: Vec<AggregateExpr>,
    schema: SchemaRef,
}

/// Aggregate expression with function and input
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub func: AggregateFunction,
    /// `None` for `COUNT(*)`
    pub input: Option<Expr>,
}

impl AggregateExpr {
    /// Build from a planned `Expr::Aggregate`
    pub fn try_from_expr(expr: &Expr) -> Result<Self> {
        match expr.unalias() {
            Expr::Aggregate { func, args } => {
                let input = match args.as_slice() {
                    [Expr::Wildcard] => None,
                    [arg] => Some(arg.clone()),
                    _ => {
                        return Err(QueryError::Internal(format!(
                            "{} expects one argument",
                            func
                        )))
                    }
                };
                Ok(Self { func: *func, input })
            }
            other => Err(QueryError::Internal(format!(
                "{} is not an aggregate",
                other
            ))),
        }
    }
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.input {
            Some(input) => write!(f, "{}({})", self.func, input),
            None => write!(f, "{}(*)", self.func),
        }
    }
}

impl HashAggregateExec {
    /// `schema` holds the group columns followed by one column per aggregate
    pub fn new(
        input: Arc<dyn PhysicalOperator>,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            input,
            group_by,
            aggregates,
            schema,
        }
    }
}

#[async_trait]
impl PhysicalOperator for HashAggregateExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![self.input.clone()]
    }

    async fn execute(&self, _partition: usize) -> Result<RecordBatchStream> {
        let batches = collect_partitions(&self.input).await?;

        let result = aggregate_batches(&batches, &self.group_by, &self.aggregates, &self.schema)
            .map_err(|e| e.in_operator(self.name(), self.to_string()))?;
        tracing::debug!(groups = result.num_rows(), "Aggregated input");

        Ok(Box::pin(stream::once(async { Ok(result) })))
    }

    fn name(&self) -> &str {
        "HashAggregate"
    }
}

impl fmt::Display for HashAggregateExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self.group_by.iter().map(|e| e.to_string()).collect();
        let aggs: Vec<String> = self.aggregates.iter().map(|a| a.to_string()).collect();
        write!(
            f,
            "HashAggregate: group_by=[{}], aggs=[{}]",
            groups.join(", "),
            aggs.join(", ")
        )
    }
}

/// Running state of one aggregate within one group
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    SumInt(Option<i64>),
    SumFloat(Option<f64>),
    Avg { sum: f64, count: i64 },
    Min(Option<ScalarValue>),
    Max(Option<ScalarValue>),
}

impl Accumulator {
    fn new(agg: &AggregateExpr, output_type: &DataType) -> Self {
        match agg.func {
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum if output_type == &DataType::Int64 => Accumulator::SumInt(None),
            AggregateFunction::Sum => Accumulator::SumFloat(None),
            AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
        }
    }

    /// Fold one input value in; `None` stands for `COUNT(*)`'s row marker
    fn update(&mut self, value: Option<&ScalarValue>) -> Result<()> {
        let value = match value {
            None => {
                if let Accumulator::Count(count) = self {
                    *count += 1;
                }
                return Ok(());
            }
            Some(ScalarValue::Null) => return Ok(()),
            Some(v) => v,
        };

        match self {
            Accumulator::Count(count) => *count += 1,
            Accumulator::SumInt(sum) => {
                let v = as_i64(value)?;
                let next = sum.unwrap_or(0).checked_add(v).ok_or_else(|| {
                    QueryError::execution("HashAggregate", "SUM", "integer overflow")
                })?;
                *sum = Some(next);
            }
            Accumulator::SumFloat(sum) => *sum = Some(sum.unwrap_or(0.0) + as_f64(value)?),
            Accumulator::Avg { sum, count } => {
                *sum += as_f64(value)?;
                *count += 1;
            }
            Accumulator::Min(current) => {
                if current
                    .as_ref()
                    .map_or(true, |c| value.compare(c) == Some(Ordering::Less))
                {
                    *current = Some(value.clone());
                }
            }
            Accumulator::Max(current) => {
                if current
                    .as_ref()
                    .map_or(true, |c| value.compare(c) == Some(Ordering::Greater))
                {
                    *current = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    fn finish(&self) -> ScalarValue {
        match self {
            Accumulator::Count(count) => ScalarValue::Int64(*count),
            Accumulator::SumInt(sum) => sum.map_or(ScalarValue::Null, ScalarValue::Int64),
            Accumulator::SumFloat(sum) => {
                sum.map_or(ScalarValue::Null, |s| ScalarValue::Float64(OrderedFloat(s)))
            }
            Accumulator::Avg { count: 0, .. } => ScalarValue::Null,
            Accumulator::Avg { sum, count } => {
                ScalarValue::Float64(OrderedFloat(*sum / *count as f64))
            }
            Accumulator::Min(v) | Accumulator::Max(v) => v.clone().unwrap_or(ScalarValue::Null),
        }
    }
}

fn as_i64(value: &ScalarValue) -> Result<i64> {
    match value {
        ScalarValue::Int32(v) => Ok(*v as i64),
        ScalarValue::Int64(v) => Ok(*v),
        other => Err(QueryError::TypeMismatch(format!(
            "integer SUM over {}",
            other
        ))),
    }
}

fn as_f64(value: &ScalarValue) -> Result<f64> {
    match value {
        ScalarValue::Int32(v) => Ok(*v as f64),
        ScalarValue::Int64(v) => Ok(*v as f64),
        ScalarValue::Float32(v) => Ok(v.0 as f64),
        ScalarValue::Float64(v) => Ok(v.0),
        other => Err(QueryError::TypeMismatch(format!(
            "numeric aggregate over {}",
            other
        ))),
    }
}

fn aggregate_batches(
    batches: &[RecordBatch],
    group_by: &[Expr],
    aggregates: &[AggregateExpr],
    schema: &SchemaRef,
) -> Result<RecordBatch> {
    let agg_types: Vec<DataType> = schema
        .fields()
        .iter()
        .skip(group_by.len())
        .map(|f| f.data_type().clone())
        .collect();
    if agg_types.len() != aggregates.len() {
        return Err(QueryError::Internal(format!(
            "aggregate schema has {} columns for {} aggregates",
            agg_types.len(),
            aggregates.len()
        )));
    }
    let new_accumulators = || -> Vec<Accumulator> {
        aggregates
            .iter()
            .zip(&agg_types)
            .map(|(agg, t)| Accumulator::new(agg, t))
            .collect()
    };

    // Group index by key; `keys`/`states` keep first-seen order
    let mut index: HashMap<Vec<ScalarValue>, usize> = HashMap::new();
    let mut keys: Vec<Vec<ScalarValue>> = Vec::new();
    let mut states: Vec<Vec<Accumulator>> = Vec::new();

    if group_by.is_empty() {
        keys.push(vec![]);
        states.push(new_accumulators());
        index.insert(vec![], 0);
    }

    for batch in batches {
        let group_arrays = group_by
            .iter()
            .map(|e| evaluate_expr(batch, e))
            .collect::<Result<Vec<ArrayRef>>>()?;
        let agg_inputs = aggregates
            .iter()
            .map(|a| a.input.as_ref().map(|e| evaluate_expr(batch, e)).transpose())
            .collect::<Result<Vec<Option<ArrayRef>>>>()?;

        for row in 0..batch.num_rows() {
            let key = group_arrays
                .iter()
                .map(|arr| ScalarValue::try_from_array(arr.as_ref(), row))
                .collect::<Result<Vec<_>>>()?;

            let group = match index.get(&key) {
                Some(&group) => group,
                None => {
                    let group = keys.len();
                    index.insert(key.clone(), group);
                    keys.push(key);
                    states.push(new_accumulators());
                    group
                }
            };

            for (acc, input) in states[group].iter_mut().zip(&agg_inputs) {
                match input {
                    Some(arr) => acc.update(Some(&ScalarValue::try_from_array(arr.as_ref(), row)?))?,
                    None => acc.update(None)?,
                }
            }
        }
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for (i, field) in schema.fields().iter().take(group_by.len()).enumerate() {
        let values: Vec<ScalarValue> = keys.iter().map(|k| k[i].clone()).collect();
        columns.push(scalars_to_array(field.data_type(), &values)?);
    }
    for (i, data_type) in agg_types.iter().enumerate() {
        let values: Vec<ScalarValue> = states.iter().map(|s| s[i].finish()).collect();
        columns.push(scalars_to_array(data_type, &values)?);
    }

    RecordBatch::try_new(schema.clone(), columns).map_err(Into::into)
}

/// Build an array of `data_type` from scalars, widening where the key type
/// and the planned type differ (e.g. Int32 keys in an Int64 column)
fn scalars_to_array(data_type: &DataType, values: &[ScalarValue]) -> Result<ArrayRef> {
    if data_type == &DataType::Null {
        return Ok(new_null_array(data_type, values.len()));
    }
    let primitive = PrimitiveType::from_arrow(data_type)?;
    match primitive.build_array(values) {
        Ok(array) => Ok(array),
        Err(_) => {
            let coerced = values
                .iter()
                .map(|v| {
                    let field = crate::types::Field::new(0, "value", primitive, false);
                    if v.is_null() {
                        Ok(ScalarValue::Null)
                    } else {
                        field.coerce_scalar(v)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            primitive.build_array(&coerced)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::ValuesExec;
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use futures::TryStreamExt;

    fn employees() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("emp.dept", DataType::Utf8, true),
            Field::new("emp.sal", DataType::Int64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["Eng", "Mkt", "Eng"])),
                Arc::new(Int64Array::from(vec![75000, 65000, 85000])),
            ],
        )
        .unwrap()
    }

    fn count_star() -> AggregateExpr {
        AggregateExpr {
            func: AggregateFunction::Count,
            input: None,
        }
    }

    fn agg(func: AggregateFunction, column: &str) -> AggregateExpr {
        AggregateExpr {
            func,
            input: Some(Expr::qualified_column("emp", column)),
        }
    }

    async fn run(exec: HashAggregateExec) -> Result<RecordBatch> {
        let mut batches: Vec<RecordBatch> = exec.execute(0).await?.try_collect().await?;
        assert_eq!(batches.len(), 1);
        Ok(batches.remove(0))
    }

    #[tokio::test]
    async fn test_group_by_first_seen_order() {
        let batch = employees();
        let input = Arc::new(ValuesExec::new(batch.schema(), vec![batch]));
        let schema = Arc::new(Schema::new(vec![
            Field::new("emp.dept", DataType::Utf8, true),
            Field::new("COUNT(*)", DataType::Int64, false),
            Field::new("SUM(sal)", DataType::Int64, true),
        ]));
        let exec = HashAggregateExec::new(
            input,
            vec![Expr::qualified_column("emp", "dept")],
            vec![count_star(), agg(AggregateFunction::Sum, "sal")],
            schema,
        );

        let result = run(exec).await.unwrap();
        let depts = result.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        let counts = result.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        let sums = result.column(2).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(depts.value(0), "Eng");
        assert_eq!(depts.value(1), "Mkt");
        assert_eq!(counts.values().to_vec(), vec![2, 1]);
        assert_eq!(sums.values().to_vec(), vec![160000, 65000]);
    }

    #[tokio::test]
    async fn test_empty_input_without_group_by() {
        let batch = employees();
        let input = Arc::new(ValuesExec::new(batch.schema(), vec![]));
        let schema = Arc::new(Schema::new(vec![
            Field::new("COUNT(*)", DataType::Int64, false),
            Field::new("AVG(sal)", DataType::Float64, true),
            Field::new("MAX(dept)", DataType::Utf8, true),
        ]));
        let exec = HashAggregateExec::new(
            input,
            vec![],
            vec![
                count_star(),
                agg(AggregateFunction::Avg, "sal"),
                agg(AggregateFunction::Max, "dept"),
            ],
            schema,
        );

        let result = run(exec).await.unwrap();
        assert_eq!(result.num_rows(), 1);
        let counts = result.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(counts.value(0), 0);
        assert!(result.column(1).is_null(0));
        assert!(result.column(2).is_null(0));
    }

    #[tokio::test]
    async fn test_avg_min_max() {
        let batch = employees();
        let input = Arc::new(ValuesExec::new(batch.schema(), vec![batch]));
        let schema = Arc::new(Schema::new(vec![
            Field::new("AVG(sal)", DataType::Float64, true),
            Field::new("MIN(sal)", DataType::Int64, true),
            Field::new("MAX(dept)", DataType::Utf8, true),
        ]));
        let exec = HashAggregateExec::new(
            input,
            vec![],
            vec![
                agg(AggregateFunction::Avg, "sal"),
                agg(AggregateFunction::Min, "sal"),
                agg(AggregateFunction::Max, "dept"),
            ],
            schema,
        );

        let result = run(exec).await.unwrap();
        let avg = result.column(0).as_any().downcast_ref::<Float64Array>().unwrap();
        let min = result.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        let max = result.column(2).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(avg.value(0), 75000.0);
        assert_eq!(min.value(0), 65000);
        assert_eq!(max.value(0), "Mkt");
    }

    #[tokio::test]
    async fn test_sum_overflow_is_execution_error() {
        let schema = Arc::new(Schema::new(vec![Field::new("emp.sal", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![i64::MAX, 1]))],
        )
        .unwrap();
        let input = Arc::new(ValuesExec::new(schema, vec![batch]));
        let exec = HashAggregateExec::new(
            input,
            vec![],
            vec![agg(AggregateFunction::Sum, "sal")],
            Arc::new(Schema::new(vec![Field::new("SUM(sal)", DataType::Int64, true)])),
        );

        let err = run(exec).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ExecutionError);
    }

    #[test]
    fn test_aggregate_expr_from_planned_expr() {
        let expr = Expr::Aggregate {
            func: AggregateFunction::Count,
            args: vec![Expr::Wildcard],
        };
        assert_eq!(AggregateExpr::try_from_expr(&expr).unwrap(), count_star());
        assert!(AggregateExpr::try_from_expr(&Expr::column("x")).is_err());
    }
}
