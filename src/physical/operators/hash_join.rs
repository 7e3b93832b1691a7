//! Hash join operator

use crate::error::{QueryError, Result};
use crate::physical::operators::filter::evaluate_expr;
use crate::physical::{collect_partitions, PhysicalOperator, RecordBatchStream};
use crate::planner::{Expr, JoinType};
use crate::types::ScalarValue;
use arrow::array::{new_null_array, Array, ArrayRef, BooleanArray, UInt32Array};
use arrow::compute;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use hashbrown::HashMap;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Threshold for extracting build keys in parallel
const PARALLEL_BUILD_THRESHOLD: usize = 10_000;

/// Build side data - collected once, reused across probe partitions
struct BuildSide {
    batch: RecordBatch,
    /// Key to build rows, in build input order
    hash_table: HashMap<Vec<ScalarValue>, Vec<u32>>,
}

/// Equi-join: a hash table over the right input, probed by each left
/// partition. Output follows left input order, matches for one left row in
/// right input order. Supports inner and left joins with a residual filter.
pub struct HashJoinExec {
    left: Arc<dyn PhysicalOperator>,
    right: Arc<dyn PhysicalOperator>,
    on: Vec<(Expr, Expr)>,
    join_type: JoinType,
    filter: Option<Expr>,
    schema: SchemaRef,
    build: OnceCell<BuildSide>,
}

impl fmt::Debug for HashJoinExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashJoinExec")
            .field("left", &self.left)
            .field("right", &self.right)
            .field("on", &self.on)
            .field("join_type", &self.join_type)
            .field("filter", &self.filter)
            .finish()
    }
}

impl HashJoinExec {
    /// `schema` is the left fields followed by the right fields
    pub fn try_new(
        left: Arc<dyn PhysicalOperator>,
        right: Arc<dyn PhysicalOperator>,
        on: Vec<(Expr, Expr)>,
        join_type: JoinType,
        filter: Option<Expr>,
        schema: SchemaRef,
    ) -> Result<Self> {
        if on.is_empty() || join_type == JoinType::Cross {
            return Err(QueryError::Internal(
                "hash join needs equality keys".to_string(),
            ));
        }
        Ok(Self {
            left,
            right,
            on,
            join_type,
            filter,
            schema,
            build: OnceCell::new(),
        })
    }

    async fn build_side(&self) -> Result<&BuildSide> {
        self.build
            .get_or_try_init(|| async {
                let batches = collect_partitions(&self.right).await?;
                let batch = compute::concat_batches(&self.right.schema(), &batches)?;
                let keys: Vec<Expr> = self.on.iter().map(|(_, r)| r.clone()).collect();
                let hash_table = build_hash_table(&batch, &keys)?;
                tracing::debug!(
                    rows = batch.num_rows(),
                    keys = hash_table.len(),
                    "Built hash join table"
                );
                Ok::<_, QueryError>(BuildSide { batch, hash_table })
            })
            .await
    }
}

#[async_trait]
impl PhysicalOperator for HashJoinExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![self.left.clone(), self.right.clone()]
    }

    async fn execute(&self, partition: usize) -> Result<RecordBatchStream> {
        let context = || format!("{} join partition {}", self.join_type, partition);
        let build = self
            .build_side()
            .await
            .map_err(|e| e.in_operator(self.name(), context()))?;

        let probe_stream = self.left.execute(partition).await?;
        let probe_batches: Vec<RecordBatch> = probe_stream.try_collect().await?;
        let probe_keys: Vec<Expr> = self.on.iter().map(|(l, _)| l.clone()).collect();

        let mut result = Vec::with_capacity(probe_batches.len());
        for probe in &probe_batches {
            let joined = probe_batch(
                probe,
                build,
                &probe_keys,
                self.join_type,
                self.filter.as_ref(),
                &self.schema,
            )
            .map_err(|e| e.in_operator(self.name(), context()))?;
            result.extend(joined);
        }

        Ok(Box::pin(stream::iter(result.into_iter().map(Ok))))
    }

    fn output_partitions(&self) -> usize {
        // Build side is fully collected; probe side keeps its partitioning
        self.left.output_partitions().max(1)
    }

    fn name(&self) -> &str {
        "HashJoin"
    }
}

impl fmt::Display for HashJoinExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_str: Vec<String> = self
            .on
            .iter()
            .map(|(l, r)| format!("{} = {}", l, r))
            .collect();
        write!(f, "HashJoin: {} on [{}]", self.join_type, on_str.join(", "))?;
        if let Some(filter) = &self.filter {
            write!(f, " filter={}", filter)?;
        }
        Ok(())
    }
}

/// Key of `row`, or `None` when any component is NULL (NULL never matches)
fn join_key(arrays: &[ArrayRef], row: usize) -> Result<Option<Vec<ScalarValue>>> {
    let mut key = Vec::with_capacity(arrays.len());
    for array in arrays {
        if array.is_null(row) {
            return Ok(None);
        }
        key.push(ScalarValue::try_from_array(array.as_ref(), row)?);
    }
    Ok(Some(key))
}

fn build_hash_table(
    batch: &RecordBatch,
    key_exprs: &[Expr],
) -> Result<HashMap<Vec<ScalarValue>, Vec<u32>>> {
    let key_arrays = key_exprs
        .iter()
        .map(|e| evaluate_expr(batch, e))
        .collect::<Result<Vec<ArrayRef>>>()?;

    let keys: Vec<Option<Vec<ScalarValue>>> = if batch.num_rows() < PARALLEL_BUILD_THRESHOLD {
        (0..batch.num_rows())
            .map(|row| join_key(&key_arrays, row))
            .collect::<Result<_>>()?
    } else {
        (0..batch.num_rows())
            .into_par_iter()
            .map(|row| join_key(&key_arrays, row))
            .collect::<Result<_>>()?
    };

    // Inserted sequentially so each bucket lists rows in input order
    let mut table: HashMap<Vec<ScalarValue>, Vec<u32>> = HashMap::new();
    for (row, key) in keys.into_iter().enumerate() {
        if let Some(key) = key {
            table.entry(key).or_default().push(row as u32);
        }
    }
    Ok(table)
}

fn probe_batch(
    probe: &RecordBatch,
    build: &BuildSide,
    probe_keys: &[Expr],
    join_type: JoinType,
    filter: Option<&Expr>,
    schema: &SchemaRef,
) -> Result<Option<RecordBatch>> {
    let key_arrays = probe_keys
        .iter()
        .map(|e| evaluate_expr(probe, e))
        .collect::<Result<Vec<ArrayRef>>>()?;

    let mut candidates: Vec<(u32, u32)> = Vec::new();
    for row in 0..probe.num_rows() {
        if let Some(key) = join_key(&key_arrays, row)? {
            if let Some(matches) = build.hash_table.get(&key) {
                candidates.extend(matches.iter().map(|&m| (row as u32, m)));
            }
        }
    }

    join_output(probe, &build.batch, candidates, join_type, filter, schema)
}

/// Turn candidate `(left row, right row)` pairs, ordered by left row, into
/// the join output: apply the residual filter, then null-extend left rows
/// without a surviving match when `join_type` is `Left`.
pub(super) fn join_output(
    left: &RecordBatch,
    right: &RecordBatch,
    candidates: Vec<(u32, u32)>,
    join_type: JoinType,
    filter: Option<&Expr>,
    schema: &SchemaRef,
) -> Result<Option<RecordBatch>> {
    let survivors = match filter {
        Some(predicate) if !candidates.is_empty() => {
            let left_idx: Vec<u32> = candidates.iter().map(|(l, _)| *l).collect();
            let right_idx: Vec<Option<u32>> = candidates.iter().map(|(_, r)| Some(*r)).collect();
            let combined = gather(left, right, &left_idx, &right_idx, schema)?;
            let mask = evaluate_expr(&combined, predicate)?;
            let mask = mask
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| {
                    QueryError::TypeMismatch("join filter must be boolean".to_string())
                })?
                .clone();
            candidates
                .into_iter()
                .enumerate()
                .filter(|(i, _)| mask.is_valid(*i) && mask.value(*i))
                .map(|(_, pair)| pair)
                .collect()
        }
        _ => candidates,
    };

    let (left_idx, right_idx): (Vec<u32>, Vec<Option<u32>>) = match join_type {
        JoinType::Left => {
            let mut left_idx = Vec::with_capacity(survivors.len());
            let mut right_idx = Vec::with_capacity(survivors.len());
            let mut pairs = survivors.into_iter().peekable();
            for row in 0..left.num_rows() as u32 {
                let mut matched = false;
                while let Some((_, r)) = pairs.next_if(|(l, _)| *l == row) {
                    left_idx.push(row);
                    right_idx.push(Some(r));
                    matched = true;
                }
                if !matched {
                    left_idx.push(row);
                    right_idx.push(None);
                }
            }
            (left_idx, right_idx)
        }
        JoinType::Inner | JoinType::Cross => {
            survivors.into_iter().map(|(l, r)| (l, Some(r))).unzip()
        }
    };

    if left_idx.is_empty() {
        return Ok(None);
    }
    gather(left, right, &left_idx, &right_idx, schema).map(Some)
}

/// Assemble output rows; a `None` right index yields NULLs for the right side
fn gather(
    left: &RecordBatch,
    right: &RecordBatch,
    left_idx: &[u32],
    right_idx: &[Option<u32>],
    schema: &SchemaRef,
) -> Result<RecordBatch> {
    let left_indices = UInt32Array::from(left_idx.to_vec());
    let right_indices = UInt32Array::from(right_idx.to_vec());

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for col in left.columns() {
        columns.push(compute::take(col.as_ref(), &left_indices, None)?);
    }
    for col in right.columns() {
        if right.num_rows() == 0 {
            columns.push(new_null_array(col.data_type(), right_idx.len()));
        } else {
            columns.push(compute::take(col.as_ref(), &right_indices, None)?);
        }
    }

    RecordBatch::try_new(schema.clone(), columns).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::ValuesExec;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    fn create_left_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("l.id", DataType::Int64, true),
            Field::new("l.name", DataType::Utf8, false),
        ]));

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(2), Some(1), Some(3), None])),
                Arc::new(StringArray::from(vec!["b", "a", "c", "n"])),
            ],
        )
        .unwrap()
    }

    fn create_right_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("r.id", DataType::Int64, true),
            Field::new("r.value", DataType::Int64, false),
        ]));

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(1), Some(2), Some(2), Some(5), None])),
                Arc::new(Int64Array::from(vec![10, 20, 21, 50, 99])),
            ],
        )
        .unwrap()
    }

    fn output_schema(join_type: JoinType) -> SchemaRef {
        let nullable = join_type == JoinType::Left;
        Arc::new(Schema::new(vec![
            Field::new("l.id", DataType::Int64, true),
            Field::new("l.name", DataType::Utf8, false),
            Field::new("r.id", DataType::Int64, true),
            Field::new("r.value", DataType::Int64, nullable),
        ]))
    }

    async fn run_join(join_type: JoinType, filter: Option<Expr>) -> Vec<(String, Option<i64>)> {
        let left = create_left_batch();
        let right = create_right_batch();
        let join = HashJoinExec::try_new(
            Arc::new(ValuesExec::new(left.schema(), vec![left])),
            Arc::new(ValuesExec::new(right.schema(), vec![right])),
            vec![(Expr::qualified_column("l", "id"), Expr::qualified_column("r", "id"))],
            join_type,
            filter,
            output_schema(join_type),
        )
        .unwrap();

        let results: Vec<RecordBatch> = join.execute(0).await.unwrap().try_collect().await.unwrap();
        let mut rows = Vec::new();
        for batch in &results {
            let names = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
            let values = batch.column(3).as_any().downcast_ref::<Int64Array>().unwrap();
            for i in 0..batch.num_rows() {
                let value = (!values.is_null(i)).then(|| values.value(i));
                rows.push((names.value(i).to_string(), value));
            }
        }
        rows
    }

    #[tokio::test]
    async fn test_inner_join_follows_left_order() {
        let rows = run_join(JoinType::Inner, None).await;
        assert_eq!(
            rows,
            vec![
                ("b".to_string(), Some(20)),
                ("b".to_string(), Some(21)),
                ("a".to_string(), Some(10)),
            ]
        );
    }

    #[tokio::test]
    async fn test_left_join_null_extends() {
        let rows = run_join(JoinType::Left, None).await;
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[3], ("c".to_string(), None));
        // NULL keys never match
        assert_eq!(rows[4], ("n".to_string(), None));
    }

    #[tokio::test]
    async fn test_residual_filter() {
        let filter = Expr::qualified_column("r", "value").gt(Expr::literal(ScalarValue::Int64(20)));
        let inner = run_join(JoinType::Inner, Some(filter.clone())).await;
        assert_eq!(inner, vec![("b".to_string(), Some(21))]);

        // A left row whose matches are all filtered out is still emitted
        let left = run_join(JoinType::Left, Some(filter)).await;
        assert_eq!(left[0], ("b".to_string(), Some(21)));
        assert_eq!(left[1], ("a".to_string(), None));
        assert_eq!(left.len(), 4);
    }
}
