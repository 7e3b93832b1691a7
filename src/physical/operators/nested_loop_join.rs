//! Nested loop join for cross joins and non-equi conditions

use crate::error::{QueryError, Result};
use crate::physical::operators::hash_join::join_output;
use crate::physical::{collect_partitions, PhysicalOperator, RecordBatchStream};
use crate::planner::{Expr, JoinType};
use arrow::compute;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Upper bound on candidate pairs materialized at once
const CANDIDATE_CHUNK: usize = 8192;

/// Pairs every left row with every right row, keeping the pairs that pass
/// `filter`. Left joins null-extend unmatched left rows. Output follows left
/// input order.
pub struct NestedLoopJoinExec {
    left: Arc<dyn PhysicalOperator>,
    right: Arc<dyn PhysicalOperator>,
    join_type: JoinType,
    filter: Option<Expr>,
    schema: SchemaRef,
    right_batch: OnceCell<RecordBatch>,
}

impl fmt::Debug for NestedLoopJoinExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedLoopJoinExec")
            .field("left", &self.left)
            .field("right", &self.right)
            .field("join_type", &self.join_type)
            .field("filter", &self.filter)
            .finish()
    }
}

impl NestedLoopJoinExec {
    pub fn new(
        left: Arc<dyn PhysicalOperator>,
        right: Arc<dyn PhysicalOperator>,
        join_type: JoinType,
        filter: Option<Expr>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            left,
            right,
            join_type,
            filter,
            schema,
            right_batch: OnceCell::new(),
        }
    }

    async fn right_batch(&self) -> Result<&RecordBatch> {
        self.right_batch
            .get_or_try_init(|| async {
                let batches = collect_partitions(&self.right).await?;
                Ok::<_, QueryError>(compute::concat_batches(&self.right.schema(), &batches)?)
            })
            .await
    }

    fn join_batch(&self, left: &RecordBatch, right: &RecordBatch) -> Result<Vec<RecordBatch>> {
        let right_rows = right.num_rows();
        let rows_per_chunk = (CANDIDATE_CHUNK / right_rows.max(1)).max(1);

        let mut output = Vec::new();
        let mut offset = 0;
        while offset < left.num_rows() {
            let len = rows_per_chunk.min(left.num_rows() - offset);
            let chunk = left.slice(offset, len);
            let candidates: Vec<(u32, u32)> = (0..len as u32)
                .flat_map(|l| (0..right_rows as u32).map(move |r| (l, r)))
                .collect();
            if let Some(batch) = join_output(
                &chunk,
                right,
                candidates,
                self.join_type,
                self.filter.as_ref(),
                &self.schema,
            )? {
                output.push(batch);
            }
            offset += len;
        }
        Ok(output)
    }
}

#[async_trait]
impl PhysicalOperator for NestedLoopJoinExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![self.left.clone(), self.right.clone()]
    }

    async fn execute(&self, partition: usize) -> Result<RecordBatchStream> {
        let context = || format!("{} join partition {}", self.join_type, partition);
        let right = self
            .right_batch()
            .await
            .map_err(|e| e.in_operator(self.name(), context()))?;

        let left_batches: Vec<RecordBatch> =
            self.left.execute(partition).await?.try_collect().await?;

        let mut result = Vec::new();
        for left in &left_batches {
            let joined = self
                .join_batch(left, right)
                .map_err(|e| e.in_operator(self.name(), context()))?;
            result.extend(joined);
        }

        Ok(Box::pin(stream::iter(result.into_iter().map(Ok))))
    }

    fn output_partitions(&self) -> usize {
        self.left.output_partitions().max(1)
    }

    fn name(&self) -> &str {
        "NestedLoopJoin"
    }
}

impl fmt::Display for NestedLoopJoinExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NestedLoopJoin: {}", self.join_type)?;
        if let Some(filter) = &self.filter {
            write!(f, " filter={}", filter)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::ValuesExec;
    use crate::types::ScalarValue;
    use arrow::array::{Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    fn single_column(name: &str, values: Vec<i64>) -> Arc<dyn PhysicalOperator> {
        let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(values))]).unwrap();
        Arc::new(ValuesExec::new(schema, vec![batch]))
    }

    fn output_schema(right_nullable: bool) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("a.x", DataType::Int64, false),
            Field::new("b.y", DataType::Int64, right_nullable),
        ]))
    }

    async fn collect(join: NestedLoopJoinExec) -> Vec<(i64, Option<i64>)> {
        let batches: Vec<RecordBatch> = join.execute(0).await.unwrap().try_collect().await.unwrap();
        let mut rows = Vec::new();
        for batch in &batches {
            let x = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
            let y = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
            for i in 0..batch.num_rows() {
                rows.push((x.value(i), (!y.is_null(i)).then(|| y.value(i))));
            }
        }
        rows
    }

    #[tokio::test]
    async fn test_cross_join() {
        let join = NestedLoopJoinExec::new(
            single_column("a.x", vec![1, 2]),
            single_column("b.y", vec![10, 20, 30]),
            JoinType::Cross,
            None,
            output_schema(false),
        );
        let rows = collect(join).await;
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], (1, Some(10)));
        assert_eq!(rows[3], (2, Some(10)));
    }

    #[tokio::test]
    async fn test_left_non_equi_join() {
        let filter = Expr::qualified_column("a", "x")
            .multiply(Expr::literal(ScalarValue::Int64(10)))
            .lt(Expr::qualified_column("b", "y"));
        let join = NestedLoopJoinExec::new(
            single_column("a.x", vec![1, 3]),
            single_column("b.y", vec![10, 20]),
            JoinType::Left,
            Some(filter),
            output_schema(true),
        );
        assert_eq!(collect(join).await, vec![(1, Some(20)), (3, None)]);
    }
}
