//! Sort operator

use crate::error::Result;
use crate::physical::operators::filter::evaluate_expr;
use crate::physical::{collect_partitions, PhysicalOperator, RecordBatchStream};
use crate::planner::{NullOrdering, SortDirection, SortExpr};
use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::kernels::sort::LexicographicalComparator;
use arrow::compute::{self, SortColumn, SortOptions};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::stream;
use std::fmt;
use std::sync::Arc;

/// Sort execution operator. Produces a single partition; the sort is
/// stable, so rows with equal keys keep their input order.
#[derive(Debug)]
pub struct SortExec {
    input: Arc<dyn PhysicalOperator>,
    order_by: Vec<SortExpr>,
    schema: SchemaRef,
}

impl SortExec {
    pub fn new(input: Arc<dyn PhysicalOperator>, order_by: Vec<SortExpr>) -> Self {
        let schema = input.schema();
        Self {
            input,
            order_by,
            schema,
        }
    }
}

#[async_trait]
impl PhysicalOperator for SortExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![self.input.clone()]
    }

    async fn execute(&self, partition: usize) -> Result<RecordBatchStream> {
        if partition != 0 {
            return Ok(Box::pin(stream::empty()));
        }

        let all_batches = collect_partitions(&self.input).await?;
        if all_batches.is_empty() {
            return Ok(Box::pin(stream::empty()));
        }

        let batch = compute::concat_batches(&self.schema, &all_batches)?;
        let sorted = sort_batch(&batch, &self.order_by)
            .map_err(|e| e.in_operator(self.name(), self.to_string()))?;

        Ok(Box::pin(stream::once(async { Ok(sorted) })))
    }

    fn name(&self) -> &str {
        "Sort"
    }
}

impl fmt::Display for SortExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order: Vec<String> = self.order_by.iter().map(|s| s.to_string()).collect();
        write!(f, "Sort: [{}]", order.join(", "))
    }
}

fn sort_batch(batch: &RecordBatch, order_by: &[SortExpr]) -> Result<RecordBatch> {
    if batch.num_rows() == 0 || order_by.is_empty() {
        return Ok(batch.clone());
    }

    let sort_columns = order_by
        .iter()
        .map(|s| {
            let values = evaluate_expr(batch, &s.expr)?;
            Ok(SortColumn {
                values,
                options: Some(SortOptions {
                    descending: s.direction == SortDirection::Desc,
                    nulls_first: s.nulls == NullOrdering::NullsFirst,
                }),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    // lexsort_to_indices is unstable; a stable sort over the comparator
    // keeps ties in input order
    let comparator = LexicographicalComparator::try_new(&sort_columns)?;
    let mut order: Vec<u32> = (0..batch.num_rows() as u32).collect();
    order.sort_by(|a, b| comparator.compare(*a as usize, *b as usize));
    let indices = UInt32Array::from(order);

    let sorted_columns = batch
        .columns()
        .iter()
        .map(|col| compute::take(col.as_ref(), &indices, None).map_err(Into::into))
        .collect::<Result<Vec<ArrayRef>>>()?;

    RecordBatch::try_new(batch.schema(), sorted_columns).map_err(Into::into)
}
