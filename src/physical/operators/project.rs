//! Projection operator

use crate::error::Result;
use crate::physical::operators::filter::{cast_strict, evaluate_expr};
use crate::physical::{PhysicalOperator, RecordBatchStream};
use crate::planner::Expr;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use std::fmt;
use std::sync::Arc;

/// Projection execution operator
#[derive(Debug)]
pub struct ProjectExec {
    input: Arc<dyn PhysicalOperator>,
    exprs: Vec<Expr>,
    schema: SchemaRef,
}

impl ProjectExec {
    /// `schema` is the planned output schema, one field per expression
    pub fn new(input: Arc<dyn PhysicalOperator>, exprs: Vec<Expr>, schema: SchemaRef) -> Self {
        Self {
            input,
            exprs,
            schema,
        }
    }
}

#[async_trait]
impl PhysicalOperator for ProjectExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![self.input.clone()]
    }

    async fn execute(&self, partition: usize) -> Result<RecordBatchStream> {
        let input_stream = self.input.execute(partition).await?;
        let exprs = self.exprs.clone();
        let schema = self.schema.clone();

        let projected = input_stream.and_then(move |batch| {
            let result = project_batch(&batch, &exprs, &schema)
                .map_err(|e| e.in_operator("Project", format!("{} input rows", batch.num_rows())));
            async move { result }
        });

        Ok(Box::pin(projected))
    }

    fn name(&self) -> &str {
        "Project"
    }

    fn output_partitions(&self) -> usize {
        // Projection preserves partitioning
        self.input.output_partitions()
    }
}

impl fmt::Display for ProjectExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exprs: Vec<String> = self.exprs.iter().map(|e| e.to_string()).collect();
        write!(f, "Project: [{}]", exprs.join(", "))
    }
}

fn project_batch(batch: &RecordBatch, exprs: &[Expr], schema: &SchemaRef) -> Result<RecordBatch> {
    let columns = exprs
        .iter()
        .zip(schema.fields())
        .map(|(expr, field)| {
            let array = evaluate_expr(batch, expr)?;
            // Untyped NULL literals take the planned column type
            cast_strict(&array, field.data_type())
        })
        .collect::<Result<Vec<_>>>()?;

    RecordBatch::try_new(schema.clone(), columns).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::ValuesExec;
    use crate::types::ScalarValue;
    use arrow::array::{Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    fn create_test_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("t.id", DataType::Int64, false),
            Field::new("t.name", DataType::Utf8, true),
            Field::new("t.value", DataType::Int64, false),
        ]));

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
                Arc::new(Int64Array::from(vec![10, 20, 30])),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_project_expression() {
        let batch = create_test_batch();
        let scan = Arc::new(ValuesExec::new(batch.schema(), vec![batch]));

        let exprs = vec![
            Expr::qualified_column("t", "value").multiply(Expr::literal(ScalarValue::Int64(2))),
            Expr::literal(ScalarValue::Null).alias("nothing"),
        ];
        let schema = Arc::new(Schema::new(vec![
            Field::new("doubled", DataType::Int64, true),
            Field::new("nothing", DataType::Utf8, true),
        ]));
        let project = ProjectExec::new(scan, exprs, schema);

        let results: Vec<RecordBatch> = project.execute(0).await.unwrap().try_collect().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].num_columns(), 2);

        let values = results[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(values.values().to_vec(), vec![20, 40, 60]);
        assert_eq!(results[0].column(1).data_type(), &DataType::Utf8);
        assert_eq!(results[0].column(1).null_count(), 3);
    }
}
