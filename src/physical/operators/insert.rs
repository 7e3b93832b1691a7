//! INSERT ... VALUES operator

use crate::error::{QueryError, Result};
use crate::physical::operators::filter::evaluate_expr;
use crate::physical::{PhysicalOperator, RecordBatchStream, TableProvider};
use crate::planner::Expr;
use crate::types::{ColumnarBatch, ScalarValue, Schema};
use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use async_trait::async_trait;
use futures::stream;
use std::fmt;
use std::sync::Arc;

/// Packs literal rows into a batch of the table schema and hands it to the
/// table source, which writes and commits it. Emits one `{count}` row.
#[derive(Debug)]
pub struct InsertExec {
    table_name: String,
    provider: Arc<dyn TableProvider>,
    table_schema: Arc<Schema>,
    columns: Vec<usize>,
    rows: Vec<Vec<Expr>>,
    schema: SchemaRef,
}

impl InsertExec {
    pub fn new(
        table_name: impl Into<String>,
        provider: Arc<dyn TableProvider>,
        table_schema: Arc<Schema>,
        columns: Vec<usize>,
        rows: Vec<Vec<Expr>>,
    ) -> Self {
        let schema = Arc::new(arrow::datatypes::Schema::new(vec![Field::new(
            crate::planner::InsertNode::COUNT_COLUMN,
            DataType::Int64,
            false,
        )]));
        Self {
            table_name: table_name.into(),
            provider,
            table_schema,
            columns,
            rows,
            schema,
        }
    }

    /// Evaluate the VALUES rows into a batch matching the table schema
    fn build_batch(&self) -> Result<ColumnarBatch> {
        // A single row with no columns to evaluate constants against
        let one_row = RecordBatch::try_new_with_options(
            Arc::new(arrow::datatypes::Schema::empty()),
            vec![],
            &RecordBatchOptions::new().with_row_count(Some(1)),
        )?;

        let width = self.table_schema.len();
        let mut values: Vec<Vec<ScalarValue>> = vec![Vec::with_capacity(self.rows.len()); width];
        for row in &self.rows {
            let mut full_row = vec![ScalarValue::Null; width];
            for (expr, &target) in row.iter().zip(&self.columns) {
                let array = evaluate_expr(&one_row, expr)?;
                full_row[target] = ScalarValue::try_from_array(array.as_ref(), 0)?;
            }
            for (i, value) in full_row.into_iter().enumerate() {
                let field = self
                    .table_schema
                    .field(i)
                    .ok_or_else(|| QueryError::Internal(format!("no field at {}", i)))?;
                values[i].push(field.coerce_scalar(&value)?);
            }
        }

        let columns = self
            .table_schema
            .fields()
            .iter()
            .zip(&values)
            .map(|(field, column)| field.field_type.build_array(column))
            .collect::<Result<Vec<ArrayRef>>>()?;
        ColumnarBatch::try_new(self.table_schema.clone(), columns)
    }
}

#[async_trait]
impl PhysicalOperator for InsertExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![]
    }

    async fn execute(&self, _partition: usize) -> Result<RecordBatchStream> {
        let context = || format!("table {}", self.table_name);
        let batch = self
            .build_batch()
            .map_err(|e| e.in_operator(self.name(), context()))?;

        let provider = self.provider.clone();
        let written = tokio::task::spawn_blocking(move || provider.insert(batch))
            .await
            .map_err(|e| QueryError::execution("Insert", context(), e.to_string()))?
            .map_err(|e| e.in_operator(self.name(), context()))?;
        tracing::info!(table = %self.table_name, rows = written, "Inserted rows");

        let count: ArrayRef = Arc::new(Int64Array::from(vec![written as i64]));
        let result = RecordBatch::try_new(self.schema.clone(), vec![count])?;
        Ok(Box::pin(stream::once(async { Ok(result) })))
    }

    fn name(&self) -> &str {
        "Insert"
    }
}

impl fmt::Display for InsertExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Insert: {} ({}) rows={}",
            self.table_name,
            self.provider.source_type(),
            self.rows.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::MemoryTable;
    use crate::types::PrimitiveType;
    use futures::TryStreamExt;

    fn table() -> Arc<MemoryTable> {
        let mut builder = Schema::builder();
        builder
            .add_field(1, "id", PrimitiveType::Long, true)
            .unwrap()
            .add_field(2, "day", PrimitiveType::Date, false)
            .unwrap()
            .add_field(3, "note", PrimitiveType::String, false)
            .unwrap();
        Arc::new(MemoryTable::try_new(Arc::new(builder.build()), vec![]).unwrap())
    }

    #[tokio::test]
    async fn test_insert_fills_omitted_columns() {
        let provider = table();
        let exec = InsertExec::new(
            "t",
            provider.clone(),
            provider.schema(),
            vec![1, 0],
            vec![
                vec![
                    Expr::literal(ScalarValue::Utf8("2024-03-15".into())),
                    Expr::literal(ScalarValue::Int32(7)),
                ],
                vec![
                    Expr::literal(ScalarValue::Null),
                    Expr::literal(ScalarValue::Int64(8)).multiply(Expr::literal(ScalarValue::Int64(2))),
                ],
            ],
        );

        let results: Vec<RecordBatch> = exec.execute(0).await.unwrap().try_collect().await.unwrap();
        let count = results[0].column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(count.value(0), 2);

        let stored = provider.scan(None, None).unwrap();
        let batch = ColumnarBatch::from_record_batch(provider.schema(), &stored[0]).unwrap();
        assert_eq!(batch.value(0, 0).unwrap(), ScalarValue::Int64(7));
        assert_eq!(batch.value(0, 1).unwrap(), ScalarValue::Date32(19797));
        assert_eq!(batch.value(1, 0).unwrap(), ScalarValue::Int64(16));
        assert_eq!(batch.value(1, 2).unwrap(), ScalarValue::Null);
    }

    #[tokio::test]
    async fn test_insert_null_into_required_column() {
        let provider = table();
        let exec = InsertExec::new(
            "t",
            provider.clone(),
            provider.schema(),
            vec![2],
            vec![vec![Expr::literal(ScalarValue::Utf8("x".into()))]],
        );
        let err = exec.execute(0).await.err().expect("insert should fail");
        assert!(matches!(err, QueryError::TypeMismatch(_)));
        assert!(provider.scan(None, None).unwrap().is_empty());
    }
}
