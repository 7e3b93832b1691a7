//! Typed, fixed-schema columnar batches

use super::{PrimitiveType, ScalarValue, Schema};
use crate::error::{QueryError, Result};
use arrow::array::{new_empty_array, Array, ArrayRef, BooleanArray};
use arrow::compute;
use arrow::datatypes::DataType as ArrowDataType;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::sync::Arc;

/// A batch of rows whose columns match a [`Schema`].
///
/// Every column has `num_rows()` entries, column `i` has field `i`'s type
/// and required fields hold no nulls. Batches are immutable; all
/// transformations return new batches.
#[derive(Debug, Clone)]
pub struct ColumnarBatch {
    schema: Arc<Schema>,
    batch: RecordBatch,
}

impl ColumnarBatch {
    pub fn try_new(schema: Arc<Schema>, columns: Vec<ArrayRef>) -> Result<Self> {
        if columns.len() != schema.len() {
            return Err(QueryError::SchemaMismatch(format!(
                "expected {} columns, got {}",
                schema.len(),
                columns.len()
            )));
        }

        let row_count = columns.first().map(|c| c.len()).unwrap_or(0);
        if let Some((i, col)) = columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() != row_count)
        {
            return Err(QueryError::SchemaMismatch(format!(
                "column {} has {} rows, expected {}",
                i,
                col.len(),
                row_count
            )));
        }

        let mut checked = Vec::with_capacity(columns.len());
        for (field, column) in schema.fields().iter().zip(columns) {
            let column = if field.field_type == PrimitiveType::Long
                && column.data_type() == &ArrowDataType::Int32
            {
                compute::cast(&column, &ArrowDataType::Int64)?
            } else {
                column
            };
            field
                .field_type
                .check_array(&column)
                .map_err(|_| {
                    QueryError::TypeMismatch(format!(
                        "column '{}' expects {}, found {:?}",
                        field.name,
                        field.field_type,
                        column.data_type()
                    ))
                })?;
            if field.required && column.null_count() > 0 {
                return Err(QueryError::TypeMismatch(format!(
                    "required column '{}' contains {} nulls",
                    field.name,
                    column.null_count()
                )));
            }
            checked.push(column);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(row_count));
        let batch =
            RecordBatch::try_new_with_options(schema.to_arrow_schema_ref(), checked, &options)?;
        Ok(Self { schema, batch })
    }

    pub fn new_empty(schema: Arc<Schema>) -> Self {
        let arrow_schema = schema.to_arrow_schema_ref();
        let columns = arrow_schema
            .fields()
            .iter()
            .map(|f| new_empty_array(f.data_type()))
            .collect();
        let options = RecordBatchOptions::new().with_row_count(Some(0));
        // Empty arrays of the declared types always satisfy the schema
        let batch = RecordBatch::try_new_with_options(arrow_schema.clone(), columns, &options)
            .unwrap_or_else(|_| RecordBatch::new_empty(arrow_schema));
        Self { schema, batch }
    }

    /// Wrap an Arrow batch, checking it against `schema`. Column names in
    /// the Arrow batch are ignored; position and type decide.
    pub fn from_record_batch(schema: Arc<Schema>, batch: &RecordBatch) -> Result<Self> {
        Self::try_new(schema, batch.columns().to_vec())
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn column(&self, index: usize) -> Option<&ArrayRef> {
        self.batch.columns().get(index)
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ArrayRef> {
        self.schema.index_of(name).and_then(|i| self.column(i))
    }

    /// Random access to a single cell
    pub fn value(&self, row: usize, column: usize) -> Result<ScalarValue> {
        let array = self.column(column).ok_or_else(|| {
            QueryError::execution(
                "ColumnarBatch",
                format!("column {}", column),
                format!("column index out of range for {} columns", self.num_columns()),
            )
        })?;
        ScalarValue::try_from_array(array.as_ref(), row)
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    /// Append `other`'s rows. Schemas must be identical.
    pub fn concat(&self, other: &ColumnarBatch) -> Result<ColumnarBatch> {
        if self.schema != other.schema {
            return Err(QueryError::SchemaMismatch(
                "cannot concatenate batches with different schemas".to_string(),
            ));
        }
        Self::concat_all(self.schema.clone(), &[self.clone(), other.clone()])
    }

    pub fn concat_all(schema: Arc<Schema>, batches: &[ColumnarBatch]) -> Result<ColumnarBatch> {
        if batches.iter().any(|b| b.schema != schema) {
            return Err(QueryError::SchemaMismatch(
                "cannot concatenate batches with different schemas".to_string(),
            ));
        }
        if batches.is_empty() {
            return Ok(Self::new_empty(schema));
        }
        if schema.is_empty() {
            let rows = batches.iter().map(|b| b.num_rows()).sum();
            let options = RecordBatchOptions::new().with_row_count(Some(rows));
            let batch =
                RecordBatch::try_new_with_options(schema.to_arrow_schema_ref(), vec![], &options)?;
            return Ok(Self { schema, batch });
        }
        let arrow_schema = batches[0].batch.schema();
        let batch = compute::concat_batches(&arrow_schema, batches.iter().map(|b| &b.batch))?;
        Ok(Self { schema, batch })
    }

    pub fn project(&self, indices: &[usize]) -> Result<ColumnarBatch> {
        let schema = Arc::new(self.schema.project(indices)?);
        let batch = self.batch.project(indices)?;
        Ok(Self { schema, batch })
    }

    pub fn slice(&self, offset: usize, length: usize) -> Result<ColumnarBatch> {
        if offset.saturating_add(length) > self.num_rows() {
            return Err(QueryError::execution(
                "ColumnarBatch",
                format!("slice {}..{}", offset, offset.saturating_add(length)),
                format!("out of range for {} rows", self.num_rows()),
            ));
        }
        Ok(Self {
            schema: self.schema.clone(),
            batch: self.batch.slice(offset, length),
        })
    }

    /// Keep rows where `mask` is true; null mask entries drop the row
    pub fn filter(&self, mask: &BooleanArray) -> Result<ColumnarBatch> {
        if mask.len() != self.num_rows() {
            return Err(QueryError::SchemaMismatch(format!(
                "filter mask has {} entries for {} rows",
                mask.len(),
                self.num_rows()
            )));
        }
        let batch = compute::filter_record_batch(&self.batch, mask)?;
        Ok(Self {
            schema: self.schema.clone(),
            batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, Int64Array, StringArray};

    fn schema() -> Arc<Schema> {
        let mut builder = Schema::builder();
        builder
            .add_field(1, "id", PrimitiveType::Long, true)
            .unwrap()
            .add_field(2, "name", PrimitiveType::String, false)
            .unwrap();
        Arc::new(builder.build())
    }

    fn batch(ids: Vec<i64>, names: Vec<Option<&str>>) -> ColumnarBatch {
        ColumnarBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_construction_checks_counts() {
        let err = ColumnarBatch::try_new(schema(), vec![Arc::new(Int64Array::from(vec![1]))]);
        assert!(matches!(err, Err(QueryError::SchemaMismatch(_))));

        let err = ColumnarBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec!["a"])),
            ],
        );
        assert!(matches!(err, Err(QueryError::SchemaMismatch(_))));
    }

    #[test]
    fn test_construction_checks_types() {
        let err = ColumnarBatch::try_new(
            schema(),
            vec![
                Arc::new(StringArray::from(vec!["1"])),
                Arc::new(StringArray::from(vec!["a"])),
            ],
        );
        assert!(matches!(err, Err(QueryError::TypeMismatch(_))));

        let err = ColumnarBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(vec![None, Some(2)])),
                Arc::new(StringArray::from(vec!["a", "b"])),
            ],
        );
        assert!(matches!(err, Err(QueryError::TypeMismatch(_))));
    }

    #[test]
    fn test_int_widens_to_long() {
        let batch = ColumnarBatch::try_new(
            schema(),
            vec![
                Arc::new(Int32Array::from(vec![7])),
                Arc::new(StringArray::from(vec![Some("x")])),
            ],
        )
        .unwrap();
        assert_eq!(batch.value(0, 0).unwrap(), ScalarValue::Int64(7));
    }

    #[test]
    fn test_concat_and_access() {
        let a = batch(vec![1, 2], vec![Some("a"), None]);
        let b = batch(vec![3], vec![Some("c")]);
        let c = a.concat(&b).unwrap();
        assert_eq!(c.num_rows(), 3);
        assert_eq!(c.value(2, 1).unwrap(), ScalarValue::Utf8("c".into()));
        assert_eq!(c.value(1, 1).unwrap(), ScalarValue::Null);
        assert!(c.value(3, 0).is_err());
        assert!(c.value(0, 2).is_err());
        assert_eq!(c.column_by_name("id").unwrap().len(), 3);
    }

    #[test]
    fn test_concat_rejects_other_schema() {
        let a = batch(vec![1], vec![Some("a")]);
        let other = a.project(&[0]).unwrap();
        assert!(matches!(
            a.concat(&other),
            Err(QueryError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_transformations_return_new_batches() {
        let a = batch(vec![1, 2, 3], vec![Some("a"), Some("b"), Some("c")]);
        let mask = BooleanArray::from(vec![Some(true), None, Some(true)]);
        let filtered = a.filter(&mask).unwrap();
        assert_eq!(filtered.num_rows(), 2);
        assert_eq!(a.num_rows(), 3);

        let sliced = a.slice(1, 2).unwrap();
        assert_eq!(sliced.value(0, 0).unwrap(), ScalarValue::Int64(2));
        assert!(a.slice(2, 5).is_err());

        let projected = a.project(&[1]).unwrap();
        assert_eq!(projected.schema().fields()[0].name, "name");
    }

    #[test]
    fn test_empty_batch() {
        let empty = ColumnarBatch::new_empty(schema());
        assert_eq!(empty.num_rows(), 0);
        assert_eq!(empty.num_columns(), 2);
        let all = ColumnarBatch::concat_all(schema(), &[]).unwrap();
        assert_eq!(all.num_rows(), 0);
    }
}
