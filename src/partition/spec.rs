//! Partition specs

use super::Transform;
use crate::error::{QueryError, Result};
use crate::types::{ColumnarBatch, PrimitiveType, ScalarValue, Schema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition field ids start here
pub const PARTITION_FIELD_ID_START: u32 = 1000;

/// One partition column derived from a source column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionField {
    pub source_field_id: u32,
    pub partition_field_id: u32,
    pub transform: Transform,
    pub name: String,
}

impl PartitionField {
    /// Path component `name=value`
    pub fn partition_path(&self, value: &ScalarValue) -> String {
        format!("{}={}", self.name, self.transform.to_human_string(value))
    }
}

/// Ordered partition fields of a table; empty means unpartitioned
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartitionSpec {
    spec_id: i32,
    fields: Vec<PartitionField>,
}

impl PartitionSpec {
    pub fn unpartitioned() -> Self {
        Self::default()
    }

    pub fn builder(schema: &Schema) -> PartitionSpecBuilder {
        PartitionSpecBuilder::new(schema)
    }

    pub fn spec_id(&self) -> i32 {
        self.spec_id
    }

    pub fn fields(&self) -> &[PartitionField] {
        &self.fields
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check every field against `schema`
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for (i, field) in self.fields.iter().enumerate() {
            let source = schema.field_by_id(field.source_field_id).ok_or_else(|| {
                QueryError::UnknownField(format!(
                    "partition field '{}' references missing source field id {}",
                    field.name, field.source_field_id
                ))
            })?;
            field.transform.result_type(source.field_type)?;
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(QueryError::SchemaMismatch(format!(
                    "duplicate partition name '{}'",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Joined path for one tuple of partition values, e.g. `day=2024-03-15`
    pub fn partition_path(&self, values: &[ScalarValue]) -> Result<String> {
        if values.len() != self.fields.len() {
            return Err(QueryError::SchemaMismatch(format!(
                "expected {} partition values, got {}",
                self.fields.len(),
                values.len()
            )));
        }
        Ok(self
            .fields
            .iter()
            .zip(values)
            .map(|(field, value)| field.partition_path(value))
            .collect::<Vec<_>>()
            .join("/"))
    }

    /// Partition tuple of every row of `batch`
    pub fn partition_values(&self, batch: &ColumnarBatch) -> Result<Vec<Vec<ScalarValue>>> {
        let schema = batch.schema();
        let mut transformed = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let source = schema.field_by_id(field.source_field_id).ok_or_else(|| {
                QueryError::UnknownField(format!("source field id {}", field.source_field_id))
            })?;
            let index = schema
                .index_of(&source.name)
                .ok_or_else(|| QueryError::UnknownField(source.name.clone()))?;
            let column = batch
                .column(index)
                .ok_or_else(|| QueryError::UnknownField(source.name.clone()))?;
            transformed.push(field.transform.apply(column, source.field_type)?);
        }

        (0..batch.num_rows())
            .map(|row| {
                transformed
                    .iter()
                    .map(|array| ScalarValue::try_from_array(array.as_ref(), row))
                    .collect()
            })
            .collect()
    }
}

impl fmt::Display for PartitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|p| format!("{}: {}({})", p.name, p.transform, p.source_field_id))
            .collect();
        write!(f, "[{}]", fields.join(", "))
    }
}

/// Builds a [`PartitionSpec`] against a schema, validating each field as it is added
#[derive(Debug, Clone)]
pub struct PartitionSpecBuilder {
    schema: Schema,
    spec_id: i32,
    fields: Vec<PartitionField>,
}

impl PartitionSpecBuilder {
    pub fn new(schema: &Schema) -> Self {
        Self {
            schema: schema.clone(),
            spec_id: 0,
            fields: Vec::new(),
        }
    }

    pub fn with_spec_id(mut self, spec_id: i32) -> Self {
        self.spec_id = spec_id;
        self
    }

    /// Add a partition field on the source column `source_name`
    pub fn add_partition_field(
        &mut self,
        source_name: &str,
        partition_name: impl Into<String>,
        transform: Transform,
    ) -> Result<&mut Self> {
        let source = self.schema.resolve(source_name)?;
        let source_id = source.id;
        let source_type = source.field_type;
        self.push(source_id, source_type, partition_name.into(), transform)
    }

    fn push(
        &mut self,
        source_field_id: u32,
        source_type: PrimitiveType,
        name: String,
        transform: Transform,
    ) -> Result<&mut Self> {
        transform.result_type(source_type)?;
        if self.fields.iter().any(|f| f.name == name) {
            return Err(QueryError::SchemaMismatch(format!(
                "duplicate partition name '{}'",
                name
            )));
        }
        let partition_field_id = PARTITION_FIELD_ID_START + self.fields.len() as u32;
        self.fields.push(PartitionField {
            source_field_id,
            partition_field_id,
            transform,
            name,
        });
        Ok(self)
    }

    pub fn build(self) -> PartitionSpec {
        PartitionSpec {
            spec_id: self.spec_id,
            fields: self.fields,
        }
    }
}
