//! Schema and type system shared by the execution engine and the table catalog
//!
//! Fields carry stable ids which survive renames and are written into Arrow
//! and Parquet field metadata under [`FIELD_ID_META_KEY`].

pub mod batch;
mod scalar;

pub use batch::ColumnarBatch;
pub use scalar::*;

use crate::error::{QueryError, Result};
use arrow::array::{Array, ArrayRef};
use arrow::datatypes::{
    DataType as ArrowDataType, Field as ArrowField, Schema as ArrowSchema, SchemaRef, TimeUnit,
};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Metadata key carrying a field id in Arrow and Parquet schemas
pub const FIELD_ID_META_KEY: &str = "PARQUET:field_id";

/// Primitive column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Boolean,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    Float,
    Double,
    /// Days since epoch
    Date,
    /// Microseconds since epoch, no zone
    Timestamp,
    String,
}

impl PrimitiveType {
    pub fn to_arrow(&self) -> ArrowDataType {
        match self {
            PrimitiveType::Boolean => ArrowDataType::Boolean,
            PrimitiveType::Int => ArrowDataType::Int32,
            PrimitiveType::Long => ArrowDataType::Int64,
            PrimitiveType::Float => ArrowDataType::Float32,
            PrimitiveType::Double => ArrowDataType::Float64,
            PrimitiveType::Date => ArrowDataType::Date32,
            PrimitiveType::Timestamp => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
            PrimitiveType::String => ArrowDataType::Utf8,
        }
    }

    pub fn from_arrow(data_type: &ArrowDataType) -> Result<Self> {
        match data_type {
            ArrowDataType::Boolean => Ok(PrimitiveType::Boolean),
            ArrowDataType::Int32 => Ok(PrimitiveType::Int),
            ArrowDataType::Int64 => Ok(PrimitiveType::Long),
            ArrowDataType::Float32 => Ok(PrimitiveType::Float),
            ArrowDataType::Float64 => Ok(PrimitiveType::Double),
            ArrowDataType::Date32 => Ok(PrimitiveType::Date),
            ArrowDataType::Timestamp(TimeUnit::Microsecond, None) => Ok(PrimitiveType::Timestamp),
            ArrowDataType::Utf8 => Ok(PrimitiveType::String),
            other => Err(QueryError::TypeMismatch(format!(
                "Unsupported column type {:?}",
                other
            ))),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PrimitiveType::Int | PrimitiveType::Long | PrimitiveType::Float | PrimitiveType::Double
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, PrimitiveType::Date | PrimitiveType::Timestamp)
    }

    /// Build an array of this type from scalars. Values must already be
    /// coerced to this type or be NULL.
    pub fn build_array(&self, values: &[ScalarValue]) -> Result<ArrayRef> {
        use arrow::array::{
            BooleanBuilder, Date32Builder, Float32Builder, Float64Builder, Int32Builder,
            Int64Builder, StringBuilder, TimestampMicrosecondBuilder,
        };

        macro_rules! build {
            ($builder:expr, $variant:ident, $conv:expr) => {{
                let mut builder = $builder;
                for value in values {
                    match value {
                        ScalarValue::Null => builder.append_null(),
                        ScalarValue::$variant(v) => builder.append_value($conv(v)),
                        other => {
                            return Err(QueryError::TypeMismatch(format!(
                                "value {} in {} column",
                                other, self
                            )))
                        }
                    }
                }
                Arc::new(builder.finish()) as ArrayRef
            }};
        }

        let array = match self {
            PrimitiveType::Boolean => build!(BooleanBuilder::new(), Boolean, |v: &bool| *v),
            PrimitiveType::Int => build!(Int32Builder::new(), Int32, |v: &i32| *v),
            PrimitiveType::Long => build!(Int64Builder::new(), Int64, |v: &i64| *v),
            PrimitiveType::Float => {
                build!(Float32Builder::new(), Float32, |v: &OrderedFloat<f32>| v.0)
            }
            PrimitiveType::Double => {
                build!(Float64Builder::new(), Float64, |v: &OrderedFloat<f64>| v.0)
            }
            PrimitiveType::Date => build!(Date32Builder::new(), Date32, |v: &i32| *v),
            PrimitiveType::Timestamp => {
                build!(TimestampMicrosecondBuilder::new(), Timestamp, |v: &i64| *v)
            }
            PrimitiveType::String => build!(StringBuilder::new(), Utf8, String::as_str),
        };
        Ok(array)
    }

    /// Check that an array holds values of exactly this type
    pub fn check_array(&self, array: &ArrayRef) -> Result<()> {
        if array.data_type() == &self.to_arrow() {
            Ok(())
        } else {
            Err(QueryError::TypeMismatch(format!(
                "expected {} column, found {:?}",
                self,
                array.data_type()
            )))
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Date => "date",
            PrimitiveType::Timestamp => "timestamp",
            PrimitiveType::String => "string",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PrimitiveType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "boolean" | "bool" => Ok(PrimitiveType::Boolean),
            "int" | "integer" | "int32" => Ok(PrimitiveType::Int),
            "long" | "bigint" | "int64" => Ok(PrimitiveType::Long),
            "float" | "real" | "float32" => Ok(PrimitiveType::Float),
            "double" | "float64" => Ok(PrimitiveType::Double),
            "date" => Ok(PrimitiveType::Date),
            "timestamp" => Ok(PrimitiveType::Timestamp),
            "string" | "varchar" | "text" | "utf8" => Ok(PrimitiveType::String),
            other => Err(QueryError::InvalidArgument(format!(
                "Unknown type name: {}",
                other
            ))),
        }
    }
}

/// A schema field with a stable id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: PrimitiveType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl Field {
    pub fn new(id: u32, name: impl Into<String>, field_type: PrimitiveType, required: bool) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
            required,
            doc: None,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Arrow field carrying the id in its metadata
    pub fn to_arrow_field(&self) -> ArrowField {
        let metadata = HashMap::from([(FIELD_ID_META_KEY.to_string(), self.id.to_string())]);
        ArrowField::new(&self.name, self.field_type.to_arrow(), !self.required)
            .with_metadata(metadata)
    }

    /// Type-check a literal against this field.
    ///
    /// Allowed conversions: Int to Long widening, Long literals that fit an
    /// Int field, numeric literals into Float/Double fields, and string
    /// literals in date or timestamp form into Date/Timestamp fields.
    pub fn coerce_scalar(&self, value: &ScalarValue) -> Result<ScalarValue> {
        let mismatch = || {
            QueryError::TypeMismatch(format!(
                "value {} is not compatible with field '{}' of type {}",
                value, self.name, self.field_type
            ))
        };

        let coerced = match (self.field_type, value) {
            (_, ScalarValue::Null) => {
                if self.required {
                    return Err(QueryError::TypeMismatch(format!(
                        "required field '{}' cannot be NULL",
                        self.name
                    )));
                }
                ScalarValue::Null
            }
            (PrimitiveType::Boolean, ScalarValue::Boolean(v)) => ScalarValue::Boolean(*v),
            (PrimitiveType::Int, ScalarValue::Int32(v)) => ScalarValue::Int32(*v),
            (PrimitiveType::Int, ScalarValue::Int64(v)) => {
                ScalarValue::Int32(i32::try_from(*v).map_err(|_| mismatch())?)
            }
            (PrimitiveType::Long, ScalarValue::Int32(v)) => ScalarValue::Int64(*v as i64),
            (PrimitiveType::Long, ScalarValue::Int64(v)) => ScalarValue::Int64(*v),
            (PrimitiveType::Float, ScalarValue::Float32(v)) => ScalarValue::Float32(*v),
            (PrimitiveType::Float, ScalarValue::Float64(v)) => {
                ScalarValue::Float32(OrderedFloat(v.0 as f32))
            }
            (PrimitiveType::Float, ScalarValue::Int32(v)) => {
                ScalarValue::Float32(OrderedFloat(*v as f32))
            }
            (PrimitiveType::Float, ScalarValue::Int64(v)) => {
                ScalarValue::Float32(OrderedFloat(*v as f32))
            }
            (PrimitiveType::Double, ScalarValue::Float32(v)) => {
                ScalarValue::Float64(OrderedFloat(v.0 as f64))
            }
            (PrimitiveType::Double, ScalarValue::Float64(v)) => ScalarValue::Float64(*v),
            (PrimitiveType::Double, ScalarValue::Int32(v)) => {
                ScalarValue::Float64(OrderedFloat(*v as f64))
            }
            (PrimitiveType::Double, ScalarValue::Int64(v)) => {
                ScalarValue::Float64(OrderedFloat(*v as f64))
            }
            (PrimitiveType::Date, ScalarValue::Date32(v)) => ScalarValue::Date32(*v),
            (PrimitiveType::Date, ScalarValue::Utf8(s)) => {
                ScalarValue::Date32(parse_date(s).ok_or_else(mismatch)?)
            }
            (PrimitiveType::Timestamp, ScalarValue::Timestamp(v)) => ScalarValue::Timestamp(*v),
            (PrimitiveType::Timestamp, ScalarValue::Utf8(s)) => {
                ScalarValue::Timestamp(parse_timestamp(s).ok_or_else(mismatch)?)
            }
            (PrimitiveType::String, ScalarValue::Utf8(s)) => ScalarValue::Utf8(s.clone()),
            _ => return Err(mismatch()),
        };
        Ok(coerced)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {} (id {})",
            self.name,
            if self.required { "required" } else { "optional" },
            self.field_type,
            self.id
        )
    }
}

/// An ordered, frozen set of fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    schema_id: i32,
    fields: Vec<Field>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn schema_id(&self) -> i32 {
        self.schema_id
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field by name
    pub fn resolve(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| QueryError::UnknownField(name.to_string()))
    }

    pub fn field_by_id(&self, id: u32) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn highest_field_id(&self) -> u32 {
        self.fields.iter().map(|f| f.id).max().unwrap_or(0)
    }

    /// Schema restricted to the given column indices
    pub fn project(&self, indices: &[usize]) -> Result<Schema> {
        let fields = indices
            .iter()
            .map(|&i| {
                self.fields.get(i).cloned().ok_or_else(|| {
                    QueryError::SchemaMismatch(format!(
                        "projection index {} out of range for {} fields",
                        i,
                        self.fields.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema {
            schema_id: self.schema_id,
            fields,
        })
    }

    pub fn to_arrow_schema(&self) -> ArrowSchema {
        ArrowSchema::new(
            self.fields
                .iter()
                .map(|f| f.to_arrow_field())
                .collect::<Vec<_>>(),
        )
    }

    pub fn to_arrow_schema_ref(&self) -> SchemaRef {
        Arc::new(self.to_arrow_schema())
    }

    /// Convert an Arrow schema. Ids come from field metadata when present,
    /// otherwise fields are numbered from 1 in order.
    pub fn try_from_arrow(schema: &ArrowSchema) -> Result<Schema> {
        let mut builder = SchemaBuilder::new();
        for (i, field) in schema.fields().iter().enumerate() {
            let id = match field.metadata().get(FIELD_ID_META_KEY) {
                Some(raw) => raw.parse::<u32>().map_err(|_| {
                    QueryError::SchemaMismatch(format!(
                        "invalid field id '{}' on column '{}'",
                        raw,
                        field.name()
                    ))
                })?,
                None => i as u32 + 1,
            };
            let field_type = PrimitiveType::from_arrow(field.data_type())?;
            builder.add_field(id, field.name().clone(), field_type, !field.is_nullable())?;
        }
        Ok(builder.build())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self.fields.iter().map(|fl| fl.to_string()).collect();
        write!(f, "schema {} [{}]", self.schema_id, fields.join(", "))
    }
}

/// Append-only schema builder. `build()` freezes the result.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    schema_id: i32,
    fields: Vec<Field>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema_id(mut self, schema_id: i32) -> Self {
        self.schema_id = schema_id;
        self
    }

    /// Append a field. Ids and names must be unique.
    pub fn add_field(
        &mut self,
        id: u32,
        name: impl Into<String>,
        field_type: PrimitiveType,
        required: bool,
    ) -> Result<&mut Self> {
        self.push(Field::new(id, name, field_type, required))
    }

    pub fn push(&mut self, field: Field) -> Result<&mut Self> {
        if self.fields.iter().any(|f| f.id == field.id) {
            return Err(QueryError::DuplicateFieldId(field.id));
        }
        if self.fields.iter().any(|f| f.name == field.name) {
            return Err(QueryError::SchemaMismatch(format!(
                "duplicate field name '{}'",
                field.name
            )));
        }
        self.fields.push(field);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn build(self) -> Schema {
        Schema {
            schema_id: self.schema_id,
            fields: self.fields,
        }
    }
}
