//! Schema types for the query engine

use crate::error::{QueryError, Result};
use crate::types::Schema;
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema};
use std::collections::HashMap;
use std::sync::Arc;

/// A column in a schema
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    /// Optional table/relation name
    pub relation: Option<String>,
    /// Column name
    pub name: String,
    /// Stable field id when the column comes from a base table
    pub field_id: Option<u32>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            relation: None,
            name: name.into(),
            field_id: None,
        }
    }

    pub fn new_qualified(relation: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            relation: Some(relation.into()),
            name: name.into(),
            field_id: None,
        }
    }

    pub fn with_field_id(mut self, field_id: Option<u32>) -> Self {
        self.field_id = field_id;
        self
    }

    /// Returns the fully qualified name
    pub fn qualified_name(&self) -> String {
        match &self.relation {
            Some(r) => format!("{}.{}", r, self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

/// Schema field with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub data_type: ArrowDataType,
    pub nullable: bool,
    pub relation: Option<String>,
    pub field_id: Option<u32>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, data_type: ArrowDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            relation: None,
            field_id: None,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn with_field_id(mut self, field_id: u32) -> Self {
        self.field_id = Some(field_id);
        self
    }

    /// Column reference to this field
    pub fn column(&self) -> Column {
        Column {
            relation: self.relation.clone(),
            name: self.name.clone(),
            field_id: self.field_id,
        }
    }

    pub fn to_arrow_field(&self) -> Field {
        // Use qualified name to handle self-joins and ambiguous column names
        Field::new(self.qualified_name(), self.data_type.clone(), self.nullable)
    }

    pub fn qualified_name(&self) -> String {
        match &self.relation {
            Some(r) => format!("{}.{}", r, self.name),
            None => self.name.clone(),
        }
    }
}

/// Schema representing the output of a plan node
#[derive(Debug, Clone)]
pub struct PlanSchema {
    fields: Vec<SchemaField>,
    /// Map from column name to field index (for unqualified lookups)
    name_index: HashMap<String, Vec<usize>>,
    /// Map from qualified name to field index
    qualified_index: HashMap<String, Vec<usize>>,
}

impl PartialEq for PlanSchema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl PlanSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        let mut name_index: HashMap<String, Vec<usize>> = HashMap::new();
        let mut qualified_index: HashMap<String, Vec<usize>> = HashMap::new();

        for (i, field) in fields.iter().enumerate() {
            name_index.entry(field.name.clone()).or_default().push(i);
            qualified_index
                .entry(field.qualified_name())
                .or_default()
                .push(i);
        }

        Self {
            fields,
            name_index,
            qualified_index,
        }
    }

    pub fn empty() -> Self {
        Self::new(vec![])
    }

    /// Schema of a base table seen through `relation`
    pub fn from_table(relation: &str, schema: &Schema) -> Self {
        Self::new(
            schema
                .fields()
                .iter()
                .map(|f| {
                    SchemaField::new(f.name.clone(), f.field_type.to_arrow())
                        .with_nullable(!f.required)
                        .with_relation(relation)
                        .with_field_id(f.id)
                })
                .collect(),
        )
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&SchemaField> {
        self.fields.get(index)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Find a column by name (unqualified)
    pub fn index_of(&self, name: &str) -> Option<usize> {
        match self.name_index.get(name).map(Vec::as_slice) {
            Some([index]) => Some(*index),
            _ => None, // Missing or ambiguous
        }
    }

    /// Find a column by qualified name
    pub fn index_of_qualified(&self, relation: Option<&str>, name: &str) -> Option<usize> {
        match relation {
            Some(rel) => match self
                .qualified_index
                .get(&format!("{}.{}", rel, name))
                .map(Vec::as_slice)
            {
                Some([index]) => Some(*index),
                _ => None,
            },
            None => self.index_of(name),
        }
    }

    /// Resolve a column reference, distinguishing missing from ambiguous
    pub fn resolve_column(&self, col: &Column) -> Result<(usize, &SchemaField)> {
        let candidates = match &col.relation {
            Some(rel) => self.qualified_index.get(&format!("{}.{}", rel, col.name)),
            None => self.name_index.get(&col.name),
        };
        match candidates.map(Vec::as_slice) {
            Some([index]) => Ok((*index, &self.fields[*index])),
            Some([_, _, ..]) => Err(QueryError::UnboundReference(format!(
                "column reference '{}' is ambiguous",
                col.qualified_name()
            ))),
            _ => Err(QueryError::UnboundReference(format!(
                "column '{}' not found",
                col.qualified_name()
            ))),
        }
    }

    /// Convert to Arrow schema
    pub fn to_arrow_schema(&self) -> ArrowSchema {
        let fields: Vec<Field> = self.fields.iter().map(|f| f.to_arrow_field()).collect();
        ArrowSchema::new(fields)
    }

    /// Convert to Arc<ArrowSchema>
    pub fn to_arrow_schema_ref(&self) -> Arc<ArrowSchema> {
        Arc::new(self.to_arrow_schema())
    }

    /// Merge two schemas (for joins)
    pub fn merge(&self, other: &PlanSchema) -> Self {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        Self::new(fields)
    }

    /// Project specific columns
    pub fn project(&self, indices: &[usize]) -> Self {
        let fields: Vec<SchemaField> = indices
            .iter()
            .filter_map(|&i| self.fields.get(i).cloned())
            .collect();
        Self::new(fields)
    }

    /// Same fields, all nullable (right side of an outer join)
    pub fn into_nullable(self) -> Self {
        Self::new(
            self.fields
                .into_iter()
                .map(|f| f.with_nullable(true))
                .collect(),
        )
    }
}

/// Table schemas visible to the binder
pub trait SchemaProvider: Send + Sync {
    fn get_table_schema(&self, name: &str) -> Option<Arc<Schema>>;

    fn table_exists(&self, name: &str) -> bool {
        self.get_table_schema(name).is_some()
    }
}

/// Registry of table schemas keyed by registered name
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    tables: HashMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. An existing registration under `name` is replaced.
    pub fn register_table(&mut self, name: impl Into<String>, schema: Arc<Schema>) {
        self.tables.insert(name.into(), schema);
    }

    pub fn deregister_table(&mut self, name: &str) -> Option<Arc<Schema>> {
        self.tables.remove(name)
    }

    /// Registered names, sorted
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

impl SchemaProvider for SchemaRegistry {
    fn get_table_schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.tables.get(name).cloned()
    }
}
