//! Handle-style entry points for foreign-function bindings.
//!
//! Every fallible call returns `bool` or `Option` instead of `Result`; the
//! error of the most recent failed call on the current thread is kept and
//! read back with [`last_error`]. Successful calls leave it untouched.

use crate::catalog::{self, Catalog, TableCreation, TableIdent, TableMetadata};
use crate::error::{ErrorKind, QueryError, Result};
use crate::execution::{ExecutionConfig, ExecutionContext, QueryResult, SourceDescriptor};
use crate::partition::{PartitionSpec, Transform};
use crate::types::{PrimitiveType, ScalarValue, Schema, SchemaBuilder};
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// Error recorded by the last failed call on this thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

pub fn last_error() -> Option<LastError> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

pub fn clear_last_error() {
    LAST_ERROR.with(|cell| cell.borrow_mut().take());
}

fn record<T>(result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(kind = e.kind().as_str(), error = %e, "API call failed");
            LAST_ERROR.with(|cell| {
                *cell.borrow_mut() = Some(LastError {
                    kind: e.kind(),
                    message: e.to_string(),
                })
            });
            None
        }
    }
}

/// Session handle
#[derive(Debug)]
pub struct ContextHandle {
    ctx: ExecutionContext,
}

/// Owned query result
#[derive(Debug)]
pub struct ResultHandle {
    result: QueryResult,
}

#[derive(Debug, Clone)]
pub struct CatalogHandle {
    catalog: Arc<dyn Catalog>,
}

/// Schema under construction. Passing it to [`create_table`] finalizes it.
#[derive(Debug, Default)]
pub struct SchemaHandle {
    builder: Option<SchemaBuilder>,
}

/// Partition fields, validated against the schema by [`create_table`]
#[derive(Debug, Default)]
pub struct PartitionSpecHandle {
    fields: Vec<(String, String, Transform)>,
}

#[derive(Debug, Clone)]
pub struct TableHandle {
    metadata: TableMetadata,
}

pub fn open_context() -> ContextHandle {
    open_context_with_config(ExecutionConfig::from_env())
}

pub fn open_context_with_config(config: ExecutionConfig) -> ContextHandle {
    ContextHandle {
        ctx: ExecutionContext::with_config(config),
    }
}

pub fn close(ctx: ContextHandle) {
    ctx.ctx.close();
}

/// Use `catalog` for catalog table registration and inserts
pub fn attach_catalog(ctx: &mut ContextHandle, catalog: &CatalogHandle) {
    let current = std::mem::take(&mut ctx.ctx);
    ctx.ctx = current.with_catalog(catalog.catalog.clone());
}

pub fn register_source(ctx: &mut ContextHandle, name: &str, descriptor: SourceDescriptor) -> bool {
    record(ctx.ctx.register_source(name, descriptor)).is_some()
}

pub fn register_table(ctx: &mut ContextHandle, name: &str, table: &TableHandle) -> bool {
    register_source(
        ctx,
        name,
        SourceDescriptor::CatalogTable {
            table: table.metadata.clone(),
        },
    )
}

/// Run one statement to completion on a runtime owned by this call
pub fn execute(ctx: &ContextHandle, sql: &str) -> Option<ResultHandle> {
    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(QueryError::from)
        .and_then(|runtime| runtime.block_on(ctx.ctx.sql(sql)));
    record(result).map(|result| ResultHandle { result })
}

pub fn result_batch_count(result: &ResultHandle) -> usize {
    result.result.batch_count()
}

pub fn result_row_count(result: &ResultHandle) -> usize {
    result.result.row_count()
}

pub fn result_batch_row_count(result: &ResultHandle, batch: usize) -> Option<usize> {
    record(
        result
            .result
            .batch_row_count(batch)
            .ok_or_else(|| batch_out_of_range(result, batch)),
    )
}

pub fn result_batch_column_count(result: &ResultHandle, batch: usize) -> Option<usize> {
    record(
        result
            .result
            .batch_column_count(batch)
            .ok_or_else(|| batch_out_of_range(result, batch)),
    )
}

pub fn result_column_names(result: &ResultHandle) -> Vec<String> {
    result
        .result
        .schema()
        .fields()
        .iter()
        .map(|f| f.name.clone())
        .collect()
}

pub fn result_value(result: &ResultHandle, batch: usize, row: usize, column: usize) -> Option<ScalarValue> {
    let value = result
        .result
        .batches()
        .get(batch)
        .ok_or_else(|| batch_out_of_range(result, batch))
        .and_then(|b| b.value(row, column));
    record(value)
}

pub fn pretty(result: &ResultHandle) -> Option<String> {
    record(result.result.pretty())
}

fn batch_out_of_range(result: &ResultHandle, batch: usize) -> QueryError {
    QueryError::InvalidArgument(format!(
        "batch index {} out of range for {} batches",
        batch,
        result.result.batch_count()
    ))
}

pub fn open_catalog(connection_uri: &str, catalog_name: &str) -> Option<CatalogHandle> {
    record(catalog::open_catalog(connection_uri, catalog_name)).map(|catalog| CatalogHandle { catalog })
}

pub fn new_schema() -> SchemaHandle {
    SchemaHandle {
        builder: Some(SchemaBuilder::new()),
    }
}

/// Append a field. `type_name` is one of the primitive type names
/// (`boolean, int, long, float, double, date, timestamp, string`).
pub fn schema_add_field(
    schema: &mut SchemaHandle,
    id: u32,
    name: &str,
    type_name: &str,
    required: bool,
) -> bool {
    let result = schema
        .builder
        .as_mut()
        .ok_or_else(|| {
            QueryError::InvalidArgument("schema handle is finalized".to_string())
        })
        .and_then(|builder| {
            let field_type: PrimitiveType = type_name.parse()?;
            builder.add_field(id, name, field_type, required)?;
            Ok(())
        });
    record(result).is_some()
}

pub fn schema_is_finalized(schema: &SchemaHandle) -> bool {
    schema.builder.is_none()
}

pub fn new_partition_spec() -> PartitionSpecHandle {
    PartitionSpecHandle::default()
}

/// Add a partition field; `transform` is e.g. `day` or `truncate[4]`
pub fn partition_spec_add_field(
    spec: &mut PartitionSpecHandle,
    source_name: &str,
    partition_name: &str,
    transform: &str,
) -> bool {
    let result = transform.parse::<Transform>().map(|transform| {
        spec.fields
            .push((source_name.to_string(), partition_name.to_string(), transform))
    });
    record(result).is_some()
}

/// Create a table. The schema handle is finalized whether or not creation
/// succeeds.
pub fn create_table(
    catalog: &CatalogHandle,
    namespace: &str,
    name: &str,
    location: &str,
    schema: &mut SchemaHandle,
    spec: Option<&PartitionSpecHandle>,
) -> Option<TableHandle> {
    let result = schema
        .builder
        .take()
        .ok_or_else(|| QueryError::InvalidArgument("schema handle is finalized".to_string()))
        .and_then(|builder| {
            let schema: Schema = builder.build();
            let partition_spec = match spec {
                Some(spec) => build_spec(&schema, spec)?,
                None => PartitionSpec::unpartitioned(),
            };
            let creation =
                TableCreation::new(name, location, schema).with_partition_spec(partition_spec);
            catalog.catalog.create_table(namespace, creation)
        });
    record(result).map(|metadata| TableHandle { metadata })
}

fn build_spec(schema: &Schema, spec: &PartitionSpecHandle) -> Result<PartitionSpec> {
    let mut builder = PartitionSpec::builder(schema);
    for (source, name, transform) in &spec.fields {
        builder.add_partition_field(source, name.as_str(), *transform)?;
    }
    Ok(builder.build())
}

pub fn load_table(catalog: &CatalogHandle, namespace: &str, name: &str) -> Option<TableHandle> {
    record(catalog.catalog.load_table(&TableIdent::new(namespace, name)))
        .map(|metadata| TableHandle { metadata })
}

pub fn table_metadata(table: &TableHandle) -> &TableMetadata {
    &table.metadata
}

pub fn table_snapshot_count(table: &TableHandle) -> usize {
    table.metadata.history().len()
}
