//! Execution context - main entry point for query execution

use crate::catalog::{Catalog, TableIdent, TableMetadata};
use crate::error::{QueryError, Result};
use crate::execution::ExecutionConfig;
use crate::optimizer::Optimizer;
use crate::parser;
use crate::physical::operators::{MemoryTable, TableProvider};
use crate::physical::{collect_partitions, display_plan, PhysicalOperator, PhysicalPlanner};
use crate::planner::{Binder, LogicalPlan, SchemaRegistry};
use crate::storage::{CatalogTable, CatalogTableOptions, CsvOptions, CsvTable};
use crate::types::{ColumnarBatch, PrimitiveType, Schema};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Query execution result
#[derive(Debug, Clone)]
pub struct QueryResult {
    schema: Arc<Schema>,
    batches: Vec<ColumnarBatch>,
    row_count: usize,
    metrics: QueryMetrics,
}

impl QueryResult {
    /// Output schema
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Result batches in output order
    pub fn batches(&self) -> &[ColumnarBatch] {
        &self.batches
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn batch_row_count(&self, index: usize) -> Option<usize> {
        self.batches.get(index).map(|b| b.num_rows())
    }

    pub fn batch_column_count(&self, index: usize) -> Option<usize> {
        self.batches.get(index).map(|b| b.num_columns())
    }

    /// ASCII grid of the result. The header row is present even when the
    /// result has no rows.
    pub fn pretty(&self) -> Result<String> {
        let mut batches: Vec<RecordBatch> = self
            .batches
            .iter()
            .map(|b| b.record_batch().clone())
            .collect();
        if batches.is_empty() {
            batches.push(RecordBatch::new_empty(self.schema.to_arrow_schema_ref()));
        }
        Ok(arrow::util::pretty::pretty_format_batches(&batches)?.to_string())
    }
}

/// Query execution metrics
#[derive(Debug, Clone, Default)]
pub struct QueryMetrics {
    /// Time spent parsing
    pub parse_time: Duration,
    /// Time spent binding and physical planning
    pub plan_time: Duration,
    /// Time spent optimizing
    pub optimize_time: Duration,
    /// Time spent executing
    pub execute_time: Duration,
    /// Total time
    pub total_time: Duration,
}

/// Where a registered table's rows come from
#[derive(Debug, Clone)]
pub enum SourceDescriptor {
    /// A CSV file; the schema is inferred when not given
    Csv {
        path: PathBuf,
        schema: Option<Schema>,
    },
    /// A catalog table, writable when the context has a catalog
    CatalogTable { table: TableMetadata },
    /// Batches held in memory
    Memory {
        schema: Arc<Schema>,
        batches: Vec<ColumnarBatch>,
    },
}

/// Execution context - manages registered tables and executes queries
pub struct ExecutionContext {
    registry: SchemaRegistry,
    tables: HashMap<String, Arc<dyn TableProvider>>,
    catalog: Option<Arc<dyn Catalog>>,
    optimizer: Optimizer,
    config: ExecutionConfig,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("tables", &self.registry.table_names())
            .field("catalog", &self.catalog.as_ref().map(|c| c.name().to_string()))
            .field("config", &self.config)
            .finish()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::with_config(ExecutionConfig::default())
    }

    pub fn with_config(config: ExecutionConfig) -> Self {
        Self {
            registry: SchemaRegistry::new(),
            tables: HashMap::new(),
            catalog: None,
            optimizer: Optimizer::new(),
            config,
        }
    }

    /// Attach a catalog used by `register_catalog_table` and by inserts
    /// into catalog tables
    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn catalog(&self) -> Option<&Arc<dyn Catalog>> {
        self.catalog.as_ref()
    }

    /// End the session, releasing every registered source
    pub fn close(self) {
        tracing::debug!(tables = self.tables.len(), "Closing execution context");
    }

    /// Register a table source under `name`, replacing any previous one
    pub fn register_source(&mut self, name: impl Into<String>, source: SourceDescriptor) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(QueryError::InvalidArgument("table name must not be empty".to_string()));
        }

        let provider: Arc<dyn TableProvider> = match source {
            SourceDescriptor::Csv { path, schema } => {
                let options = CsvOptions {
                    has_header: self.config.csv_has_header,
                    delimiter: self.config.csv_delimiter,
                    batch_size: self.config.batch_size,
                };
                Arc::new(CsvTable::try_new(path, schema, options)?)
            }
            SourceDescriptor::CatalogTable { table } => {
                if table.schema.is_empty() {
                    return Err(QueryError::SchemaMismatch(format!(
                        "table {} has no columns",
                        table.ident()
                    )));
                }
                let options = CatalogTableOptions {
                    batch_size: self.config.batch_size,
                    compression: self.config.parquet_compression,
                };
                Arc::new(CatalogTable::new(table, self.catalog.clone(), options))
            }
            SourceDescriptor::Memory { schema, batches } => {
                Arc::new(MemoryTable::try_new(schema, batches)?)
            }
        };

        tracing::info!(table = %name, source = provider.source_type(), "Registered table");
        self.register_table_provider(name, provider);
        Ok(())
    }

    /// Register a custom table provider
    pub fn register_table_provider(&mut self, name: impl Into<String>, provider: Arc<dyn TableProvider>) {
        let name = name.into();
        self.registry.register_table(name.clone(), provider.schema());
        self.tables.insert(name, provider);
    }

    /// Load `ident` from the context's catalog and register it as `name`
    pub fn register_catalog_table(&mut self, name: impl Into<String>, ident: &TableIdent) -> Result<()> {
        let catalog = self.catalog.as_ref().ok_or_else(|| {
            QueryError::InvalidArgument("execution context has no catalog".to_string())
        })?;
        let table = catalog.load_table(ident)?;
        self.register_source(name, SourceDescriptor::CatalogTable { table })
    }

    /// Remove a registration. Returns whether `name` was registered.
    pub fn deregister(&mut self, name: &str) -> bool {
        self.registry.deregister_table(name);
        self.tables.remove(name).is_some()
    }

    /// Registered table names, sorted
    pub fn table_names(&self) -> Vec<String> {
        self.registry.table_names()
    }

    /// Get table schema
    pub fn table_schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.tables.get(name).map(|t| t.schema())
    }

    /// Execute a single SQL statement and return its results
    pub async fn sql(&self, query: &str) -> Result<QueryResult> {
        let start = Instant::now();
        let mut metrics = QueryMetrics::default();

        // Parse
        let parse_start = Instant::now();
        let stmt = parser::parse_sql(query)?;
        metrics.parse_time = parse_start.elapsed();

        // Plan
        let plan_start = Instant::now();
        let logical = Binder::new(&self.registry).bind(&stmt)?;
        metrics.plan_time = plan_start.elapsed();

        // Optimize
        let optimize_start = Instant::now();
        let optimized = self.optimize(logical)?;
        metrics.optimize_time = optimize_start.elapsed();

        // Physical planning
        let physical_start = Instant::now();
        let physical = self.create_physical_plan(&optimized)?;
        metrics.plan_time += physical_start.elapsed();
        tracing::debug!(plan = %display_plan(physical.as_ref(), 0), "Physical plan");

        // Execute all partitions concurrently, concatenated in partition order
        let execute_start = Instant::now();
        let batches = collect_partitions(&physical).await?;
        metrics.execute_time = execute_start.elapsed();

        let schema = Arc::new(result_schema(&physical.schema())?);
        let batches = batches
            .iter()
            .filter(|b| b.num_rows() > 0)
            .map(|b| ColumnarBatch::try_new(schema.clone(), b.columns().to_vec()))
            .collect::<Result<Vec<_>>>()?;
        let row_count = batches.iter().map(|b| b.num_rows()).sum();

        metrics.total_time = start.elapsed();
        tracing::info!(
            rows = row_count,
            elapsed_ms = metrics.total_time.as_millis() as u64,
            "Query finished"
        );

        Ok(QueryResult {
            schema,
            batches,
            row_count,
            metrics,
        })
    }

    /// Get the logical plan for a query (for debugging)
    pub fn logical_plan(&self, query: &str) -> Result<LogicalPlan> {
        let stmt = parser::parse_sql(query)?;
        Binder::new(&self.registry).bind(&stmt)
    }

    /// Get the optimized logical plan for a query (for debugging)
    pub fn optimized_plan(&self, query: &str) -> Result<LogicalPlan> {
        let logical = self.logical_plan(query)?;
        self.optimize(logical)
    }

    /// Get the physical plan for a query (for debugging)
    pub fn physical_plan(&self, query: &str) -> Result<Arc<dyn PhysicalOperator>> {
        let optimized = self.optimized_plan(query)?;
        self.create_physical_plan(&optimized)
    }

    /// Logical, optimized and physical plans as text
    pub fn explain(&self, query: &str) -> Result<String> {
        let logical = self.logical_plan(query)?;
        let optimized = self.optimize(logical.clone())?;
        let physical = self.create_physical_plan(&optimized)?;
        Ok(format!(
            "== Logical Plan ==\n{}\n== Optimized Plan ==\n{}\n== Physical Plan ==\n{}",
            logical,
            optimized,
            display_plan(physical.as_ref(), 0)
        ))
    }

    fn optimize(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        if self.config.enable_optimizer {
            self.optimizer.optimize(plan)
        } else {
            Ok(plan)
        }
    }

    fn create_physical_plan(&self, plan: &LogicalPlan) -> Result<Arc<dyn PhysicalOperator>> {
        let mut planner = PhysicalPlanner::new(self.config.target_partitions);
        for (name, provider) in &self.tables {
            planner.register_table(name.clone(), provider.clone());
        }
        planner.create_physical_plan(plan)
    }
}

/// Schema of a query result. Output columns are numbered from 1 in order;
/// table field ids are not carried over since a result may repeat a column.
fn result_schema(schema: &SchemaRef) -> Result<Schema> {
    let mut builder = Schema::builder();
    for (i, field) in schema.fields().iter().enumerate() {
        let field_type = PrimitiveType::from_arrow(field.data_type())?;
        builder.add_field(i as u32 + 1, field.name().clone(), field_type, !field.is_nullable())?;
    }
    Ok(builder.build())
}
