//! Table sources and the scan operator

use crate::error::{QueryError, Result};
use crate::physical::{PhysicalOperator, RecordBatchStream};
use crate::planner::Expr;
use crate::types::{ColumnarBatch, Schema};
use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use futures::stream;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Tables smaller than this are scanned as a single partition
const SINGLE_PARTITION_ROWS: usize = 1000;

/// Table statistics from a data source
#[derive(Debug, Clone)]
pub struct TableStatistics {
    /// Exact row count from metadata
    pub row_count: usize,
    /// Number of files or batches backing the table
    pub file_count: usize,
}

/// A registered table source
pub trait TableProvider: Send + Sync + fmt::Debug {
    /// Schema of the table
    fn schema(&self) -> Arc<Schema>;

    /// Read the table. `projection` selects columns by index; `filter` is
    /// a pushed-down predicate a source may use to skip data. The filter is
    /// advisory: callers re-apply it.
    fn scan(&self, projection: Option<&[usize]>, filter: Option<&Expr>)
        -> Result<Vec<RecordBatch>>;

    /// Append a batch matching `schema()`. Returns the number of rows written.
    fn insert(&self, _batch: ColumnarBatch) -> Result<u64> {
        Err(QueryError::NotImplemented(format!(
            "{} does not support INSERT",
            self.source_type()
        )))
    }

    /// Table-level statistics, if known without reading data
    fn statistics(&self) -> Option<TableStatistics> {
        None
    }

    /// Short name of the source kind
    fn source_type(&self) -> &str;
}

/// Project record batches onto `indices`
pub(crate) fn project_batches(
    batches: Vec<RecordBatch>,
    projection: Option<&[usize]>,
) -> Result<Vec<RecordBatch>> {
    match projection {
        Some(indices) => batches
            .iter()
            .map(|batch| batch.project(indices).map_err(Into::into))
            .collect(),
        None => Ok(batches),
    }
}

/// In-memory table provider
#[derive(Debug)]
pub struct MemoryTable {
    schema: Arc<Schema>,
    batches: RwLock<Vec<ColumnarBatch>>,
}

impl MemoryTable {
    pub fn try_new(schema: Arc<Schema>, batches: Vec<ColumnarBatch>) -> Result<Self> {
        if let Some(batch) = batches.iter().find(|b| b.schema() != &schema) {
            return Err(QueryError::SchemaMismatch(format!(
                "batch {} does not match table {}",
                batch.schema(),
                schema
            )));
        }
        Ok(Self {
            schema,
            batches: RwLock::new(batches),
        })
    }
}

impl TableProvider for MemoryTable {
    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    fn scan(
        &self,
        projection: Option<&[usize]>,
        _filter: Option<&Expr>,
    ) -> Result<Vec<RecordBatch>> {
        let batches = self
            .batches
            .read()
            .iter()
            .map(|b| b.record_batch().clone())
            .collect();
        project_batches(batches, projection)
    }

    fn insert(&self, batch: ColumnarBatch) -> Result<u64> {
        if batch.schema() != &self.schema {
            return Err(QueryError::SchemaMismatch(
                "inserted batch does not match the table schema".to_string(),
            ));
        }
        let rows = batch.num_rows() as u64;
        self.batches.write().push(batch);
        Ok(rows)
    }

    fn statistics(&self) -> Option<TableStatistics> {
        let batches = self.batches.read();
        Some(TableStatistics {
            row_count: batches.iter().map(|b| b.num_rows()).sum(),
            file_count: batches.len(),
        })
    }

    fn source_type(&self) -> &str {
        "memory"
    }
}

/// Scan of a registered table source.
///
/// The source is read once, on first execution, and its batches are split
/// into contiguous runs, one per output partition, so concatenating the
/// partitions in order reproduces the source order.
#[derive(Debug)]
pub struct SourceScanExec {
    table_name: String,
    provider: Arc<dyn TableProvider>,
    /// Output schema with the scan's relation qualifiers
    schema: SchemaRef,
    projection: Option<Vec<usize>>,
    filter: Option<Expr>,
    partitions: usize,
    batches: OnceCell<Vec<RecordBatch>>,
}

impl SourceScanExec {
    pub fn new(
        table_name: impl Into<String>,
        provider: Arc<dyn TableProvider>,
        schema: SchemaRef,
        projection: Option<Vec<usize>>,
        filter: Option<Expr>,
        target_partitions: usize,
    ) -> Self {
        let partitions = match provider.statistics() {
            Some(stats) if stats.row_count >= SINGLE_PARTITION_ROWS => target_partitions.max(1),
            _ => 1,
        };
        Self {
            table_name: table_name.into(),
            provider,
            schema,
            projection,
            filter,
            partitions,
            batches: OnceCell::new(),
        }
    }

    async fn load(&self) -> Result<&Vec<RecordBatch>> {
        self.batches
            .get_or_try_init(|| async {
                let batches = self
                    .provider
                    .scan(self.projection.as_deref(), self.filter.as_ref())
                    .map_err(|e| e.in_operator(self.name(), format!("table {}", self.table_name)))?;
                tracing::debug!(
                    table = %self.table_name,
                    batches = batches.len(),
                    "Scanned source"
                );
                // Re-wrap with the logical schema to carry qualified names
                batches
                    .into_iter()
                    .map(|batch| {
                        RecordBatch::try_new(self.schema.clone(), batch.columns().to_vec())
                            .map_err(|e| {
                                QueryError::execution(
                                    self.name(),
                                    format!("table {}", self.table_name),
                                    e.to_string(),
                                )
                            })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .await
    }
}

#[async_trait]
impl PhysicalOperator for SourceScanExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![]
    }

    async fn execute(&self, partition: usize) -> Result<RecordBatchStream> {
        let batches = self.load().await?;
        let chunk = batches.len().div_ceil(self.partitions).max(1);
        let start = (partition * chunk).min(batches.len());
        let end = ((partition + 1) * chunk).min(batches.len());
        let partition_batches: Vec<RecordBatch> = batches[start..end].to_vec();

        Ok(Box::pin(stream::iter(partition_batches.into_iter().map(Ok))))
    }

    fn output_partitions(&self) -> usize {
        self.partitions
    }

    fn name(&self) -> &str {
        "SourceScan"
    }
}

impl fmt::Display for SourceScanExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SourceScan: {} ({})",
            self.table_name,
            self.provider.source_type()
        )?;
        if let Some(proj) = &self.projection {
            write!(f, " projection={:?}", proj)?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " filter={}", filter)?;
        }
        Ok(())
    }
}

/// Operator producing fixed batches, used for `SELECT` without `FROM`
#[derive(Debug)]
pub struct ValuesExec {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl ValuesExec {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }
}

#[async_trait]
impl PhysicalOperator for ValuesExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![]
    }

    async fn execute(&self, _partition: usize) -> Result<RecordBatchStream> {
        let batches = self.batches.clone();
        Ok(Box::pin(stream::iter(batches.into_iter().map(Ok))))
    }

    fn name(&self) -> &str {
        "Values"
    }
}

impl fmt::Display for ValuesExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: usize = self.batches.iter().map(|b| b.num_rows()).sum();
        write!(f, "Values: rows={}", rows)
    }
}
