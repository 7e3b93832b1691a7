//! Catalog-backed tables: Parquet data files tracked by snapshots

use super::parquet::{read_data_file, write_data_file};
use crate::catalog::{Catalog, DataFile, TableMetadata};
use crate::error::{QueryError, Result};
use crate::physical::{TableProvider, TableStatistics};
use crate::planner::Expr;
use crate::types::{ColumnarBatch, ScalarValue, Schema};
use arrow::array::UInt32Array;
use arrow::compute;
use arrow::record_batch::RecordBatch;
use hashbrown::HashMap;
use parking_lot::RwLock;
use parquet::basic::Compression;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

/// Subdirectory of the table location holding data files
const DATA_DIR: &str = "data";

/// Read and write settings for catalog tables
#[derive(Debug, Clone)]
pub struct CatalogTableOptions {
    pub batch_size: usize,
    pub compression: Compression,
}

impl Default for CatalogTableOptions {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            compression: Compression::SNAPPY,
        }
    }
}

/// A table whose data lives in Parquet files listed by its current snapshot.
///
/// Scans prune data files with the pushed-down predicate. Inserts write one
/// file per partition and commit a new snapshot through the catalog; without
/// a catalog the table is read-only.
#[derive(Debug)]
pub struct CatalogTable {
    metadata: RwLock<TableMetadata>,
    catalog: Option<Arc<dyn Catalog>>,
    schema: Arc<Schema>,
    options: CatalogTableOptions,
}

impl CatalogTable {
    pub fn new(
        metadata: TableMetadata,
        catalog: Option<Arc<dyn Catalog>>,
        options: CatalogTableOptions,
    ) -> Self {
        let schema = Arc::new(metadata.schema.clone());
        Self {
            metadata: RwLock::new(metadata),
            catalog,
            schema,
            options,
        }
    }

    /// Metadata as of the last load or commit
    pub fn metadata(&self) -> TableMetadata {
        self.metadata.read().clone()
    }

    /// Data files of the current snapshot that may satisfy `filter`
    fn files_to_scan(&self, filter: Option<&Expr>) -> Vec<DataFile> {
        let metadata = self.metadata.read();
        let files = metadata.data_files();
        let selected: Vec<DataFile> = match filter {
            Some(predicate) => files
                .iter()
                .filter(|f| {
                    metadata
                        .partition_spec
                        .might_contain(&f.partition, predicate, &metadata.schema)
                })
                .cloned()
                .collect(),
            None => files.to_vec(),
        };
        if selected.len() < files.len() {
            tracing::debug!(
                table = %metadata.ident(),
                kept = selected.len(),
                total = files.len(),
                "Pruned data files"
            );
        }
        selected
    }

    /// Split `batch` by partition tuple, in first-seen order
    fn split_by_partition(
        &self,
        metadata: &TableMetadata,
        batch: &ColumnarBatch,
    ) -> Result<Vec<(Vec<ScalarValue>, RecordBatch)>> {
        let spec = &metadata.partition_spec;
        if spec.is_unpartitioned() {
            return Ok(vec![(vec![], batch.record_batch().clone())]);
        }

        let tuples = spec.partition_values(batch)?;
        let mut groups: Vec<(Vec<ScalarValue>, Vec<u32>)> = Vec::new();
        let mut index: HashMap<Vec<ScalarValue>, usize> = HashMap::new();
        for (row, tuple) in tuples.into_iter().enumerate() {
            match index.get(&tuple) {
                Some(&g) => groups[g].1.push(row as u32),
                None => {
                    index.insert(tuple.clone(), groups.len());
                    groups.push((tuple, vec![row as u32]));
                }
            }
        }

        let source = batch.record_batch();
        groups
            .into_iter()
            .map(|(tuple, rows)| {
                let indices = UInt32Array::from(rows);
                let columns = source
                    .columns()
                    .iter()
                    .map(|c| compute::take(c.as_ref(), &indices, None))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok((tuple, RecordBatch::try_new(source.schema(), columns)?))
            })
            .collect()
    }

    /// Write one data file per partition of `batch`
    fn write_files(&self, metadata: &TableMetadata, batch: &ColumnarBatch) -> Result<Vec<DataFile>> {
        let spec = &metadata.partition_spec;
        let sequence = metadata.last_sequence_number + 1;
        let arrow_schema = self.schema.to_arrow_schema_ref();

        self.split_by_partition(metadata, batch)?
            .into_iter()
            .enumerate()
            .map(|(i, (partition, rows))| {
                let partition_path = spec.partition_path(&partition)?;
                let mut path = PathBuf::from(&metadata.location).join(DATA_DIR);
                if !partition_path.is_empty() {
                    path.push(&partition_path);
                }
                path.push(format!("{:05}-{}-{}.parquet", i, sequence, uuid::Uuid::new_v4()));

                let size = write_data_file(
                    &path,
                    arrow_schema.clone(),
                    std::slice::from_ref(&rows),
                    self.options.compression,
                )?;
                Ok(DataFile {
                    file_path: path.to_string_lossy().into_owned(),
                    partition,
                    partition_path,
                    record_count: rows.num_rows() as u64,
                    file_size_in_bytes: size,
                })
            })
            .collect()
    }
}

/// Best-effort removal of data files no snapshot references
fn remove_files(paths: &[String]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path, error = %e, "Failed to remove orphaned data file");
        }
    }
}

impl TableProvider for CatalogTable {
    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    fn scan(&self, projection: Option<&[usize]>, filter: Option<&Expr>) -> Result<Vec<RecordBatch>> {
        let files = self.files_to_scan(filter);
        let batch_size = self.options.batch_size;

        // Read files in parallel; collect keeps file order
        let per_file = files
            .par_iter()
            .map(|file| {
                read_data_file(
                    std::path::Path::new(&file.file_path),
                    &self.schema,
                    projection,
                    batch_size,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(per_file.into_iter().flatten().collect())
    }

    fn insert(&self, batch: ColumnarBatch) -> Result<u64> {
        if batch.schema() != &self.schema {
            return Err(QueryError::SchemaMismatch(
                "inserted batch does not match the table schema".to_string(),
            ));
        }
        let catalog = self.catalog.as_ref().ok_or_else(|| {
            QueryError::InvalidArgument(
                "table was registered without a catalog and is read-only".to_string(),
            )
        })?;
        if batch.num_rows() == 0 {
            return Ok(0);
        }

        // Held across write and commit so inserts from this session serialize
        let mut metadata = self.metadata.write();
        let ident = metadata.ident();
        let files = self.write_files(&metadata, &batch)?;
        let written: Vec<String> = files.iter().map(|f| f.file_path.clone()).collect();
        let snapshot = metadata.new_append_snapshot(files);
        let snapshot_id = snapshot.snapshot_id;

        match catalog.commit_snapshot(&ident, metadata.current_snapshot_id, snapshot) {
            Ok(committed) => *metadata = committed,
            Err(e) => {
                remove_files(&written);
                if e.is_conflict() {
                    tracing::warn!(table = %ident, "Snapshot commit lost to a concurrent writer");
                    // The next insert builds on the winning snapshot
                    match catalog.load_table(&ident) {
                        Ok(latest) => *metadata = latest,
                        Err(reload) => {
                            tracing::warn!(table = %ident, error = %reload, "Failed to reload table metadata");
                        }
                    }
                }
                return Err(e);
            }
        }

        tracing::info!(table = %ident, snapshot_id, rows = batch.num_rows(), "Committed snapshot");
        Ok(batch.num_rows() as u64)
    }

    fn statistics(&self) -> Option<TableStatistics> {
        let metadata = self.metadata.read();
        let files = metadata.data_files();
        Some(TableStatistics {
            row_count: files.iter().map(|f| f.record_count as usize).sum(),
            file_count: files.len(),
        })
    }

    fn source_type(&self) -> &str {
        "catalog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, TableCreation};
    use crate::partition::{PartitionSpec, Transform};
    use crate::types::{parse_timestamp, PrimitiveType};
    use arrow::array::{Int64Array, StringArray, TimestampMicrosecondArray};

    fn events_table(dir: &std::path::Path) -> (Arc<dyn Catalog>, CatalogTable) {
        let mut builder = Schema::builder();
        builder
            .add_field(1, "id", PrimitiveType::Long, true)
            .unwrap()
            .add_field(2, "ts", PrimitiveType::Timestamp, true)
            .unwrap()
            .add_field(3, "note", PrimitiveType::String, false)
            .unwrap();
        let schema = builder.build();
        let mut spec = PartitionSpec::builder(&schema);
        spec.add_partition_field("ts", "day", Transform::Day).unwrap();
        let spec = spec.build();

        let catalog: Arc<dyn Catalog> = Arc::new(MemoryCatalog::new("test"));
        let creation = TableCreation::new("events", dir.to_string_lossy(), schema)
            .with_partition_spec(spec);
        let metadata = catalog.create_table("db", creation).unwrap();
        let table = CatalogTable::new(metadata, Some(catalog.clone()), CatalogTableOptions::default());
        (catalog, table)
    }

    fn batch(table: &CatalogTable, ids: Vec<i64>, ts: Vec<&str>) -> ColumnarBatch {
        let micros: Vec<i64> = ts.iter().map(|s| parse_timestamp(s).unwrap()).collect();
        let notes: Vec<Option<&str>> = vec![None; ids.len()];
        ColumnarBatch::try_new(
            table.schema(),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(TimestampMicrosecondArray::from(micros)),
                Arc::new(StringArray::from(notes)),
            ],
        )
        .unwrap()
    }

    fn ids(batches: &[RecordBatch]) -> Vec<i64> {
        batches
            .iter()
            .flat_map(|b| {
                let col = b.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
                col.values().to_vec()
            })
            .collect()
    }

    #[test]
    fn test_insert_writes_one_file_per_partition() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, table) = events_table(dir.path());

        let rows = batch(
            &table,
            vec![1, 2, 3],
            vec!["2024-03-15T10:00:00", "2024-03-16T09:00:00", "2024-03-15T23:59:59"],
        );
        assert_eq!(table.insert(rows).unwrap(), 3);

        let metadata = catalog
            .load_table(&crate::catalog::TableIdent::new("db", "events"))
            .unwrap();
        let files = metadata.data_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].partition_path, "day=2024-03-15");
        assert_eq!(files[0].partition, vec![ScalarValue::Int32(19797)]);
        assert_eq!(files[0].record_count, 2);
        assert!(files[0].file_path.contains("data/day=2024-03-15/"));

        assert_eq!(ids(&table.scan(None, None).unwrap()), vec![1, 3, 2]);
    }

    #[test]
    fn test_scan_prunes_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let (_catalog, table) = events_table(dir.path());
        table
            .insert(batch(&table, vec![1], vec!["2024-03-15T10:00:00"]))
            .unwrap();
        table
            .insert(batch(&table, vec![2], vec!["2024-03-20T10:00:00"]))
            .unwrap();

        let predicate = Expr::qualified_column("events", "ts")
            .gt_eq(Expr::literal(ScalarValue::Utf8("2024-03-18T00:00:00".into())));
        let batches = table.scan(Some(&[0]), Some(&predicate)).unwrap();
        assert_eq!(ids(&batches), vec![2]);
    }

    #[test]
    fn test_each_insert_adds_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (_catalog, table) = events_table(dir.path());
        for i in 0..3 {
            table
                .insert(batch(&table, vec![i], vec!["2024-03-15T10:00:00"]))
                .unwrap();
        }
        let metadata = table.metadata();
        assert_eq!(metadata.history().len(), 3);
        assert_eq!(metadata.current_snapshot_id, Some(3));
        assert_eq!(metadata.snapshots[0].data_files.len(), 1);
        assert_eq!(metadata.snapshots[2].data_files.len(), 3);
        assert_eq!(table.statistics().unwrap().row_count, 3);
    }

    #[test]
    fn test_conflict_refreshes_base_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, first) = events_table(dir.path());
        let ident = crate::catalog::TableIdent::new("db", "events");
        let second = CatalogTable::new(
            catalog.load_table(&ident).unwrap(),
            Some(catalog.clone()),
            CatalogTableOptions::default(),
        );

        first
            .insert(batch(&first, vec![1], vec!["2024-03-15T10:00:00"]))
            .unwrap();
        let err = second
            .insert(batch(&second, vec![2], vec!["2024-03-16T10:00:00"]))
            .unwrap_err();
        assert!(err.is_conflict());
        // The losing write leaves no file behind
        let losing_dir = dir.path().join("data").join("day=2024-03-16");
        assert!(losing_dir.read_dir().unwrap().next().is_none());

        // A retry through the same table commits on top of the winner
        second
            .insert(batch(&second, vec![2], vec!["2024-03-16T10:00:00"]))
            .unwrap();
        let metadata = catalog.load_table(&ident).unwrap();
        assert_eq!(metadata.history().len(), 2);
        assert_eq!(metadata.data_files().len(), 2);
        assert_eq!(ids(&second.scan(None, None).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_read_only_without_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let (_catalog, table) = events_table(dir.path());
        let detached = CatalogTable::new(table.metadata(), None, CatalogTableOptions::default());
        let err = detached
            .insert(batch(&detached, vec![1], vec!["2024-03-15T10:00:00"]))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }
}
