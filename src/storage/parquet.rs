//! Parquet data files of catalog tables

use crate::error::{QueryError, Result};
use crate::types::Schema;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::Path;

/// Write `batches` into a new Parquet file at `path`, creating parent
/// directories. Returns the size of the written file in bytes.
pub fn write_data_file(
    path: &Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
    compression: Compression,
) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::options().write(true).create_new(true).open(path)?;

    let props = WriterProperties::builder()
        .set_compression(compression)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;

    let size = fs::metadata(path)?.len();
    tracing::debug!(path = %path.display(), bytes = size, "Wrote data file");
    Ok(size)
}

/// Read a data file written for `schema`, keeping the `projection` columns.
///
/// Batches come back with the table's own Arrow schema so field metadata
/// and nullability match what the scan expects.
pub fn read_data_file(
    path: &Path,
    schema: &Schema,
    projection: Option<&[usize]>,
    batch_size: usize,
) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).map_err(|e| {
        QueryError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open {}: {}", path.display(), e),
        ))
    })?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?.with_batch_size(batch_size);

    if builder.schema().fields().len() != schema.len() {
        return Err(QueryError::SchemaMismatch(format!(
            "data file {} has {} columns, table has {}",
            path.display(),
            builder.schema().fields().len(),
            schema.len()
        )));
    }

    let output_schema = match projection {
        Some(indices) => {
            let mask = ProjectionMask::roots(builder.parquet_schema(), indices.iter().copied());
            builder = builder.with_projection(mask);
            schema.project(indices)?.to_arrow_schema_ref()
        }
        None => schema.to_arrow_schema_ref(),
    };

    builder
        .build()?
        .map(|batch| {
            let batch = batch?;
            RecordBatch::try_new(output_schema.clone(), batch.columns().to_vec())
                .map_err(Into::into)
        })
        .collect()
}
