//! CSV file sources

use crate::error::{QueryError, Result};
use crate::physical::operators::project_batches;
use crate::physical::TableProvider;
use crate::planner::Expr;
use crate::types::{ColumnarBatch, PrimitiveType, Schema};
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options for reading and appending CSV files
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub has_header: bool,
    pub delimiter: u8,
    pub batch_size: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
            batch_size: 8192,
        }
    }
}

impl CsvOptions {
    fn format(&self) -> Format {
        Format::default()
            .with_header(self.has_header)
            .with_delimiter(self.delimiter)
    }
}

/// Table backed by a single CSV file. INSERT appends rows to the file.
#[derive(Debug)]
pub struct CsvTable {
    path: PathBuf,
    schema: Arc<Schema>,
    options: CsvOptions,
    /// Serializes appends from this session
    write_lock: Mutex<()>,
}

impl CsvTable {
    /// Open `path` with a declared schema, or infer one from the file
    pub fn try_new(
        path: impl Into<PathBuf>,
        schema: Option<Schema>,
        options: CsvOptions,
    ) -> Result<Self> {
        let path = path.into();
        let schema = match schema {
            Some(schema) => schema,
            None => infer_schema(&path, &options)?,
        };
        if schema.is_empty() {
            return Err(QueryError::SchemaMismatch(format!(
                "CSV source {} has no columns",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), columns = schema.len(), "Opened CSV source");
        Ok(Self {
            path,
            schema: Arc::new(schema),
            options,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<RecordBatch>> {
        let file = File::open(&self.path).map_err(|e| {
            QueryError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open {}: {}", self.path.display(), e),
            ))
        })?;
        let reader = ReaderBuilder::new(self.schema.to_arrow_schema_ref())
            .with_format(self.options.format())
            .with_batch_size(self.options.batch_size)
            .build(BufReader::new(file))?;
        reader
            .map(|batch| batch.map_err(Into::into))
            .collect::<Result<Vec<_>>>()
    }
}

impl TableProvider for CsvTable {
    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    fn scan(
        &self,
        projection: Option<&[usize]>,
        _filter: Option<&Expr>,
    ) -> Result<Vec<RecordBatch>> {
        project_batches(self.read_all()?, projection)
    }

    fn insert(&self, batch: ColumnarBatch) -> Result<u64> {
        if batch.schema() != &self.schema {
            return Err(QueryError::SchemaMismatch(
                "inserted batch does not match the CSV schema".to_string(),
            ));
        }
        let _guard = self.write_lock.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let empty = file.seek(SeekFrom::End(0))? == 0;

        let mut writer = WriterBuilder::new()
            .with_header(empty && self.options.has_header)
            .with_delimiter(self.options.delimiter)
            .build(&mut file);
        writer.write(batch.record_batch())?;
        drop(writer);
        file.sync_data()?;

        tracing::debug!(path = %self.path.display(), rows = batch.num_rows(), "Appended CSV rows");
        Ok(batch.num_rows() as u64)
    }

    fn source_type(&self) -> &str {
        "csv"
    }
}

/// Infer a schema from the file contents. Inferred columns are optional and
/// numbered from 1; types outside the supported set fall back to String.
fn infer_schema(path: &Path, options: &CsvOptions) -> Result<Schema> {
    if fs::metadata(path)?.len() == 0 {
        return Err(QueryError::SchemaMismatch(format!(
            "cannot infer a schema from empty file {}",
            path.display()
        )));
    }
    let file = File::open(path)?;
    let (inferred, _) = options.format().infer_schema(BufReader::new(file), None)?;

    let fields: Vec<ArrowField> = inferred
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let data_type = match field.data_type() {
                DataType::Timestamp(_, _) => DataType::Timestamp(TimeUnit::Microsecond, None),
                other if PrimitiveType::from_arrow(other).is_ok() => other.clone(),
                _ => DataType::Utf8,
            };
            // Without a header arrow names columns column_1, column_2, ...
            let name = if options.has_header {
                field.name().clone()
            } else {
                format!("column_{}", i + 1)
            };
            ArrowField::new(name, data_type, true)
        })
        .collect();
    Schema::try_from_arrow(&ArrowSchema::new(fields))
}
