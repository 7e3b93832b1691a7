//! Table catalog
//!
//! A catalog maps namespaces to tables and owns each table's metadata.
//! Snapshot commits are the only mutation after creation and are
//! compare-and-set against the caller's base snapshot.

mod file;
mod memory;
mod metadata;

pub use file::FileCatalog;
pub use memory::MemoryCatalog;
pub use metadata::*;

use crate::error::{CatalogIoKind, QueryError, Result};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

/// Namespace-scoped store of table metadata
pub trait Catalog: Debug + Send + Sync {
    /// Catalog name
    fn name(&self) -> &str;

    /// Create a namespace. Creating an existing namespace is a no-op.
    fn create_namespace(&self, namespace: &str) -> Result<()>;

    fn list_namespaces(&self) -> Result<Vec<String>>;

    fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    /// Tables of a namespace, sorted by name
    fn list_tables(&self, namespace: &str) -> Result<Vec<TableIdent>>;

    /// Register a new table with empty history. Fails with
    /// `TableAlreadyExists` rather than overwriting.
    fn create_table(&self, namespace: &str, creation: TableCreation) -> Result<TableMetadata>;

    fn load_table(&self, ident: &TableIdent) -> Result<TableMetadata>;

    fn table_exists(&self, ident: &TableIdent) -> Result<bool>;

    fn drop_table(&self, ident: &TableIdent) -> Result<()>;

    /// Append `snapshot` and make it current, provided the table's current
    /// snapshot is still `base_snapshot_id`. Otherwise fails with a
    /// `Conflict` and leaves the table unchanged.
    fn commit_snapshot(
        &self,
        ident: &TableIdent,
        base_snapshot_id: Option<i64>,
        snapshot: Snapshot,
    ) -> Result<TableMetadata>;
}

/// Open a catalog from a connection URI.
///
/// `memory:` opens an in-memory catalog. `file://<dir>` or a bare path opens
/// a file catalog rooted at `<dir>/<catalog_name>`.
pub fn open_catalog(connection_uri: &str, catalog_name: &str) -> Result<Arc<dyn Catalog>> {
    if catalog_name.is_empty() {
        return Err(QueryError::InvalidArgument(
            "catalog name must not be empty".to_string(),
        ));
    }

    let uri = connection_uri.trim();
    if uri == "memory:" || uri.starts_with("memory://") || uri == "memory" {
        tracing::debug!(catalog = catalog_name, "Opening in-memory catalog");
        return Ok(Arc::new(MemoryCatalog::new(catalog_name)));
    }

    let dir = if let Some(path) = uri.strip_prefix("file://") {
        PathBuf::from(path)
    } else if uri.contains("://") || uri.is_empty() {
        return Err(QueryError::catalog_io(
            CatalogIoKind::Unsupported,
            format!("unsupported catalog URI '{}'", connection_uri),
        ));
    } else {
        PathBuf::from(uri)
    };

    tracing::debug!(catalog = catalog_name, root = ?dir, "Opening file catalog");
    Ok(Arc::new(FileCatalog::open(dir.join(catalog_name), catalog_name)?))
}

/// Checks shared by every backend before a table is created
/// Names become path components in file catalogs, so separators and
/// leading dots (`.`, `..`) are rejected
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.starts_with('.')
}

pub(crate) fn validate_creation(creation: &TableCreation) -> Result<()> {
    validate_table_name(&creation.name)?;
    if creation.schema.is_empty() {
        return Err(QueryError::SchemaMismatch(
            "a table schema needs at least one field".to_string(),
        ));
    }
    creation.partition_spec.validate(&creation.schema)
}

pub(crate) fn validate_namespace(namespace: &str) -> Result<()> {
    if !is_valid_name(namespace) {
        return Err(QueryError::InvalidArgument(format!(
            "invalid namespace '{}'",
            namespace
        )));
    }
    Ok(())
}

fn validate_table_name(name: &str) -> Result<()> {
    if !is_valid_name(name) {
        return Err(QueryError::InvalidArgument(format!("invalid table name '{}'", name)));
    }
    Ok(())
}

pub(crate) fn validate_ident(ident: &TableIdent) -> Result<()> {
    validate_namespace(&ident.namespace)?;
    validate_table_name(&ident.name)
}

/// Checks a snapshot against the table it is committed to
pub(crate) fn validate_snapshot(metadata: &TableMetadata, snapshot: &Snapshot) -> Result<()> {
    if metadata.snapshot_by_id(snapshot.snapshot_id).is_some() {
        return Err(QueryError::catalog_io(
            CatalogIoKind::Conflict,
            format!(
                "snapshot id {} already exists in {}",
                snapshot.snapshot_id,
                metadata.ident()
            ),
        ));
    }
    let width = metadata.partition_spec.fields().len();
    if let Some(file) = snapshot.data_files.iter().find(|f| f.partition.len() != width) {
        return Err(QueryError::SchemaMismatch(format!(
            "data file {} has {} partition values, spec has {}",
            file.file_path,
            file.partition.len(),
            width
        )));
    }
    Ok(())
}

pub(crate) fn conflict(ident: &TableIdent, base: Option<i64>, current: Option<i64>) -> QueryError {
    QueryError::catalog_io(
        CatalogIoKind::Conflict,
        format!(
            "commit to {} based on snapshot {:?} but current is {:?}",
            ident, base, current
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_open_memory() {
        let catalog = open_catalog("memory:", "main").unwrap();
        assert_eq!(catalog.name(), "main");
    }

    #[test]
    fn test_open_file_uri() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", dir.path().display());
        let catalog = open_catalog(&uri, "lake").unwrap();
        assert_eq!(catalog.name(), "lake");
        assert!(dir.path().join("lake").is_dir());
    }

    #[test]
    fn test_unsupported_uri() {
        let err = open_catalog("postgresql://localhost/db", "main").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CatalogIOError);
        assert!(matches!(
            err,
            QueryError::CatalogIo {
                kind: CatalogIoKind::Unsupported,
                ..
            }
        ));
    }
}
