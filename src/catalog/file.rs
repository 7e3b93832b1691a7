//! File-system catalog
//!
//! Layout: `<root>/<namespace>/<table>/metadata/v<N>.metadata.json`. Every
//! commit writes the next version. A version file is published with a hard
//! link from a temporary file, which fails if the version already exists, so
//! a racing writer sees a conflict and readers never observe partial files.

use super::{
    conflict, validate_creation, validate_ident, validate_namespace, validate_snapshot, Catalog,
    Snapshot, TableCreation, TableIdent, TableMetadata,
};
use crate::error::{CatalogIoKind, QueryError, Result};
use parking_lot::Mutex;
use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

const METADATA_DIR: &str = "metadata";
const METADATA_SUFFIX: &str = ".metadata.json";

/// Catalog persisted as JSON metadata files under a root directory
#[derive(Debug)]
pub struct FileCatalog {
    name: String,
    root: PathBuf,
    /// Serializes writers within this process
    write_lock: Mutex<()>,
}

fn io_error(context: impl std::fmt::Display, e: std::io::Error) -> QueryError {
    QueryError::catalog_io(CatalogIoKind::Io, format!("{}: {}", context, e))
}

impl FileCatalog {
    /// Open (creating if needed) a catalog rooted at `root`
    pub fn open(root: impl Into<PathBuf>, name: impl Into<String>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(root.display(), e))?;
        Ok(Self {
            name: name.into(),
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn metadata_dir(&self, ident: &TableIdent) -> PathBuf {
        self.namespace_dir(&ident.namespace)
            .join(&ident.name)
            .join(METADATA_DIR)
    }

    fn version_path(&self, ident: &TableIdent, version: u64) -> PathBuf {
        self.metadata_dir(ident)
            .join(format!("v{}{}", version, METADATA_SUFFIX))
    }

    /// Highest metadata version of a table, `None` if the table does not exist
    fn latest_version(&self, ident: &TableIdent) -> Result<Option<u64>> {
        let dir = self.metadata_dir(ident);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(dir.display(), e)),
        };

        let mut latest = None;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(dir.display(), e))?;
            let file_name = entry.file_name();
            let Some(version) = file_name
                .to_str()
                .and_then(|n| n.strip_prefix('v'))
                .and_then(|n| n.strip_suffix(METADATA_SUFFIX))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            latest = latest.max(Some(version));
        }
        Ok(latest)
    }

    fn read_version(&self, ident: &TableIdent, version: u64) -> Result<TableMetadata> {
        let path = self.version_path(ident, version);
        let content = fs::read_to_string(&path).map_err(|e| io_error(path.display(), e))?;
        let metadata: TableMetadata = serde_json::from_str(&content).map_err(|e| {
            QueryError::catalog_io(
                CatalogIoKind::Serde,
                format!("{}: {}", path.display(), e),
            )
        })?;
        if metadata.ident() != *ident {
            return Err(QueryError::catalog_io(
                CatalogIoKind::Corrupt,
                format!(
                    "{} describes table {}, expected {}",
                    path.display(),
                    metadata.ident(),
                    ident
                ),
            ));
        }
        Ok(metadata)
    }

    /// Publish `metadata` as `version`. Fails with `Conflict` if that
    /// version already exists; leaves nothing behind on failure.
    fn write_version(&self, metadata: &TableMetadata, version: u64) -> Result<()> {
        let ident = metadata.ident();
        let dir = self.metadata_dir(&ident);
        fs::create_dir_all(&dir).map_err(|e| io_error(dir.display(), e))?;

        let json = serde_json::to_vec_pretty(metadata).map_err(|e| {
            QueryError::catalog_io(CatalogIoKind::Serde, e.to_string())
        })?;

        let tmp = dir.join(format!(".tmp-{}{}", uuid::Uuid::new_v4(), METADATA_SUFFIX));
        let write_tmp = || -> std::io::Result<()> {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()
        };
        if let Err(e) = write_tmp() {
            let _ = fs::remove_file(&tmp);
            return Err(io_error(tmp.display(), e));
        }

        let target = self.version_path(&ident, version);
        let published = fs::hard_link(&tmp, &target);
        let _ = fs::remove_file(&tmp);
        match published {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => Err(QueryError::catalog_io(
                CatalogIoKind::Conflict,
                format!("metadata version {} of {} already exists", version, ident),
            )),
            Err(e) => Err(io_error(target.display(), e)),
        }
    }
}

impl Catalog for FileCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_namespace(&self, namespace: &str) -> Result<()> {
        validate_namespace(namespace)?;
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir).map_err(|e| io_error(dir.display(), e))
    }

    fn list_namespaces(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_error(self.root.display(), e))?;
        let mut namespaces = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(self.root.display(), e))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        namespaces.push(name.to_string());
                    }
                }
            }
        }
        namespaces.sort();
        Ok(namespaces)
    }

    fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        validate_namespace(namespace)?;
        Ok(self.namespace_dir(namespace).is_dir())
    }

    fn list_tables(&self, namespace: &str) -> Result<Vec<TableIdent>> {
        validate_namespace(namespace)?;
        let dir = self.namespace_dir(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_error(dir.display(), e)),
        };

        let mut tables = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(dir.display(), e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let ident = TableIdent::new(namespace, name);
            if self.latest_version(&ident)?.is_some() {
                tables.push(ident);
            }
        }
        tables.sort();
        Ok(tables)
    }

    fn create_table(&self, namespace: &str, creation: TableCreation) -> Result<TableMetadata> {
        validate_namespace(namespace)?;
        validate_creation(&creation)?;

        let _guard = self.write_lock.lock();
        let ident = TableIdent::new(namespace, &creation.name);
        if self.latest_version(&ident)?.is_some() {
            return Err(QueryError::TableAlreadyExists(ident.to_string()));
        }

        self.create_namespace(namespace)?;
        let metadata = creation.into_metadata(namespace);
        self.write_version(&metadata, 1).map_err(|e| {
            if e.is_conflict() {
                QueryError::TableAlreadyExists(ident.to_string())
            } else {
                e
            }
        })?;
        tracing::info!(table = %ident, root = ?self.root, "Created table");
        Ok(metadata)
    }

    fn load_table(&self, ident: &TableIdent) -> Result<TableMetadata> {
        validate_ident(ident)?;
        match self.latest_version(ident)? {
            Some(version) => self.read_version(ident, version),
            None => Err(QueryError::UnknownTable(ident.to_string())),
        }
    }

    fn table_exists(&self, ident: &TableIdent) -> Result<bool> {
        validate_ident(ident)?;
        Ok(self.latest_version(ident)?.is_some())
    }

    fn drop_table(&self, ident: &TableIdent) -> Result<()> {
        let _guard = self.write_lock.lock();
        if !self.table_exists(ident)? {
            return Err(QueryError::UnknownTable(ident.to_string()));
        }
        let dir = self.namespace_dir(&ident.namespace).join(&ident.name);
        fs::remove_dir_all(&dir).map_err(|e| io_error(dir.display(), e))?;
        tracing::info!(table = %ident, "Dropped table");
        Ok(())
    }

    fn commit_snapshot(
        &self,
        ident: &TableIdent,
        base_snapshot_id: Option<i64>,
        snapshot: Snapshot,
    ) -> Result<TableMetadata> {
        validate_ident(ident)?;
        let _guard = self.write_lock.lock();
        let version = self
            .latest_version(ident)?
            .ok_or_else(|| QueryError::UnknownTable(ident.to_string()))?;
        let current = self.read_version(ident, version)?;

        if current.current_snapshot_id != base_snapshot_id {
            return Err(conflict(ident, base_snapshot_id, current.current_snapshot_id));
        }
        validate_snapshot(&current, &snapshot)?;

        let snapshot_id = snapshot.snapshot_id;
        let next = current.with_appended_snapshot(snapshot);
        self.write_version(&next, version + 1)?;
        tracing::info!(table = %ident, snapshot_id, version = version + 1, "Committed snapshot");
        Ok(next)
    }
}
