//! In-memory catalog

use super::{
    conflict, validate_creation, validate_namespace, validate_snapshot, Catalog, Snapshot,
    TableCreation, TableIdent, TableMetadata,
};
use crate::error::{QueryError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Namespaces = BTreeMap<String, BTreeMap<String, TableMetadata>>;

/// Catalog held in process memory. All mutations happen under one write
/// lock, so creates and commits are compare-and-set.
#[derive(Debug)]
pub struct MemoryCatalog {
    name: String,
    namespaces: RwLock<Namespaces>,
}

impl MemoryCatalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespaces: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Catalog for MemoryCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_namespace(&self, namespace: &str) -> Result<()> {
        validate_namespace(namespace)?;
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default();
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.namespaces.read().keys().cloned().collect())
    }

    fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(self.namespaces.read().contains_key(namespace))
    }

    fn list_tables(&self, namespace: &str) -> Result<Vec<TableIdent>> {
        Ok(self
            .namespaces
            .read()
            .get(namespace)
            .map(|tables| {
                tables
                    .keys()
                    .map(|name| TableIdent::new(namespace, name))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn create_table(&self, namespace: &str, creation: TableCreation) -> Result<TableMetadata> {
        validate_namespace(namespace)?;
        validate_creation(&creation)?;

        let mut namespaces = self.namespaces.write();
        let tables = namespaces.entry(namespace.to_string()).or_default();
        if tables.contains_key(&creation.name) {
            return Err(QueryError::TableAlreadyExists(format!(
                "{}.{}",
                namespace, creation.name
            )));
        }

        let metadata = creation.into_metadata(namespace);
        tables.insert(metadata.name.clone(), metadata.clone());
        tracing::info!(table = %metadata.ident(), "Created table");
        Ok(metadata)
    }

    fn load_table(&self, ident: &TableIdent) -> Result<TableMetadata> {
        self.namespaces
            .read()
            .get(&ident.namespace)
            .and_then(|tables| tables.get(&ident.name))
            .cloned()
            .ok_or_else(|| QueryError::UnknownTable(ident.to_string()))
    }

    fn table_exists(&self, ident: &TableIdent) -> Result<bool> {
        Ok(self
            .namespaces
            .read()
            .get(&ident.namespace)
            .is_some_and(|tables| tables.contains_key(&ident.name)))
    }

    fn drop_table(&self, ident: &TableIdent) -> Result<()> {
        self.namespaces
            .write()
            .get_mut(&ident.namespace)
            .and_then(|tables| tables.remove(&ident.name))
            .map(|_| ())
            .ok_or_else(|| QueryError::UnknownTable(ident.to_string()))
    }

    fn commit_snapshot(
        &self,
        ident: &TableIdent,
        base_snapshot_id: Option<i64>,
        snapshot: Snapshot,
    ) -> Result<TableMetadata> {
        let mut namespaces = self.namespaces.write();
        let current = namespaces
            .get_mut(&ident.namespace)
            .and_then(|tables| tables.get_mut(&ident.name))
            .ok_or_else(|| QueryError::UnknownTable(ident.to_string()))?;

        if current.current_snapshot_id != base_snapshot_id {
            return Err(conflict(ident, base_snapshot_id, current.current_snapshot_id));
        }
        validate_snapshot(current, &snapshot)?;

        let snapshot_id = snapshot.snapshot_id;
        let next = current.with_appended_snapshot(snapshot);
        *current = next.clone();
        tracing::info!(table = %ident, snapshot_id, "Committed snapshot");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{PrimitiveType, Schema};
    use std::sync::Arc;

    fn creation(name: &str, location: &str) -> TableCreation {
        let mut builder = Schema::builder();
        builder.add_field(1, "id", PrimitiveType::Long, true).unwrap();
        TableCreation::new(name, location, builder.build())
    }

    #[test]
    fn test_create_and_load() {
        let catalog = MemoryCatalog::new("test");
        let created = catalog.create_table("db", creation("t", "/a")).unwrap();
        assert!(catalog.namespace_exists("db").unwrap());
        assert_eq!(created.current_snapshot_id, None);
        assert!(created.snapshots.is_empty());

        let ident = TableIdent::new("db", "t");
        assert_eq!(catalog.load_table(&ident).unwrap(), created);
        assert_eq!(catalog.list_tables("db").unwrap(), vec![ident]);
    }

    #[test]
    fn test_create_is_unique() {
        let catalog = MemoryCatalog::new("test");
        catalog.create_table("db", creation("t", "/first")).unwrap();
        let err = catalog
            .create_table("db", creation("t", "/second"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TableAlreadyExists);
        let loaded = catalog.load_table(&TableIdent::new("db", "t")).unwrap();
        assert_eq!(loaded.location, "/first");
    }

    #[test]
    fn test_empty_schema_rejected() {
        let catalog = MemoryCatalog::new("test");
        let empty = TableCreation::new("t", "/a", Schema::builder().build());
        assert!(matches!(
            catalog.create_table("db", empty),
            Err(QueryError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_unknown_table() {
        let catalog = MemoryCatalog::new("test");
        let err = catalog.load_table(&TableIdent::new("db", "nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTable);
        assert!(catalog.drop_table(&TableIdent::new("db", "nope")).is_err());
    }

    #[test]
    fn test_commit_compare_and_set() {
        let catalog = MemoryCatalog::new("test");
        let meta = catalog.create_table("db", creation("t", "/a")).unwrap();
        let ident = meta.ident();

        let s1 = meta.new_append_snapshot(vec![]);
        let meta1 = catalog.commit_snapshot(&ident, None, s1.clone()).unwrap();
        assert_eq!(meta1.current_snapshot_id, Some(s1.snapshot_id));

        // stale base
        let stale = meta.new_append_snapshot(vec![]);
        let err = catalog.commit_snapshot(&ident, None, stale).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(catalog.load_table(&ident).unwrap(), meta1);
    }

    #[test]
    fn test_concurrent_creates() {
        let catalog = Arc::new(MemoryCatalog::new("test"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let catalog = catalog.clone();
                std::thread::spawn(move || {
                    catalog
                        .create_table("db", creation("t", &format!("/{}", i)))
                        .is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
