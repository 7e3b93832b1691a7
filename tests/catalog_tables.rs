//! Catalog-backed tables: creation, inserts, snapshots and partition pruning
//!
//! Run with: cargo test --test catalog_tables

use icequery::catalog::{open_catalog, Catalog, TableCreation, TableIdent};
use icequery::partition::{PartitionSpec, Transform};
use icequery::types::SchemaBuilder;
use icequery::{ErrorKind, ExecutionContext, PrimitiveType, QueryResult, ScalarValue, Schema};
use std::path::Path;
use std::sync::Arc;

fn events_schema() -> Schema {
    let mut builder = SchemaBuilder::new();
    builder
        .add_field(1, "id", PrimitiveType::Long, true)
        .unwrap()
        .add_field(2, "ts", PrimitiveType::Timestamp, true)
        .unwrap()
        .add_field(3, "kind", PrimitiveType::String, false)
        .unwrap();
    builder.build()
}

fn create_events(catalog: &Arc<dyn Catalog>, location: &Path) -> TableIdent {
    let schema = events_schema();
    let mut spec = PartitionSpec::builder(&schema);
    spec.add_partition_field("ts", "day", Transform::Day).unwrap();
    let creation = TableCreation::new("events", location.to_string_lossy(), schema)
        .with_partition_spec(spec.build());
    catalog.create_table("analytics", creation).unwrap().ident()
}

fn session(catalog: &Arc<dyn Catalog>, ident: &TableIdent) -> ExecutionContext {
    let mut ctx = ExecutionContext::new().with_catalog(catalog.clone());
    ctx.register_catalog_table("events", ident).unwrap();
    ctx
}

fn ids(result: &QueryResult) -> Vec<i64> {
    result
        .batches()
        .iter()
        .flat_map(|b| (0..b.num_rows()).map(move |r| b.value(r, 0).unwrap()))
        .map(|v| match v {
            ScalarValue::Int64(id) => id,
            other => panic!("unexpected value {:?}", other),
        })
        .collect()
}

#[tokio::test]
async fn test_insert_and_query_file_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("file://{}", dir.path().join("catalogs").display());
    let catalog = open_catalog(&uri, "main").unwrap();
    let location = dir.path().join("warehouse").join("events");
    let ident = create_events(&catalog, &location);

    let ctx = session(&catalog, &ident);
    let result = ctx
        .sql(
            "INSERT INTO events VALUES \
             (1, '2024-03-15 10:00:00', 'click'), \
             (2, '2024-03-15 23:59:59', 'view'), \
             (3, '2024-03-16 08:30:00', NULL)",
        )
        .await
        .unwrap();
    assert_eq!(ids(&result), vec![3]);

    // Two partitions, two data files
    let metadata = catalog.load_table(&ident).unwrap();
    let snapshot = metadata.current_snapshot().unwrap();
    let mut paths: Vec<&str> = snapshot
        .data_files
        .iter()
        .map(|f| f.partition_path.as_str())
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["day=2024-03-15", "day=2024-03-16"]);
    assert!(location.join("data").join("day=2024-03-15").is_dir());

    let result = ctx
        .sql("SELECT id FROM events WHERE ts >= TIMESTAMP '2024-03-16 00:00:00'")
        .await
        .unwrap();
    assert_eq!(ids(&result), vec![3]);

    // A fresh session over the same catalog sees the committed rows
    let reopened = open_catalog(&uri, "main").unwrap();
    let ctx = session(&reopened, &ident);
    let result = ctx.sql("SELECT id FROM events ORDER BY id").await.unwrap();
    assert_eq!(ids(&result), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_snapshots_are_append_only() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog("memory:", "main").unwrap();
    let ident = create_events(&catalog, &dir.path().join("events"));
    let ctx = session(&catalog, &ident);

    for i in 0..3 {
        let sql = format!(
            "INSERT INTO events (id, ts) VALUES ({}, '2024-01-0{} 00:00:00')",
            i,
            i + 1
        );
        ctx.sql(&sql).await.unwrap();
    }

    let metadata = catalog.load_table(&ident).unwrap();
    let history = metadata.history();
    assert_eq!(history.len(), 3);
    assert_eq!(metadata.current_snapshot_id, Some(history[2].snapshot_id));
    for (n, snapshot) in history.iter().enumerate() {
        assert_eq!(snapshot.data_files.len(), n + 1);
        assert_eq!(snapshot.total_records(), n as u64 + 1);
    }
    // Earlier file sets are prefixes of later ones
    assert_eq!(history[1].data_files[0], history[0].data_files[0]);
    assert_eq!(history[2].data_files[..2], history[1].data_files[..]);

    let result = ctx.sql("SELECT COUNT(*) FROM events").await.unwrap();
    assert_eq!(ids(&result), vec![3]);
}

#[tokio::test]
async fn test_empty_table_queries() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog("memory:", "main").unwrap();
    let ident = create_events(&catalog, &dir.path().join("events"));
    let ctx = session(&catalog, &ident);

    let result = ctx.sql("SELECT id, kind FROM events").await.unwrap();
    assert_eq!(result.row_count(), 0);
    let grid = result.pretty().unwrap();
    assert!(grid.contains("id") && grid.contains("kind"));

    let result = ctx.sql("SELECT COUNT(*) FROM events").await.unwrap();
    assert_eq!(ids(&result), vec![0]);
}

#[test]
fn test_create_table_is_unique() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog(dir.path().to_str().unwrap(), "main").unwrap();
    let ident = create_events(&catalog, &dir.path().join("events"));
    let before = catalog.load_table(&ident).unwrap();

    let creation = TableCreation::new("events", "/elsewhere", events_schema());
    let err = catalog.create_table("analytics", creation).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TableAlreadyExists);
    assert_eq!(catalog.load_table(&ident).unwrap(), before);
}

#[test]
fn test_day_transform_on_string_is_rejected() {
    let schema = events_schema();
    let mut spec = PartitionSpec::builder(&schema);
    let err = spec
        .add_partition_field("kind", "kind_day", Transform::Day)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleTransform);
}

#[test]
fn test_stale_commit_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog("memory:", "main").unwrap();
    let ident = create_events(&catalog, &dir.path().join("events"));

    let base = catalog.load_table(&ident).unwrap();
    let first = base.new_append_snapshot(Vec::new());
    catalog.commit_snapshot(&ident, None, first).unwrap();

    let stale = base.new_append_snapshot(Vec::new());
    let err = catalog.commit_snapshot(&ident, None, stale).unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.kind(), ErrorKind::CatalogIOError);
    assert_eq!(catalog.load_table(&ident).unwrap().history().len(), 1);
}

#[tokio::test]
async fn test_insert_without_catalog_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = open_catalog("memory:", "main").unwrap();
    let ident = create_events(&catalog, &dir.path().join("events"));

    let mut ctx = ExecutionContext::new();
    ctx.register_source(
        "events",
        icequery::SourceDescriptor::CatalogTable {
            table: catalog.load_table(&ident).unwrap(),
        },
    )
    .unwrap();
    let err = ctx
        .sql("INSERT INTO events (id, ts) VALUES (1, '2024-01-01 00:00:00')")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_unknown_table_and_uri() {
    let catalog = open_catalog("memory:", "main").unwrap();
    let err = catalog
        .load_table(&TableIdent::new("analytics", "missing"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTable);

    let err = open_catalog("postgres://localhost/db", "main").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CatalogIOError);
}
