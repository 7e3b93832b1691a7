//! Handle-style boundary API
//!
//! Run with: cargo test --test api_boundary

use icequery::api;
use icequery::{ErrorKind, ScalarValue, SourceDescriptor};
use std::io::Write;

#[test]
fn test_csv_round_trip_through_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"region,amount\nnorth,10\nsouth,20\nnorth,5\n")
        .unwrap();
    drop(file);

    let mut ctx = api::open_context();
    assert!(api::register_source(
        &mut ctx,
        "sales",
        SourceDescriptor::Csv { path, schema: None },
    ));

    let result = api::execute(
        &ctx,
        "SELECT region, SUM(amount) AS total FROM sales GROUP BY region",
    )
    .unwrap();
    assert_eq!(api::result_row_count(&result), 2);
    assert_eq!(api::result_column_names(&result), vec!["region", "total"]);
    assert_eq!(
        api::result_value(&result, 0, 0, 1),
        Some(ScalarValue::Int64(15))
    );

    let grid = api::pretty(&result).unwrap();
    let header = grid.lines().nth(1).unwrap();
    assert!(header.find("region").unwrap() < header.find("total").unwrap());
    api::close(ctx);
}

#[test]
fn test_catalog_table_through_handles() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = api::open_catalog(dir.path().to_str().unwrap(), "lake").unwrap();

    let mut schema = api::new_schema();
    assert!(api::schema_add_field(&mut schema, 1, "id", "long", true));
    assert!(api::schema_add_field(&mut schema, 2, "name", "string", false));
    let mut spec = api::new_partition_spec();
    assert!(api::partition_spec_add_field(&mut spec, "name", "prefix", "truncate[1]"));

    let location = dir.path().join("users");
    let table = api::create_table(
        &catalog,
        "db",
        "users",
        location.to_str().unwrap(),
        &mut schema,
        Some(&spec),
    )
    .unwrap();
    assert!(api::schema_is_finalized(&schema));

    let mut ctx = api::open_context();
    api::attach_catalog(&mut ctx, &catalog);
    assert!(api::register_table(&mut ctx, "users", &table));
    assert!(api::execute(&ctx, "INSERT INTO users VALUES (1, 'ann'), (2, 'bob'), (3, 'al')").is_some());

    let result = api::execute(&ctx, "SELECT id FROM users WHERE name = 'al'").unwrap();
    assert_eq!(api::result_value(&result, 0, 0, 0), Some(ScalarValue::Int64(3)));

    let reloaded = api::load_table(&catalog, "db", "users").unwrap();
    assert_eq!(api::table_snapshot_count(&reloaded), 1);
    let files = api::table_metadata(&reloaded).data_files();
    assert_eq!(files.len(), 2);
}

#[test]
fn test_errors_are_recorded_per_call() {
    api::clear_last_error();
    let ctx = api::open_context();

    assert!(api::execute(&ctx, "SELEC 1").is_none());
    assert_eq!(api::last_error().unwrap().kind, ErrorKind::ParseError);

    assert!(api::execute(&ctx, "SELECT * FROM nonexistent").is_none());
    let err = api::last_error().unwrap();
    assert_eq!(err.kind, ErrorKind::UnknownTable);
    assert_eq!(err.kind.as_str(), "UnknownTable");

    assert!(api::open_catalog("s3://bucket", "x").is_none());
    assert_eq!(api::last_error().unwrap().kind, ErrorKind::CatalogIOError);

    let catalog = api::open_catalog("memory:", "x").unwrap();
    assert!(api::load_table(&catalog, "db", "missing").is_none());
    assert_eq!(api::last_error().unwrap().kind, ErrorKind::UnknownTable);
}
