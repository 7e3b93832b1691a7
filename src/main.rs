//! icequery command line

use clap::{Args, Parser, Subcommand};
use icequery::catalog::{open_catalog, Catalog, TableCreation, TableIdent};
use icequery::partition::{PartitionSpec, Transform};
use icequery::types::{PrimitiveType, Schema};
use icequery::{ExecutionConfig, ExecutionContext, QueryError, Result, SourceDescriptor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "icequery")]
#[command(about = "SQL over CSV files and Iceberg-style catalog tables")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a SQL statement
    Sql {
        /// SQL statement
        query: String,

        /// Register a CSV file as a table, as NAME=PATH
        #[arg(long = "csv", value_name = "NAME=PATH")]
        csv: Vec<String>,

        /// Catalog connection URI (`memory:` or a directory)
        #[arg(long)]
        catalog: Option<String>,

        /// Catalog name
        #[arg(long, default_value = "default")]
        catalog_name: String,

        /// Register a catalog table, as NAME=NAMESPACE.TABLE
        #[arg(long = "table", value_name = "NAME=NAMESPACE.TABLE")]
        table: Vec<String>,

        /// Print the logical, optimized and physical plans before running
        #[arg(short, long)]
        plan: bool,
    },

    /// Inspect or modify a catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
}

#[derive(Args)]
struct CatalogArgs {
    /// Catalog connection URI (`memory:` or a directory)
    #[arg(long = "catalog")]
    uri: String,

    /// Catalog name
    #[arg(long, default_value = "default")]
    catalog_name: String,
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// List namespaces and their tables
    List {
        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Create a table
    Create {
        #[command(flatten)]
        catalog: CatalogArgs,

        #[arg(long)]
        namespace: String,

        /// Table name
        #[arg(long)]
        name: String,

        /// Directory that receives the table's data files
        #[arg(long)]
        location: PathBuf,

        /// Columns as NAME:TYPE[:required], comma separated
        #[arg(long)]
        schema: String,

        /// Partition fields as NAME:TRANSFORM(SOURCE), comma separated
        #[arg(long)]
        partition: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Sql {
            query,
            csv,
            catalog,
            catalog_name,
            table,
            plan,
        } => run_sql(&query, &csv, catalog.as_deref(), &catalog_name, &table, plan).await,
        Commands::Catalog { command } => run_catalog(command),
    };

    if let Err(e) = outcome {
        eprintln!("Error [{}]: {}", e.kind().as_str(), e);
        std::process::exit(1);
    }
}

async fn run_sql(
    query: &str,
    csv: &[String],
    catalog_uri: Option<&str>,
    catalog_name: &str,
    tables: &[String],
    plan: bool,
) -> Result<()> {
    let mut ctx = ExecutionContext::with_config(ExecutionConfig::from_env());
    if let Some(uri) = catalog_uri {
        ctx = ctx.with_catalog(open_catalog(uri, catalog_name)?);
    }

    for spec in csv {
        let (name, path) = split_assignment(spec, "--csv")?;
        ctx.register_source(
            name,
            SourceDescriptor::Csv {
                path: PathBuf::from(path),
                schema: None,
            },
        )?;
    }
    for spec in tables {
        let (name, ident) = split_assignment(spec, "--table")?;
        let ident = TableIdent::parse(ident).ok_or_else(|| {
            QueryError::InvalidArgument(format!("expected NAMESPACE.TABLE, got '{}'", ident))
        })?;
        ctx.register_catalog_table(name, &ident)?;
    }

    if plan {
        println!("{}", ctx.explain(query)?);
    }

    let start = Instant::now();
    let result = ctx.sql(query).await?;
    println!("{}", result.pretty()?);
    println!(
        "{} row(s) in {:.3}ms",
        result.row_count(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    ctx.close();
    Ok(())
}

fn run_catalog(command: CatalogCommands) -> Result<()> {
    match command {
        CatalogCommands::List { catalog } => {
            list_catalog(open_catalog(&catalog.uri, &catalog.catalog_name)?)
        }
        CatalogCommands::Create {
            catalog,
            namespace,
            name,
            location,
            schema,
            partition,
        } => {
            let schema = parse_schema(&schema)?;
            let spec = match partition {
                Some(partition) => parse_partition_spec(&schema, &partition)?,
                None => PartitionSpec::unpartitioned(),
            };
            let creation = TableCreation::new(name, location.to_string_lossy(), schema)
                .with_partition_spec(spec);
            let catalog = open_catalog(&catalog.uri, &catalog.catalog_name)?;
            let metadata = catalog.create_table(&namespace, creation)?;
            println!("Created table {}", metadata.ident());
            Ok(())
        }
    }
}

fn list_catalog(catalog: Arc<dyn Catalog>) -> Result<()> {
    for namespace in catalog.list_namespaces()? {
        println!("{}", namespace);
        for ident in catalog.list_tables(&namespace)? {
            let metadata = catalog.load_table(&ident)?;
            println!(
                "  {} ({} columns, {} snapshots)",
                ident.name,
                metadata.schema.len(),
                metadata.history().len()
            );
        }
    }
    Ok(())
}

fn split_assignment<'a>(value: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    value
        .split_once('=')
        .filter(|(name, target)| !name.is_empty() && !target.is_empty())
        .ok_or_else(|| {
            QueryError::InvalidArgument(format!("{} expects NAME=VALUE, got '{}'", flag, value))
        })
}

/// `id:long:required,ts:timestamp`. Field ids are assigned in order from 1.
fn parse_schema(text: &str) -> Result<Schema> {
    let mut builder = Schema::builder();
    for (i, column) in text.split(',').map(str::trim).enumerate() {
        let parts: Vec<&str> = column.split(':').collect();
        let (name, type_name, required) = match parts.as_slice() {
            [name, type_name] => (*name, *type_name, false),
            [name, type_name, "required"] => (*name, *type_name, true),
            _ => {
                return Err(QueryError::InvalidArgument(format!(
                    "bad column definition '{}'",
                    column
                )))
            }
        };
        let field_type: PrimitiveType = type_name.parse()?;
        builder.add_field(i as u32 + 1, name, field_type, required)?;
    }
    Ok(builder.build())
}

/// `day:day(ts),bucket:truncate[4](name)`
fn parse_partition_spec(schema: &Schema, text: &str) -> Result<PartitionSpec> {
    let mut builder = PartitionSpec::builder(schema);
    for field in text.split(',').map(str::trim) {
        let parsed = field.split_once(':').and_then(|(name, rest)| {
            let (transform, source) = rest.strip_suffix(')')?.split_once('(')?;
            Some((name, transform, source))
        });
        let (name, transform, source) = parsed.ok_or_else(|| {
            QueryError::InvalidArgument(format!("bad partition field '{}'", field))
        })?;
        let transform: Transform = transform.parse()?;
        builder.add_partition_field(source, name, transform)?;
    }
    Ok(builder.build())
}
