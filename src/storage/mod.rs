//! Table sources backed by files
//!
//! CSV files registered directly with a session, and catalog tables whose
//! rows live in Parquet data files listed by the current snapshot.

mod csv;
mod parquet;
mod table;

pub use self::csv::{CsvOptions, CsvTable};
pub use self::parquet::{read_data_file, write_data_file};
pub use table::{CatalogTable, CatalogTableOptions};
