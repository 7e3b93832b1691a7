//! SQL Parser module
//!
//! Wraps sqlparser-rs to parse SQL statements into AST

mod ast;

pub use ast::*;

use crate::error::{QueryError, Result};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Parse a SQL string holding exactly one statement
pub fn parse_sql(sql: &str) -> Result<sqlparser::ast::Statement> {
    let dialect = GenericDialect {};
    let mut statements = Parser::parse_sql(&dialect, sql)?;

    match statements.len() {
        1 => Ok(statements.remove(0)),
        0 => Err(QueryError::Parse {
            message: "empty SQL statement".to_string(),
            line: 1,
            column: 1,
        }),
        n => Err(QueryError::Parse {
            message: format!("expected one statement, found {}", n),
            line: 1,
            column: 1,
        }),
    }
}
