//! AST helpers over sqlparser types

pub use sqlparser::ast::{
    Expr as SqlExpr, Ident, ObjectName, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, TableWithJoins,
};

/// Extension trait for ObjectName
pub trait ObjectNameExt {
    /// Dotted name as written, e.g. `ns.table`
    fn table_name(&self) -> String;
}

impl ObjectNameExt for ObjectName {
    fn table_name(&self) -> String {
        self.0
            .iter()
            .map(|i| i.value.clone())
            .collect::<Vec<_>>()
            .join(".")
    }
}
