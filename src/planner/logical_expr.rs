//! Logical expression types

use crate::error::{QueryError, Result};
use crate::planner::schema::{Column, PlanSchema, SchemaField};
use crate::types::ScalarValue;
use arrow::datatypes::{DataType as ArrowDataType, TimeUnit};
use std::fmt;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Logical
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Subtract => write!(f, "-"),
            BinaryOp::Multiply => write!(f, "*"),
            BinaryOp::Divide => write!(f, "/"),
            BinaryOp::Modulo => write!(f, "%"),
            BinaryOp::Eq => write!(f, "="),
            BinaryOp::NotEq => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::LtEq => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::GtEq => write!(f, ">="),
            BinaryOp::And => write!(f, "AND"),
            BinaryOp::Or => write!(f, "OR"),
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "NOT"),
            UnaryOp::Negate => write!(f, "-"),
            UnaryOp::IsNull => write!(f, "IS NULL"),
            UnaryOp::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// Aggregate function types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "COUNT"),
            AggregateFunction::Sum => write!(f, "SUM"),
            AggregateFunction::Avg => write!(f, "AVG"),
            AggregateFunction::Min => write!(f, "MIN"),
            AggregateFunction::Max => write!(f, "MAX"),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Null ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullOrdering {
    NullsFirst,
    NullsLast,
}

impl NullOrdering {
    /// NULLS LAST for ascending keys, NULLS FIRST for descending ones
    pub fn default_for(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Asc => NullOrdering::NullsLast,
            SortDirection::Desc => NullOrdering::NullsFirst,
        }
    }
}

/// Sort expression
#[derive(Debug, Clone, PartialEq)]
pub struct SortExpr {
    pub expr: Expr,
    pub direction: SortDirection,
    pub nulls: NullOrdering,
}

impl SortExpr {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Asc,
            nulls: NullOrdering::NullsLast,
        }
    }

    pub fn asc(mut self) -> Self {
        self.direction = SortDirection::Asc;
        self
    }

    pub fn desc(mut self) -> Self {
        self.direction = SortDirection::Desc;
        self.nulls = NullOrdering::NullsFirst;
        self
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls = NullOrdering::NullsFirst;
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullOrdering::NullsLast;
        self
    }
}

impl fmt::Display for SortExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let nulls = match self.nulls {
            NullOrdering::NullsFirst => "NULLS FIRST",
            NullOrdering::NullsLast => "NULLS LAST",
        };
        write!(f, "{} {} {}", self.expr, direction, nulls)
    }
}

/// Logical expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference
    Column(Column),

    /// Literal value
    Literal(ScalarValue),

    /// Binary operation
    BinaryExpr {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// Unary operation
    UnaryExpr { op: UnaryOp, expr: Box<Expr> },

    /// Aggregate function
    Aggregate {
        func: AggregateFunction,
        args: Vec<Expr>,
    },

    /// CAST expression
    Cast {
        expr: Box<Expr>,
        data_type: ArrowDataType,
    },

    /// IN expression
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },

    /// BETWEEN expression
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    /// Alias
    Alias { expr: Box<Expr>, name: String },

    /// Wildcard (*), only as the argument of COUNT(*)
    Wildcard,
}

impl Expr {
    /// Create a column reference
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(Column::new(name))
    }

    /// Create a qualified column reference
    pub fn qualified_column(relation: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column(Column::new_qualified(relation, name))
    }

    /// Create a literal
    pub fn literal(value: ScalarValue) -> Self {
        Expr::Literal(value)
    }

    /// Create an alias
    pub fn alias(self, name: impl Into<String>) -> Self {
        Expr::Alias {
            expr: Box::new(self),
            name: name.into(),
        }
    }

    fn binary(self, op: BinaryOp, other: Expr) -> Self {
        Expr::BinaryExpr {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    /// Binary operation helpers
    pub fn eq(self, other: Expr) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn not_eq(self, other: Expr) -> Self {
        self.binary(BinaryOp::NotEq, other)
    }

    pub fn lt(self, other: Expr) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn lt_eq(self, other: Expr) -> Self {
        self.binary(BinaryOp::LtEq, other)
    }

    pub fn gt(self, other: Expr) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn gt_eq(self, other: Expr) -> Self {
        self.binary(BinaryOp::GtEq, other)
    }

    pub fn and(self, other: Expr) -> Self {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    pub fn add(self, other: Expr) -> Self {
        self.binary(BinaryOp::Add, other)
    }

    pub fn subtract(self, other: Expr) -> Self {
        self.binary(BinaryOp::Subtract, other)
    }

    pub fn multiply(self, other: Expr) -> Self {
        self.binary(BinaryOp::Multiply, other)
    }

    pub fn divide(self, other: Expr) -> Self {
        self.binary(BinaryOp::Divide, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::UnaryExpr {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    /// Strip a top-level alias
    pub fn unalias(&self) -> &Expr {
        match self {
            Expr::Alias { expr, .. } => expr.unalias(),
            other => other,
        }
    }

    /// Get the output name for this expression
    pub fn output_name(&self) -> String {
        match self {
            Expr::Column(col) => col.name.clone(),
            Expr::Alias { name, .. } => name.clone(),
            Expr::Literal(v) => v.to_string(),
            Expr::BinaryExpr { left, op, right } => {
                format!("{} {} {}", left.output_name(), op, right.output_name())
            }
            Expr::UnaryExpr { op, expr } => match op {
                UnaryOp::IsNull | UnaryOp::IsNotNull => format!("{} {}", expr.output_name(), op),
                UnaryOp::Negate => format!("-{}", expr.output_name()),
                UnaryOp::Not => format!("NOT {}", expr.output_name()),
            },
            Expr::Aggregate { func, args } => {
                let arg_names: Vec<_> = args.iter().map(|a| a.output_name()).collect();
                format!("{}({})", func, arg_names.join(", "))
            }
            Expr::Cast { expr, data_type } => {
                format!("CAST({} AS {})", expr.output_name(), sql_type_name(data_type))
            }
            Expr::InList { expr, negated, .. } => {
                let not_str = if *negated { "NOT " } else { "" };
                format!("{} {}IN (...)", expr.output_name(), not_str)
            }
            Expr::Between { expr, .. } => format!("{} BETWEEN ...", expr.output_name()),
            Expr::Wildcard => "*".to_string(),
        }
    }

    /// Infer the data type of this expression given an input schema,
    /// rejecting operand types the engine cannot evaluate
    pub fn data_type(&self, schema: &PlanSchema) -> Result<ArrowDataType> {
        match self {
            Expr::Column(col) => schema
                .resolve_column(col)
                .map(|(_, field)| field.data_type.clone()),
            Expr::Literal(v) => Ok(v.data_type()),
            Expr::BinaryExpr { left, op, right } => {
                let left_type = left.data_type(schema)?;
                let right_type = right.data_type(schema)?;

                match op {
                    BinaryOp::And | BinaryOp::Or => {
                        for t in [&left_type, &right_type] {
                            if !matches!(t, ArrowDataType::Boolean | ArrowDataType::Null) {
                                return Err(QueryError::TypeMismatch(format!(
                                    "{} requires boolean operands, got {:?}",
                                    op, t
                                )));
                            }
                        }
                        Ok(ArrowDataType::Boolean)
                    }
                    op if op.is_comparison() => {
                        comparison_type(&left_type, &right_type)?;
                        Ok(ArrowDataType::Boolean)
                    }
                    _ => coerce_numeric_types(&left_type, &right_type).ok_or_else(|| {
                        QueryError::TypeMismatch(format!(
                            "cannot apply {} to {:?} and {:?}",
                            op, left_type, right_type
                        ))
                    }),
                }
            }
            Expr::UnaryExpr { op, expr } => {
                let input = expr.data_type(schema)?;
                match op {
                    UnaryOp::IsNull | UnaryOp::IsNotNull => Ok(ArrowDataType::Boolean),
                    UnaryOp::Not => match input {
                        ArrowDataType::Boolean | ArrowDataType::Null => Ok(ArrowDataType::Boolean),
                        other => Err(QueryError::TypeMismatch(format!(
                            "NOT requires a boolean operand, got {:?}",
                            other
                        ))),
                    },
                    UnaryOp::Negate if input.is_numeric() || input == ArrowDataType::Null => {
                        Ok(input)
                    }
                    UnaryOp::Negate => Err(QueryError::TypeMismatch(format!(
                        "cannot negate {:?}",
                        input
                    ))),
                }
            }
            Expr::Aggregate { func, args } => {
                let arg_type = match args.first() {
                    Some(Expr::Wildcard) | None => None,
                    Some(arg) => Some(arg.data_type(schema)?),
                };
                match (func, arg_type) {
                    (AggregateFunction::Count, _) => Ok(ArrowDataType::Int64),
                    (AggregateFunction::Sum, Some(t)) => promote_sum_type(&t),
                    (AggregateFunction::Avg, Some(t)) if t.is_numeric() => Ok(ArrowDataType::Float64),
                    (AggregateFunction::Min | AggregateFunction::Max, Some(t)) => Ok(t),
                    (func, arg) => Err(QueryError::TypeMismatch(format!(
                        "{} is not defined for {:?}",
                        func, arg
                    ))),
                }
            }
            Expr::Cast { expr, data_type } => {
                expr.data_type(schema)?;
                Ok(data_type.clone())
            }
            Expr::InList { expr, list, .. } => {
                let value_type = expr.data_type(schema)?;
                for item in list {
                    comparison_type(&value_type, &item.data_type(schema)?)?;
                }
                Ok(ArrowDataType::Boolean)
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                let value_type = expr.data_type(schema)?;
                comparison_type(&value_type, &low.data_type(schema)?)?;
                comparison_type(&value_type, &high.data_type(schema)?)?;
                Ok(ArrowDataType::Boolean)
            }
            Expr::Alias { expr, .. } => expr.data_type(schema),
            Expr::Wildcard => Err(QueryError::Internal(
                "Cannot determine type of wildcard".to_string(),
            )),
        }
    }

    /// Whether the expression can produce NULL
    pub fn nullable(&self, schema: &PlanSchema) -> bool {
        match self {
            Expr::Column(col) => schema
                .resolve_column(col)
                .map(|(_, field)| field.nullable)
                .unwrap_or(true),
            Expr::Literal(v) => v.is_null(),
            Expr::Aggregate {
                func: AggregateFunction::Count,
                ..
            } => false,
            Expr::UnaryExpr {
                op: UnaryOp::IsNull | UnaryOp::IsNotNull,
                ..
            } => false,
            Expr::Alias { expr, .. } => expr.nullable(schema),
            _ => true,
        }
    }

    /// Create schema field for this expression
    pub fn to_field(&self, schema: &PlanSchema) -> Result<SchemaField> {
        let name = self.output_name();
        let data_type = match self.data_type(schema)? {
            // Untyped NULL projects as a string column
            ArrowDataType::Null => ArrowDataType::Utf8,
            other => other,
        };
        Ok(SchemaField::new(name, data_type).with_nullable(self.nullable(schema)))
    }

    /// Check if expression contains an aggregate
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::BinaryExpr { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::UnaryExpr { expr, .. } => expr.contains_aggregate(),
            Expr::Cast { expr, .. } => expr.contains_aggregate(),
            Expr::Alias { expr, .. } => expr.contains_aggregate(),
            Expr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(|e| e.contains_aggregate())
            }
            Expr::Between {
                expr, low, high, ..
            } => expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate(),
            Expr::Column(_) | Expr::Literal(_) | Expr::Wildcard => false,
        }
    }

    /// Collect every column referenced by this expression
    pub fn columns(&self) -> Vec<Column> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<Column>) {
        match self {
            Expr::Column(col) => {
                if !out.contains(col) {
                    out.push(col.clone());
                }
            }
            Expr::BinaryExpr { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryExpr { expr, .. } | Expr::Cast { expr, .. } | Expr::Alias { expr, .. } => {
                expr.collect_columns(out)
            }
            Expr::Aggregate { args, .. } => args.iter().for_each(|a| a.collect_columns(out)),
            Expr::InList { expr, list, .. } => {
                expr.collect_columns(out);
                list.iter().for_each(|e| e.collect_columns(out));
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.collect_columns(out);
                low.collect_columns(out);
                high.collect_columns(out);
            }
            Expr::Literal(_) | Expr::Wildcard => {}
        }
    }

    /// Split a conjunction into its terms
    pub fn split_conjunction(&self) -> Vec<&Expr> {
        match self {
            Expr::BinaryExpr {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let mut terms = left.split_conjunction();
                terms.extend(right.split_conjunction());
                terms
            }
            other => vec![other],
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(col) => write!(f, "{}", col),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::BinaryExpr { left, op, right } => write!(f, "({} {} {})", left, op, right),
            Expr::UnaryExpr { op, expr } => match op {
                UnaryOp::IsNull | UnaryOp::IsNotNull => write!(f, "({} {})", expr, op),
                _ => write!(f, "({} {})", op, expr),
            },
            Expr::Aggregate { func, args } => {
                let args_str: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", func, args_str.join(", "))
            }
            Expr::Cast { expr, data_type } => {
                write!(f, "CAST({} AS {})", expr, sql_type_name(data_type))
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let not_str = if *negated { "NOT " } else { "" };
                let list_str: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(f, "{} {}IN ({})", expr, not_str, list_str.join(", "))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not_str = if *negated { "NOT " } else { "" };
                write!(f, "{} {}BETWEEN {} AND {}", expr, not_str, low, high)
            }
            Expr::Alias { expr, name } => write!(f, "{} AS {}", expr, name),
            Expr::Wildcard => write!(f, "*"),
        }
    }
}

fn sql_type_name(data_type: &ArrowDataType) -> String {
    match data_type {
        ArrowDataType::Boolean => "BOOLEAN".to_string(),
        ArrowDataType::Int32 => "INT".to_string(),
        ArrowDataType::Int64 => "BIGINT".to_string(),
        ArrowDataType::Float32 => "FLOAT".to_string(),
        ArrowDataType::Float64 => "DOUBLE".to_string(),
        ArrowDataType::Date32 => "DATE".to_string(),
        ArrowDataType::Timestamp(_, _) => "TIMESTAMP".to_string(),
        ArrowDataType::Utf8 => "VARCHAR".to_string(),
        other => format!("{:?}", other),
    }
}

/// Coerce numeric types for binary operations
pub(crate) fn coerce_numeric_types(
    left: &ArrowDataType,
    right: &ArrowDataType,
) -> Option<ArrowDataType> {
    use ArrowDataType::*;

    let numeric = |t: &ArrowDataType| t.is_numeric() || *t == Null;
    if !numeric(left) || !numeric(right) {
        return None;
    }
    match (left, right) {
        (Float64 | Float32, _) | (_, Float64 | Float32) => Some(Float64),
        _ => Some(Int64),
    }
}

/// Common type two operands are compared in, if they are comparable
pub(crate) fn comparison_type(
    left: &ArrowDataType,
    right: &ArrowDataType,
) -> Result<ArrowDataType> {
    use ArrowDataType::*;

    let common = match (left, right) {
        (a, b) if a == b => Some(a.clone()),
        (Null, other) | (other, Null) => Some(other.clone()),
        (a, b) if a.is_numeric() && b.is_numeric() => coerce_numeric_types(a, b),
        (Date32, Utf8) | (Utf8, Date32) => Some(Date32),
        (Timestamp(unit, tz), Utf8) | (Utf8, Timestamp(unit, tz)) => {
            Some(Timestamp(*unit, tz.clone()))
        }
        (Date32, Timestamp(_, _)) | (Timestamp(_, _), Date32) => {
            Some(Timestamp(TimeUnit::Microsecond, None))
        }
        _ => None,
    };
    common.ok_or_else(|| {
        QueryError::TypeMismatch(format!("cannot compare {:?} with {:?}", left, right))
    })
}

/// Promote type for SUM aggregation
fn promote_sum_type(input: &ArrowDataType) -> Result<ArrowDataType> {
    use ArrowDataType::*;

    match input {
        Int32 | Int64 => Ok(Int64),
        Float32 | Float64 => Ok(Float64),
        other => Err(QueryError::TypeMismatch(format!(
            "SUM is not defined for {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> PlanSchema {
        PlanSchema::new(vec![
            SchemaField::new("id", ArrowDataType::Int32).with_relation("t"),
            SchemaField::new("name", ArrowDataType::Utf8).with_relation("t"),
            SchemaField::new("born", ArrowDataType::Date32).with_relation("t"),
        ])
    }

    #[test]
    fn test_expr_builders() {
        let col = Expr::column("id");
        let lit = Expr::literal(ScalarValue::Int64(10));
        let expr = col.clone().eq(lit);

        assert!(matches!(expr, Expr::BinaryExpr { op: BinaryOp::Eq, .. }));
    }

    #[test]
    fn test_expr_display() {
        let expr = Expr::column("a").add(Expr::column("b"));
        assert_eq!(format!("{}", expr), "(a + b)");
    }

    #[test]
    fn test_aggregate_detection() {
        let agg = Expr::Aggregate {
            func: AggregateFunction::Sum,
            args: vec![Expr::column("amount")],
        };
        assert!(agg.contains_aggregate());
        assert_eq!(agg.output_name(), "SUM(amount)");

        let col = Expr::column("id");
        assert!(!col.contains_aggregate());
    }

    #[test]
    fn test_type_inference() {
        let schema = schema();
        let sum = Expr::column("id").add(Expr::literal(ScalarValue::Int64(1)));
        assert_eq!(sum.data_type(&schema).unwrap(), ArrowDataType::Int64);

        let date_cmp = Expr::column("born").gt(Expr::literal(ScalarValue::Utf8("2020-01-01".into())));
        assert_eq!(date_cmp.data_type(&schema).unwrap(), ArrowDataType::Boolean);

        let bad = Expr::column("name").gt(Expr::literal(ScalarValue::Int64(3)));
        assert!(matches!(bad.data_type(&schema), Err(QueryError::TypeMismatch(_))));

        let avg = Expr::Aggregate {
            func: AggregateFunction::Avg,
            args: vec![Expr::column("id")],
        };
        assert_eq!(avg.data_type(&schema).unwrap(), ArrowDataType::Float64);
    }

    #[test]
    fn test_split_conjunction() {
        let expr = Expr::column("a")
            .eq(Expr::literal(ScalarValue::Int64(1)))
            .and(Expr::column("b").gt(Expr::literal(ScalarValue::Int64(2))))
            .and(Expr::UnaryExpr {
                op: UnaryOp::IsNotNull,
                expr: Box::new(Expr::column("c")),
            });
        assert_eq!(expr.split_conjunction().len(), 3);
        assert_eq!(expr.columns().len(), 3);
    }

    #[test]
    fn test_default_null_ordering() {
        assert_eq!(SortExpr::new(Expr::column("a")).nulls, NullOrdering::NullsLast);
        assert_eq!(
            SortExpr::new(Expr::column("a")).desc().nulls,
            NullOrdering::NullsFirst
        );
    }
}
