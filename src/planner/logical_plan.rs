//! Logical plan types

use crate::error::{QueryError, Result};
use crate::planner::{Expr, PlanSchema, SchemaField, SortExpr};
use crate::types::Schema;
use arrow::datatypes::DataType as ArrowDataType;
use std::fmt;
use std::sync::Arc;

/// Join type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Cross => write!(f, "CROSS"),
        }
    }
}

/// Logical plan node
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// Table scan
    Scan(ScanNode),
    /// Filter (WHERE / HAVING clause)
    Filter(FilterNode),
    /// Projection (SELECT columns)
    Project(ProjectNode),
    /// Join
    Join(JoinNode),
    /// Aggregation (GROUP BY)
    Aggregate(AggregateNode),
    /// Sort (ORDER BY)
    Sort(SortNode),
    /// Limit
    Limit(LimitNode),
    /// INSERT ... VALUES
    Insert(InsertNode),
    /// Empty relation (SELECT without FROM)
    EmptyRelation(EmptyRelationNode),
}

impl LogicalPlan {
    /// Get the output schema of this plan node
    pub fn schema(&self) -> PlanSchema {
        match self {
            LogicalPlan::Scan(node) => node.output_schema(),
            LogicalPlan::Filter(node) => node.input.schema(),
            LogicalPlan::Project(node) => node.schema.clone(),
            LogicalPlan::Join(node) => node.schema.clone(),
            LogicalPlan::Aggregate(node) => node.schema.clone(),
            LogicalPlan::Sort(node) => node.input.schema(),
            LogicalPlan::Limit(node) => node.input.schema(),
            LogicalPlan::Insert(_) => InsertNode::output_schema(),
            LogicalPlan::EmptyRelation(node) => node.schema.clone(),
        }
    }

    /// Get child plans
    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Scan(_) | LogicalPlan::EmptyRelation(_) | LogicalPlan::Insert(_) => {
                vec![]
            }
            LogicalPlan::Filter(node) => vec![&node.input],
            LogicalPlan::Project(node) => vec![&node.input],
            LogicalPlan::Join(node) => vec![&node.left, &node.right],
            LogicalPlan::Aggregate(node) => vec![&node.input],
            LogicalPlan::Sort(node) => vec![&node.input],
            LogicalPlan::Limit(node) => vec![&node.input],
        }
    }

    /// Create a new plan with children replaced
    pub fn with_new_children(&self, children: Vec<Arc<LogicalPlan>>) -> Result<Self> {
        let expected = self.children().len();
        if children.len() != expected {
            return Err(QueryError::Internal(format!(
                "plan node expects {} children, got {}",
                expected,
                children.len()
            )));
        }
        let mut iter = children.into_iter();
        let mut next = || {
            iter.next()
                .ok_or_else(|| QueryError::Internal("missing child plan".to_string()))
        };

        Ok(match self {
            LogicalPlan::Scan(_) | LogicalPlan::EmptyRelation(_) | LogicalPlan::Insert(_) => {
                self.clone()
            }
            LogicalPlan::Filter(node) => LogicalPlan::Filter(FilterNode {
                input: next()?,
                predicate: node.predicate.clone(),
            }),
            LogicalPlan::Project(node) => LogicalPlan::Project(ProjectNode {
                input: next()?,
                exprs: node.exprs.clone(),
                schema: node.schema.clone(),
            }),
            LogicalPlan::Join(node) => {
                // Children may have been narrowed, so the output is re-derived
                let left = next()?;
                let right = next()?;
                let schema = JoinNode::output_schema(&left, &right, node.join_type);
                LogicalPlan::Join(JoinNode {
                    left,
                    right,
                    join_type: node.join_type,
                    on: node.on.clone(),
                    filter: node.filter.clone(),
                    schema,
                })
            }
            LogicalPlan::Aggregate(node) => LogicalPlan::Aggregate(AggregateNode {
                input: next()?,
                group_by: node.group_by.clone(),
                aggregates: node.aggregates.clone(),
                schema: node.schema.clone(),
            }),
            LogicalPlan::Sort(node) => LogicalPlan::Sort(SortNode {
                input: next()?,
                order_by: node.order_by.clone(),
            }),
            LogicalPlan::Limit(node) => LogicalPlan::Limit(LimitNode {
                input: next()?,
                skip: node.skip,
                fetch: node.fetch,
            }),
        })
    }

    /// Builder: add a filter
    pub fn filter(self, predicate: Expr) -> Self {
        LogicalPlan::Filter(FilterNode {
            input: Arc::new(self),
            predicate,
        })
    }

    /// Builder: add a projection
    pub fn project(self, exprs: Vec<Expr>) -> Result<Self> {
        let input = Arc::new(self);
        let input_schema = input.schema();

        let fields: Result<Vec<SchemaField>> = exprs
            .iter()
            .map(|e| e.to_field(&input_schema))
            .collect();

        Ok(LogicalPlan::Project(ProjectNode {
            input,
            exprs,
            schema: PlanSchema::new(fields?),
        }))
    }

    /// Builder: add a limit
    pub fn limit(self, skip: usize, fetch: Option<usize>) -> Self {
        LogicalPlan::Limit(LimitNode {
            input: Arc::new(self),
            skip,
            fetch,
        })
    }

    /// Builder: add a sort
    pub fn sort(self, order_by: Vec<SortExpr>) -> Self {
        LogicalPlan::Sort(SortNode {
            input: Arc::new(self),
            order_by,
        })
    }

    /// Builder: join with `right`. The right side of a left join becomes nullable.
    pub fn join(
        self,
        right: LogicalPlan,
        join_type: JoinType,
        on: Vec<(Expr, Expr)>,
        filter: Option<Expr>,
    ) -> Self {
        let schema = JoinNode::output_schema(&self, &right, join_type);

        LogicalPlan::Join(JoinNode {
            left: Arc::new(self),
            right: Arc::new(right),
            join_type,
            on,
            filter,
            schema,
        })
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

impl LogicalPlan {
    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let prefix = "  ".repeat(indent);

        match self {
            LogicalPlan::Scan(node) => {
                let columns: Vec<String> = node
                    .output_schema()
                    .fields()
                    .iter()
                    .map(|f| f.name.clone())
                    .collect();
                write!(f, "{}Scan: {}", prefix, node.table_name)?;
                if node.relation != node.table_name {
                    write!(f, " AS {}", node.relation)?;
                }
                writeln!(f, " [{}]", columns.join(", "))?;
                if let Some(filter) = &node.filter {
                    writeln!(f, "{}  filter: {}", prefix, filter)?;
                }
            }
            LogicalPlan::Filter(node) => {
                writeln!(f, "{}Filter: {}", prefix, node.predicate)?;
                node.input.fmt_indent(f, indent + 1)?;
            }
            LogicalPlan::Project(node) => {
                let exprs: Vec<String> = node.exprs.iter().map(|e| e.to_string()).collect();
                writeln!(f, "{}Project: [{}]", prefix, exprs.join(", "))?;
                node.input.fmt_indent(f, indent + 1)?;
            }
            LogicalPlan::Join(node) => {
                writeln!(f, "{}{} Join", prefix, node.join_type)?;
                if !node.on.is_empty() {
                    let on_str: Vec<String> = node
                        .on
                        .iter()
                        .map(|(l, r)| format!("{} = {}", l, r))
                        .collect();
                    writeln!(f, "{}  on: {}", prefix, on_str.join(" AND "))?;
                }
                if let Some(filter) = &node.filter {
                    writeln!(f, "{}  filter: {}", prefix, filter)?;
                }
                node.left.fmt_indent(f, indent + 1)?;
                node.right.fmt_indent(f, indent + 1)?;
            }
            LogicalPlan::Aggregate(node) => {
                let group_by: Vec<String> = node.group_by.iter().map(|e| e.to_string()).collect();
                let aggs: Vec<String> = node.aggregates.iter().map(|e| e.to_string()).collect();
                writeln!(
                    f,
                    "{}Aggregate: group_by=[{}], aggs=[{}]",
                    prefix,
                    group_by.join(", "),
                    aggs.join(", ")
                )?;
                node.input.fmt_indent(f, indent + 1)?;
            }
            LogicalPlan::Sort(node) => {
                let order: Vec<String> = node.order_by.iter().map(|s| s.to_string()).collect();
                writeln!(f, "{}Sort: [{}]", prefix, order.join(", "))?;
                node.input.fmt_indent(f, indent + 1)?;
            }
            LogicalPlan::Limit(node) => {
                writeln!(f, "{}Limit: skip={}, fetch={:?}", prefix, node.skip, node.fetch)?;
                node.input.fmt_indent(f, indent + 1)?;
            }
            LogicalPlan::Insert(node) => {
                writeln!(
                    f,
                    "{}Insert: {} rows={}",
                    prefix,
                    node.table_name,
                    node.rows.len()
                )?;
            }
            LogicalPlan::EmptyRelation(node) => {
                writeln!(
                    f,
                    "{}EmptyRelation: produce_one_row={}",
                    prefix, node.produce_one_row
                )?;
            }
        }
        Ok(())
    }
}

/// Table scan node
#[derive(Debug, Clone, PartialEq)]
pub struct ScanNode {
    /// Registered table name
    pub table_name: String,
    /// Qualifier columns are referenced through (alias or table name)
    pub relation: String,
    /// Full table schema, qualified by `relation`
    pub schema: PlanSchema,
    /// Optional projection (column indices into `schema`)
    pub projection: Option<Vec<usize>>,
    /// Optional filter to push down
    pub filter: Option<Expr>,
}

impl ScanNode {
    /// Schema after applying the projection
    pub fn output_schema(&self) -> PlanSchema {
        match &self.projection {
            Some(indices) => self.schema.project(indices),
            None => self.schema.clone(),
        }
    }
}

/// Filter node
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub input: Arc<LogicalPlan>,
    pub predicate: Expr,
}

/// Projection node
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectNode {
    pub input: Arc<LogicalPlan>,
    pub exprs: Vec<Expr>,
    pub schema: PlanSchema,
}

/// Join node
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    pub left: Arc<LogicalPlan>,
    pub right: Arc<LogicalPlan>,
    pub join_type: JoinType,
    /// Equi-join conditions (left_col, right_col)
    pub on: Vec<(Expr, Expr)>,
    /// Additional join conditions
    pub filter: Option<Expr>,
    pub schema: PlanSchema,
}

impl JoinNode {
    /// Left columns followed by right columns
    pub fn output_schema(left: &LogicalPlan, right: &LogicalPlan, join_type: JoinType) -> PlanSchema {
        let right_schema = match join_type {
            JoinType::Left => right.schema().into_nullable(),
            JoinType::Inner | JoinType::Cross => right.schema(),
        };
        left.schema().merge(&right_schema)
    }
}

/// Aggregate node
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateNode {
    pub input: Arc<LogicalPlan>,
    pub group_by: Vec<Expr>,
    pub aggregates: Vec<Expr>,
    pub schema: PlanSchema,
}

/// Sort node
#[derive(Debug, Clone, PartialEq)]
pub struct SortNode {
    pub input: Arc<LogicalPlan>,
    pub order_by: Vec<SortExpr>,
}

/// Limit node
#[derive(Debug, Clone, PartialEq)]
pub struct LimitNode {
    pub input: Arc<LogicalPlan>,
    pub skip: usize,
    pub fetch: Option<usize>,
}

/// Insert node. Each row holds one constant expression per entry of
/// `columns`; the remaining table columns receive NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertNode {
    pub table_name: String,
    pub table_schema: Arc<Schema>,
    /// Target column index for each value position
    pub columns: Vec<usize>,
    pub rows: Vec<Vec<Expr>>,
}

impl InsertNode {
    /// Name of the single output column
    pub const COUNT_COLUMN: &'static str = "count";

    pub fn output_schema() -> PlanSchema {
        PlanSchema::new(vec![
            SchemaField::new(Self::COUNT_COLUMN, ArrowDataType::Int64).with_nullable(false)
        ])
    }
}

/// Empty relation node
#[derive(Debug, Clone, PartialEq)]
pub struct EmptyRelationNode {
    pub produce_one_row: bool,
    pub schema: PlanSchema,
}

/// Builder for creating logical plans
pub struct LogicalPlanBuilder {
    plan: LogicalPlan,
}

impl LogicalPlanBuilder {
    pub fn scan(table_name: impl Into<String>, schema: PlanSchema) -> Self {
        let table_name = table_name.into();
        Self {
            plan: LogicalPlan::Scan(ScanNode {
                relation: table_name.clone(),
                table_name,
                schema,
                projection: None,
                filter: None,
            }),
        }
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.plan = self.plan.filter(predicate);
        self
    }

    pub fn project(mut self, exprs: Vec<Expr>) -> Result<Self> {
        self.plan = self.plan.project(exprs)?;
        Ok(self)
    }

    pub fn aggregate(mut self, group_by: Vec<Expr>, aggregates: Vec<Expr>) -> Result<Self> {
        let input = Arc::new(self.plan);
        let input_schema = input.schema();

        let mut fields = Vec::new();
        for expr in &group_by {
            fields.push(expr.to_field(&input_schema)?);
        }
        for expr in &aggregates {
            fields.push(expr.to_field(&input_schema)?);
        }

        self.plan = LogicalPlan::Aggregate(AggregateNode {
            input,
            group_by,
            aggregates,
            schema: PlanSchema::new(fields),
        });
        Ok(self)
    }

    pub fn sort(mut self, order_by: Vec<SortExpr>) -> Self {
        self.plan = self.plan.sort(order_by);
        self
    }

    pub fn limit(mut self, skip: usize, fetch: Option<usize>) -> Self {
        self.plan = self.plan.limit(skip, fetch);
        self
    }

    pub fn join(
        mut self,
        right: LogicalPlan,
        join_type: JoinType,
        on: Vec<(Expr, Expr)>,
        filter: Option<Expr>,
    ) -> Self {
        self.plan = self.plan.join(right, join_type, on, filter);
        self
    }

    pub fn build(self) -> LogicalPlan {
        self.plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarValue;
    use arrow::datatypes::DataType;

    fn sample_schema() -> PlanSchema {
        PlanSchema::new(vec![
            SchemaField::new("id", DataType::Int64).with_relation("orders"),
            SchemaField::new("name", DataType::Utf8).with_relation("orders"),
            SchemaField::new("amount", DataType::Float64).with_relation("orders"),
        ])
    }

    #[test]
    fn test_scan_builder() {
        let plan = LogicalPlanBuilder::scan("orders", sample_schema()).build();

        assert!(matches!(plan, LogicalPlan::Scan(_)));
        assert_eq!(plan.schema().len(), 3);
    }

    #[test]
    fn test_scan_projection_narrows_schema() {
        let mut plan = LogicalPlanBuilder::scan("orders", sample_schema()).build();
        if let LogicalPlan::Scan(scan) = &mut plan {
            scan.projection = Some(vec![2]);
        }
        let schema = plan.schema();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.fields()[0].name, "amount");
    }

    #[test]
    fn test_filter_builder() {
        let plan = LogicalPlanBuilder::scan("orders", sample_schema())
            .filter(Expr::column("amount").gt(Expr::literal(ScalarValue::Float64(100.0.into()))))
            .build();

        assert!(matches!(plan, LogicalPlan::Filter(_)));
    }

    #[test]
    fn test_left_join_right_side_nullable() {
        let right = PlanSchema::new(vec![SchemaField::new("k", DataType::Int64)
            .with_relation("r")
            .with_nullable(false)]);
        let plan = LogicalPlanBuilder::scan("orders", sample_schema())
            .join(
                LogicalPlanBuilder::scan("r", right).build(),
                JoinType::Left,
                vec![],
                None,
            )
            .build();
        assert!(plan.schema().fields()[3].nullable);
    }

    #[test]
    fn test_plan_display() {
        let plan = LogicalPlanBuilder::scan("orders", sample_schema())
            .filter(Expr::column("amount").gt(Expr::literal(ScalarValue::Float64(100.0.into()))))
            .build();

        let display = format!("{}", plan);
        assert!(display.contains("Filter"));
        assert!(display.contains("Scan: orders [id, name, amount]"));
    }
}
