//! SQL AST to Logical Plan binder

use crate::error::{QueryError, Result};
use crate::parser::{self, ObjectNameExt};
use crate::planner::logical_expr::comparison_type;
use crate::planner::{
    AggregateFunction, AggregateNode, BinaryOp, Column, EmptyRelationNode, Expr, InsertNode,
    JoinType, LogicalPlan, NullOrdering, PlanSchema, ProjectNode, ScanNode, SchemaField,
    SchemaProvider, SortDirection, SortExpr, UnaryOp,
};
use crate::types::{parse_date, parse_timestamp, ScalarValue};
use arrow::datatypes::{DataType as ArrowDataType, TimeUnit};
use ordered_float::OrderedFloat;
use sqlparser::ast::{self, Expr as SqlExpr, SelectItem, SetExpr, Statement, TableFactor};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// SQL Binder - converts SQL AST to LogicalPlan
pub struct Binder<'a> {
    provider: &'a dyn SchemaProvider,
}

impl<'a> Binder<'a> {
    pub fn new(provider: &'a dyn SchemaProvider) -> Self {
        Self { provider }
    }

    /// Bind a SQL statement to a logical plan
    pub fn bind(&self, stmt: &Statement) -> Result<LogicalPlan> {
        match stmt {
            Statement::Query(query) => self.bind_query(query),
            Statement::Insert(insert) => self.bind_insert(insert),
            _ => Err(QueryError::NotImplemented(format!(
                "unsupported statement: {}",
                stmt
            ))),
        }
    }

    /// Bind a SQL string to a logical plan
    pub fn bind_sql(&self, sql: &str) -> Result<LogicalPlan> {
        let stmt = parser::parse_sql(sql)?;
        self.bind(&stmt)
    }

    fn bind_query(&self, query: &ast::Query) -> Result<LogicalPlan> {
        if query.with.is_some() {
            return Err(QueryError::NotImplemented("WITH clauses".to_string()));
        }
        let order_by: &[ast::OrderByExpr] = query
            .order_by
            .as_ref()
            .map(|o| o.exprs.as_slice())
            .unwrap_or(&[]);

        let mut plan = match query.body.as_ref() {
            SetExpr::Select(select) => self.bind_select(select, order_by)?,
            SetExpr::Query(inner) => {
                let plan = self.bind_query(inner)?;
                if order_by.is_empty() {
                    plan
                } else {
                    // Parenthesized query: sort on its output columns
                    let schema = plan.schema();
                    let order = order_by
                        .iter()
                        .map(|o| Ok(sort_expr(self.bind_expr(&o.expr, &schema)?, o)))
                        .collect::<Result<Vec<_>>>()?;
                    plan.sort(order)
                }
            }
            other => {
                return Err(QueryError::NotImplemented(format!(
                    "query body: {}",
                    other
                )))
            }
        };

        // LIMIT/OFFSET apply after ORDER BY
        if query.limit.is_some() || query.offset.is_some() {
            let skip = query
                .offset
                .as_ref()
                .map(|o| expr_to_usize(&o.value))
                .transpose()?
                .unwrap_or(0);
            let fetch = query.limit.as_ref().map(expr_to_usize).transpose()?;
            plan = plan.limit(skip, fetch);
        }

        Ok(plan)
    }

    fn bind_select(
        &self,
        select: &ast::Select,
        order_by: &[ast::OrderByExpr],
    ) -> Result<LogicalPlan> {
        if select.distinct.is_some() {
            return Err(QueryError::NotImplemented("SELECT DISTINCT".to_string()));
        }

        // 1. FROM clause
        let mut plan = self.bind_from(&select.from)?;

        // 2. WHERE clause
        if let Some(selection) = &select.selection {
            let schema = plan.schema();
            let predicate = self.bind_expr(selection, &schema)?;
            if predicate.contains_aggregate() {
                return Err(QueryError::TypeMismatch(
                    "aggregate functions are not allowed in WHERE".to_string(),
                ));
            }
            check_predicate(&predicate, &schema, "WHERE")?;
            plan = plan.filter(predicate);
        }

        let input_schema = plan.schema();

        // 3. SELECT items, bound against the FROM/WHERE output
        let items = self.bind_select_items(&select.projection, &input_schema)?;
        let output_names = output_names(&items);

        // 4. GROUP BY, HAVING and ORDER BY see the same input
        let group_by = match &select.group_by {
            ast::GroupByExpr::Expressions(exprs, modifiers) => {
                if !modifiers.is_empty() {
                    return Err(QueryError::NotImplemented(
                        "GROUP BY modifiers".to_string(),
                    ));
                }
                let mut group_by: Vec<Expr> = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    let bound = self.bind_group_expr(expr, &items, &input_schema)?;
                    if !group_by.contains(&bound) {
                        group_by.push(bound);
                    }
                }
                group_by
            }
            ast::GroupByExpr::All(_) => {
                return Err(QueryError::NotImplemented("GROUP BY ALL".to_string()))
            }
        };

        let having = select
            .having
            .as_ref()
            .map(|h| self.bind_expr(h, &input_schema))
            .transpose()?;

        let mut sort_exprs = order_by
            .iter()
            .map(|o| {
                let expr = self.bind_order_expr(&o.expr, &items, &input_schema)?;
                Ok(sort_expr(expr, o))
            })
            .collect::<Result<Vec<_>>>()?;

        let has_aggregates = !group_by.is_empty()
            || having.is_some()
            || items.iter().any(Expr::contains_aggregate)
            || sort_exprs.iter().any(|s| s.expr.contains_aggregate());

        // 5. Aggregate, then rewrite everything above it onto its outputs
        let exprs = if has_aggregates {
            let mut aggregates = Vec::new();
            for expr in items
                .iter()
                .chain(having.iter())
                .chain(sort_exprs.iter().map(|s| &s.expr))
            {
                collect_aggregates(expr, &mut aggregates);
            }

            let (agg_plan, rewriter) = build_aggregate(plan, group_by, aggregates)?;
            plan = agg_plan;

            if let Some(having) = having {
                let predicate = rewriter.rewrite(&having)?;
                check_predicate(&predicate, &plan.schema(), "HAVING")?;
                plan = plan.filter(predicate);
            }

            sort_exprs = sort_exprs
                .into_iter()
                .map(|s| {
                    Ok(SortExpr {
                        expr: rewriter.rewrite(&s.expr)?,
                        ..s
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            items
                .iter()
                .map(|item| rewriter.rewrite(item))
                .collect::<Result<Vec<_>>>()?
        } else {
            items
        };

        // 6. ORDER BY sits below the projection so it may use any input column
        if !sort_exprs.is_empty() {
            let schema = plan.schema();
            for s in &sort_exprs {
                s.expr.data_type(&schema)?;
            }
            plan = plan.sort(sort_exprs);
        }

        // 7. Projection with unique output names
        let input = plan.schema();
        let fields = exprs
            .iter()
            .zip(output_names)
            .map(|(expr, name)| {
                let field = expr.to_field(&input)?;
                Ok(SchemaField {
                    name,
                    relation: None,
                    field_id: None,
                    ..field
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(LogicalPlan::Project(ProjectNode {
            input: Arc::new(plan),
            exprs,
            schema: PlanSchema::new(fields),
        }))
    }

    fn bind_select_items(&self, projection: &[SelectItem], schema: &PlanSchema) -> Result<Vec<Expr>> {
        let mut items = Vec::with_capacity(projection.len());
        for item in projection {
            match item {
                SelectItem::UnnamedExpr(expr) => items.push(self.bind_expr(expr, schema)?),
                SelectItem::ExprWithAlias { expr, alias } => {
                    items.push(self.bind_expr(expr, schema)?.alias(alias.value.clone()))
                }
                SelectItem::Wildcard(_) => {
                    if schema.is_empty() {
                        return Err(QueryError::UnboundReference(
                            "SELECT * requires a FROM clause".to_string(),
                        ));
                    }
                    items.extend(schema.fields().iter().map(|f| Expr::Column(f.column())));
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let relation = name.table_name();
                    let before = items.len();
                    items.extend(
                        schema
                            .fields()
                            .iter()
                            .filter(|f| f.relation.as_deref() == Some(relation.as_str()))
                            .map(|f| Expr::Column(f.column())),
                    );
                    if items.len() == before {
                        return Err(QueryError::UnboundReference(format!(
                            "relation '{}' not found in FROM",
                            relation
                        )));
                    }
                }
            }
        }
        Ok(items)
    }

    /// GROUP BY item: ordinal, output alias, or expression over the input
    fn bind_group_expr(&self, expr: &SqlExpr, items: &[Expr], schema: &PlanSchema) -> Result<Expr> {
        let bound = match expr {
            SqlExpr::Value(ast::Value::Number(n, _)) => select_item_at(items, n, "GROUP BY")?,
            SqlExpr::Identifier(ident)
                if schema
                    .resolve_column(&Column::new(ident.value.clone()))
                    .is_err() =>
            {
                match find_alias(items, &ident.value) {
                    Some(item) => item,
                    None => self.bind_expr(expr, schema)?,
                }
            }
            _ => self.bind_expr(expr, schema)?,
        };
        if bound.contains_aggregate() {
            return Err(QueryError::TypeMismatch(
                "aggregate functions are not allowed in GROUP BY".to_string(),
            ));
        }
        Ok(bound)
    }

    /// ORDER BY item: ordinal, output alias, or expression over the input
    fn bind_order_expr(&self, expr: &SqlExpr, items: &[Expr], schema: &PlanSchema) -> Result<Expr> {
        match expr {
            SqlExpr::Value(ast::Value::Number(n, _)) => select_item_at(items, n, "ORDER BY"),
            SqlExpr::Identifier(ident) => match find_alias(items, &ident.value) {
                Some(item) => Ok(item),
                None => self.bind_expr(expr, schema),
            },
            _ => self.bind_expr(expr, schema),
        }
    }

    fn bind_from(&self, from: &[ast::TableWithJoins]) -> Result<LogicalPlan> {
        let Some((first, rest)) = from.split_first() else {
            // No FROM clause - return empty relation that produces one row
            return Ok(LogicalPlan::EmptyRelation(EmptyRelationNode {
                produce_one_row: true,
                schema: PlanSchema::empty(),
            }));
        };

        let mut plan = self.bind_table_with_joins(first)?;

        // Comma-separated tables are cross joined
        for table_with_joins in rest {
            let right = self.bind_table_with_joins(table_with_joins)?;
            plan = plan.join(right, JoinType::Cross, vec![], None);
        }

        Ok(plan)
    }

    fn bind_table_with_joins(&self, table: &ast::TableWithJoins) -> Result<LogicalPlan> {
        let mut plan = self.bind_table_factor(&table.relation)?;

        for join in &table.joins {
            let right = self.bind_table_factor(&join.relation)?;
            plan = self.bind_join(plan, right, join)?;
        }

        Ok(plan)
    }

    fn bind_table_factor(&self, factor: &TableFactor) -> Result<LogicalPlan> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    return Err(QueryError::NotImplemented("table functions".to_string()));
                }
                let table_name = name.table_name();
                let schema = self
                    .provider
                    .get_table_schema(&table_name)
                    .ok_or_else(|| QueryError::UnknownTable(table_name.clone()))?;

                let relation = match alias {
                    Some(alias) if !alias.columns.is_empty() => {
                        return Err(QueryError::NotImplemented(
                            "column aliases in FROM".to_string(),
                        ))
                    }
                    Some(alias) => alias.name.value.clone(),
                    None => table_name.clone(),
                };

                Ok(LogicalPlan::Scan(ScanNode {
                    schema: PlanSchema::from_table(&relation, &schema),
                    table_name,
                    relation,
                    projection: None,
                    filter: None,
                }))
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias: None,
            } => self.bind_table_with_joins(table_with_joins),
            TableFactor::Derived { .. } => Err(QueryError::NotImplemented(
                "subqueries in FROM".to_string(),
            )),
            other => Err(QueryError::NotImplemented(format!(
                "table factor: {}",
                other
            ))),
        }
    }

    fn bind_join(&self, left: LogicalPlan, right: LogicalPlan, join: &ast::Join) -> Result<LogicalPlan> {
        let (join_type, constraint) = match &join.join_operator {
            ast::JoinOperator::Inner(constraint) => (JoinType::Inner, Some(constraint)),
            ast::JoinOperator::LeftOuter(constraint) => (JoinType::Left, Some(constraint)),
            ast::JoinOperator::CrossJoin => (JoinType::Cross, None),
            other => {
                return Err(QueryError::NotImplemented(format!(
                    "join operator {:?}",
                    other
                )))
            }
        };

        let left_schema = left.schema();
        let right_schema = right.schema();

        let (on, filter) = match constraint {
            None | Some(ast::JoinConstraint::None) => (vec![], None),
            Some(ast::JoinConstraint::On(expr)) => {
                let combined = left_schema.merge(&right_schema);
                let predicate = self.bind_expr(expr, &combined)?;
                if predicate.contains_aggregate() {
                    return Err(QueryError::TypeMismatch(
                        "aggregate functions are not allowed in JOIN ON".to_string(),
                    ));
                }
                check_predicate(&predicate, &combined, "JOIN ON")?;
                split_join_predicate(&predicate, &left_schema, &right_schema)?
            }
            Some(ast::JoinConstraint::Using(columns)) => {
                let on = columns
                    .iter()
                    .map(|ident| {
                        let col = Column::new(ident.value.clone());
                        let (_, l) = left_schema.resolve_column(&col)?;
                        let (_, r) = right_schema.resolve_column(&col)?;
                        equi_pair(
                            Expr::Column(l.column()),
                            Expr::Column(r.column()),
                            &left_schema,
                            &right_schema,
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                (on, None)
            }
            Some(ast::JoinConstraint::Natural) => {
                return Err(QueryError::NotImplemented("NATURAL JOIN".to_string()))
            }
        };

        Ok(left.join(right, join_type, on, filter))
    }

    fn bind_insert(&self, insert: &ast::Insert) -> Result<LogicalPlan> {
        let table_name = insert.table_name.table_name();
        let table_schema = self
            .provider
            .get_table_schema(&table_name)
            .ok_or_else(|| QueryError::UnknownTable(table_name.clone()))?;

        let columns: Vec<usize> = if insert.columns.is_empty() {
            (0..table_schema.len()).collect()
        } else {
            let mut columns = Vec::with_capacity(insert.columns.len());
            for ident in &insert.columns {
                let index = table_schema.index_of(&ident.value).ok_or_else(|| {
                    QueryError::UnboundReference(format!(
                        "column '{}' not found in table '{}'",
                        ident.value, table_name
                    ))
                })?;
                if columns.contains(&index) {
                    return Err(QueryError::SchemaMismatch(format!(
                        "column '{}' specified more than once",
                        ident.value
                    )));
                }
                columns.push(index);
            }
            columns
        };

        if let Some(field) = table_schema
            .fields()
            .iter()
            .enumerate()
            .find(|(i, f)| f.required && !columns.contains(i))
            .map(|(_, f)| f)
        {
            return Err(QueryError::TypeMismatch(format!(
                "required field '{}' has no value",
                field.name
            )));
        }

        let source = insert
            .source
            .as_ref()
            .ok_or_else(|| QueryError::NotImplemented("INSERT without VALUES".to_string()))?;
        let values = match source.body.as_ref() {
            SetExpr::Values(values) => values,
            _ => return Err(QueryError::NotImplemented("INSERT ... SELECT".to_string())),
        };

        // Values are bound against an empty schema: any column reference fails
        let constants = PlanSchema::empty();
        let mut rows = Vec::with_capacity(values.rows.len());
        for (row_number, row) in values.rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(QueryError::SchemaMismatch(format!(
                    "row {} has {} values, expected {}",
                    row_number + 1,
                    row.len(),
                    columns.len()
                )));
            }
            let mut bound_row = Vec::with_capacity(row.len());
            for (value, &index) in row.iter().zip(&columns) {
                let expr = self.bind_expr(value, &constants).map_err(|e| match e {
                    QueryError::UnboundReference(msg) => QueryError::UnboundReference(format!(
                        "INSERT values must be constant: {}",
                        msg
                    )),
                    other => other,
                })?;
                if expr.contains_aggregate() {
                    return Err(QueryError::TypeMismatch(
                        "aggregate functions are not allowed in VALUES".to_string(),
                    ));
                }
                match &expr {
                    Expr::Literal(v) => {
                        table_schema.fields()[index].coerce_scalar(v)?;
                    }
                    other => {
                        other.data_type(&constants)?;
                    }
                }
                bound_row.push(expr);
            }
            rows.push(bound_row);
        }

        tracing::debug!(table = %table_name, rows = rows.len(), "Bound INSERT");

        Ok(LogicalPlan::Insert(InsertNode {
            table_name,
            table_schema,
            columns,
            rows,
        }))
    }

    fn bind_expr(&self, expr: &SqlExpr, schema: &PlanSchema) -> Result<Expr> {
        match expr {
            SqlExpr::Identifier(ident) => resolve(Column::new(ident.value.clone()), schema),
            SqlExpr::CompoundIdentifier(idents) => match idents.as_slice() {
                [table, column] => resolve(
                    Column::new_qualified(table.value.clone(), column.value.clone()),
                    schema,
                ),
                _ => Err(QueryError::UnboundReference(format!(
                    "unsupported compound identifier: {}",
                    expr
                ))),
            },
            SqlExpr::Value(value) => bind_value(value),
            SqlExpr::BinaryOp { left, op, right } => {
                let left_expr = self.bind_expr(left, schema)?;
                let right_expr = self.bind_expr(right, schema)?;
                Ok(Expr::BinaryExpr {
                    left: Box::new(left_expr),
                    op: convert_binary_op(op)?,
                    right: Box::new(right_expr),
                })
            }
            SqlExpr::UnaryOp { op, expr } => {
                let bound = self.bind_expr(expr, schema)?;
                match op {
                    ast::UnaryOperator::Not => Ok(bound.not()),
                    ast::UnaryOperator::Plus => Ok(bound),
                    ast::UnaryOperator::Minus => Ok(negate(bound)),
                    _ => Err(QueryError::NotImplemented(format!(
                        "unary operator {}",
                        op
                    ))),
                }
            }
            SqlExpr::IsNull(expr) => Ok(Expr::UnaryExpr {
                op: UnaryOp::IsNull,
                expr: Box::new(self.bind_expr(expr, schema)?),
            }),
            SqlExpr::IsNotNull(expr) => Ok(Expr::UnaryExpr {
                op: UnaryOp::IsNotNull,
                expr: Box::new(self.bind_expr(expr, schema)?),
            }),
            SqlExpr::Between {
                expr,
                negated,
                low,
                high,
            } => Ok(Expr::Between {
                expr: Box::new(self.bind_expr(expr, schema)?),
                low: Box::new(self.bind_expr(low, schema)?),
                high: Box::new(self.bind_expr(high, schema)?),
                negated: *negated,
            }),
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let list = list
                    .iter()
                    .map(|e| self.bind_expr(e, schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::InList {
                    expr: Box::new(self.bind_expr(expr, schema)?),
                    list,
                    negated: *negated,
                })
            }
            SqlExpr::Nested(inner) => self.bind_expr(inner, schema),
            SqlExpr::Cast {
                expr, data_type, ..
            } => Ok(Expr::Cast {
                expr: Box::new(self.bind_expr(expr, schema)?),
                data_type: convert_data_type(data_type)?,
            }),
            SqlExpr::TypedString { data_type, value } => bind_typed_string(data_type, value),
            SqlExpr::Function(func) => self.bind_function(func, schema),
            _ => Err(QueryError::NotImplemented(format!(
                "expression not supported: {}",
                expr
            ))),
        }
    }

    /// Aggregate function call. No scalar functions are supported.
    fn bind_function(&self, func: &ast::Function, schema: &PlanSchema) -> Result<Expr> {
        let name = func.name.to_string().to_uppercase();
        let agg = match name.as_str() {
            "COUNT" => AggregateFunction::Count,
            "SUM" => AggregateFunction::Sum,
            "AVG" => AggregateFunction::Avg,
            "MIN" => AggregateFunction::Min,
            "MAX" => AggregateFunction::Max,
            _ => {
                return Err(QueryError::NotImplemented(format!(
                    "function not supported: {}",
                    name
                )))
            }
        };
        if func.over.is_some() || func.filter.is_some() {
            return Err(QueryError::NotImplemented(format!(
                "{} with OVER or FILTER",
                name
            )));
        }

        let arg_list = match &func.args {
            ast::FunctionArguments::List(list) => list,
            _ => {
                return Err(QueryError::TypeMismatch(format!(
                    "{} takes exactly one argument",
                    name
                )))
            }
        };
        if matches!(
            arg_list.duplicate_treatment,
            Some(ast::DuplicateTreatment::Distinct)
        ) {
            return Err(QueryError::NotImplemented(format!("{}(DISTINCT ...)", name)));
        }
        let [arg] = arg_list.args.as_slice() else {
            return Err(QueryError::TypeMismatch(format!(
                "{} takes exactly one argument",
                name
            )));
        };

        let arg = match arg {
            ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard)
                if agg == AggregateFunction::Count =>
            {
                Expr::Wildcard
            }
            ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                let bound = self.bind_expr(e, schema)?;
                if bound.contains_aggregate() {
                    return Err(QueryError::NotImplemented(
                        "nested aggregate functions".to_string(),
                    ));
                }
                bound
            }
            other => {
                return Err(QueryError::NotImplemented(format!(
                    "argument {} to {}",
                    other, name
                )))
            }
        };

        Ok(Expr::Aggregate {
            func: agg,
            args: vec![arg],
        })
    }
}

fn resolve(col: Column, schema: &PlanSchema) -> Result<Expr> {
    let (_, field) = schema.resolve_column(&col)?;
    Ok(Expr::Column(field.column()))
}

fn bind_value(value: &ast::Value) -> Result<Expr> {
    match value {
        ast::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                return Ok(Expr::Literal(ScalarValue::Int64(i)));
            }
            n.parse::<f64>()
                .map(|f| Expr::Literal(ScalarValue::Float64(OrderedFloat(f))))
                .map_err(|_| QueryError::TypeMismatch(format!("cannot parse number: {}", n)))
        }
        ast::Value::SingleQuotedString(s) => Ok(Expr::Literal(ScalarValue::Utf8(s.clone()))),
        ast::Value::Boolean(b) => Ok(Expr::Literal(ScalarValue::Boolean(*b))),
        ast::Value::Null => Ok(Expr::Literal(ScalarValue::Null)),
        _ => Err(QueryError::NotImplemented(format!(
            "literal not supported: {}",
            value
        ))),
    }
}

fn bind_typed_string(data_type: &ast::DataType, value: &str) -> Result<Expr> {
    let invalid = |kind: &str| QueryError::TypeMismatch(format!("invalid {} literal '{}'", kind, value));
    let scalar = match data_type {
        ast::DataType::Date => ScalarValue::Date32(parse_date(value).ok_or_else(|| invalid("DATE"))?),
        ast::DataType::Timestamp(_, _) => {
            ScalarValue::Timestamp(parse_timestamp(value).ok_or_else(|| invalid("TIMESTAMP"))?)
        }
        other => {
            return Err(QueryError::NotImplemented(format!(
                "typed literal of type {}",
                other
            )))
        }
    };
    Ok(Expr::Literal(scalar))
}

/// Unary minus, folded into numeric literals
fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Literal(ScalarValue::Int64(v)) if v != i64::MIN => {
            Expr::Literal(ScalarValue::Int64(-v))
        }
        Expr::Literal(ScalarValue::Float64(v)) => Expr::Literal(ScalarValue::Float64(-v)),
        other => Expr::UnaryExpr {
            op: UnaryOp::Negate,
            expr: Box::new(other),
        },
    }
}

fn convert_binary_op(op: &ast::BinaryOperator) -> Result<BinaryOp> {
    match op {
        ast::BinaryOperator::Plus => Ok(BinaryOp::Add),
        ast::BinaryOperator::Minus => Ok(BinaryOp::Subtract),
        ast::BinaryOperator::Multiply => Ok(BinaryOp::Multiply),
        ast::BinaryOperator::Divide => Ok(BinaryOp::Divide),
        ast::BinaryOperator::Modulo => Ok(BinaryOp::Modulo),
        ast::BinaryOperator::Eq => Ok(BinaryOp::Eq),
        ast::BinaryOperator::NotEq => Ok(BinaryOp::NotEq),
        ast::BinaryOperator::Lt => Ok(BinaryOp::Lt),
        ast::BinaryOperator::LtEq => Ok(BinaryOp::LtEq),
        ast::BinaryOperator::Gt => Ok(BinaryOp::Gt),
        ast::BinaryOperator::GtEq => Ok(BinaryOp::GtEq),
        ast::BinaryOperator::And => Ok(BinaryOp::And),
        ast::BinaryOperator::Or => Ok(BinaryOp::Or),
        _ => Err(QueryError::NotImplemented(format!(
            "binary operator not supported: {}",
            op
        ))),
    }
}

fn convert_data_type(dt: &ast::DataType) -> Result<ArrowDataType> {
    match dt {
        ast::DataType::Boolean | ast::DataType::Bool => Ok(ArrowDataType::Boolean),
        ast::DataType::Int(_) | ast::DataType::Integer(_) => Ok(ArrowDataType::Int32),
        ast::DataType::BigInt(_) => Ok(ArrowDataType::Int64),
        ast::DataType::Real => Ok(ArrowDataType::Float32),
        ast::DataType::Float(_) | ast::DataType::Double | ast::DataType::DoublePrecision => {
            Ok(ArrowDataType::Float64)
        }
        ast::DataType::Char(_) | ast::DataType::Varchar(_) | ast::DataType::Text => {
            Ok(ArrowDataType::Utf8)
        }
        ast::DataType::Date => Ok(ArrowDataType::Date32),
        ast::DataType::Timestamp(_, _) => {
            Ok(ArrowDataType::Timestamp(TimeUnit::Microsecond, None))
        }
        _ => Err(QueryError::NotImplemented(format!(
            "data type not supported: {}",
            dt
        ))),
    }
}

fn expr_to_usize(expr: &SqlExpr) -> Result<usize> {
    match expr {
        SqlExpr::Value(ast::Value::Number(n, _)) => n.parse::<usize>().map_err(|_| {
            QueryError::InvalidArgument(format!("expected a non-negative integer, got {}", n))
        }),
        _ => Err(QueryError::InvalidArgument(format!(
            "expected a non-negative integer literal, got {}",
            expr
        ))),
    }
}

fn sort_expr(expr: Expr, order: &ast::OrderByExpr) -> SortExpr {
    let direction = if order.asc.unwrap_or(true) {
        SortDirection::Asc
    } else {
        SortDirection::Desc
    };
    let nulls = match order.nulls_first {
        Some(true) => NullOrdering::NullsFirst,
        Some(false) => NullOrdering::NullsLast,
        None => NullOrdering::default_for(direction),
    };
    SortExpr {
        expr,
        direction,
        nulls,
    }
}

fn check_predicate(predicate: &Expr, schema: &PlanSchema, clause: &str) -> Result<()> {
    match predicate.data_type(schema)? {
        ArrowDataType::Boolean | ArrowDataType::Null => Ok(()),
        other => Err(QueryError::TypeMismatch(format!(
            "{} condition must be boolean, got {:?}",
            clause, other
        ))),
    }
}

/// 1-based reference into the select list
fn select_item_at(items: &[Expr], position: &str, clause: &str) -> Result<Expr> {
    match position.parse::<usize>() {
        Ok(n) if n >= 1 && n <= items.len() => Ok(items[n - 1].unalias().clone()),
        _ => Err(QueryError::UnboundReference(format!(
            "{} position {} is not in select list (1-{})",
            clause,
            position,
            items.len()
        ))),
    }
}

fn find_alias(items: &[Expr], name: &str) -> Option<Expr> {
    items.iter().find_map(|item| match item {
        Expr::Alias { expr, name: alias } if alias == name => Some(expr.as_ref().clone()),
        _ => None,
    })
}

/// Output column names: duplicate column references are qualified, and any
/// remaining duplicates get a numeric suffix
fn output_names(items: &[Expr]) -> Vec<String> {
    let plain: Vec<String> = items.iter().map(Expr::output_name).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &plain {
        *counts.entry(name.as_str()).or_default() += 1;
    }

    let mut seen = HashSet::new();
    items
        .iter()
        .zip(&plain)
        .map(|(item, name)| {
            let name = match item {
                Expr::Column(col) if counts[name.as_str()] > 1 => col.qualified_name(),
                _ => name.clone(),
            };
            let mut candidate = name.clone();
            let mut suffix = 1;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", name, suffix);
                suffix += 1;
            }
            candidate
        })
        .collect()
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Aggregate { .. } => {
            if !out.contains(expr) {
                out.push(expr.clone());
            }
        }
        Expr::BinaryExpr { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::UnaryExpr { expr, .. } | Expr::Cast { expr, .. } | Expr::Alias { expr, .. } => {
            collect_aggregates(expr, out)
        }
        Expr::InList { expr, list, .. } => {
            collect_aggregates(expr, out);
            list.iter().for_each(|e| collect_aggregates(e, out));
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_aggregates(expr, out);
            collect_aggregates(low, out);
            collect_aggregates(high, out);
        }
        Expr::Column(_) | Expr::Literal(_) | Expr::Wildcard => {}
    }
}

/// Build the Aggregate node. Grouped base columns keep their identity;
/// computed keys and aggregates get unqualified names unique in the output.
fn build_aggregate(
    input: LogicalPlan,
    group_by: Vec<Expr>,
    aggregates: Vec<Expr>,
) -> Result<(LogicalPlan, AggregateRewriter)> {
    let input_schema = input.schema();
    let mut taken: HashSet<String> = group_by
        .iter()
        .filter_map(|e| match e {
            Expr::Column(col) => Some(col.name.clone()),
            _ => None,
        })
        .collect();

    let mut fields = Vec::with_capacity(group_by.len() + aggregates.len());
    for expr in &group_by {
        let field = match expr {
            Expr::Column(col) => input_schema.resolve_column(col)?.1.clone(),
            other => SchemaField {
                name: unique_name(other, &mut taken),
                ..other.to_field(&input_schema)?
            },
        };
        fields.push(field);
    }
    for expr in &aggregates {
        fields.push(SchemaField {
            name: unique_name(expr, &mut taken),
            ..expr.to_field(&input_schema)?
        });
    }

    let columns: Vec<Column> = fields.iter().map(SchemaField::column).collect();
    let (group_columns, aggregate_columns) = columns.split_at(group_by.len());
    let rewriter = AggregateRewriter {
        group_by: group_by.clone(),
        group_columns: group_columns.to_vec(),
        aggregates: aggregates.clone(),
        aggregate_columns: aggregate_columns.to_vec(),
    };

    let plan = LogicalPlan::Aggregate(AggregateNode {
        input: Arc::new(input),
        group_by,
        aggregates,
        schema: PlanSchema::new(fields),
    });
    Ok((plan, rewriter))
}

fn unique_name(expr: &Expr, taken: &mut HashSet<String>) -> String {
    let base = expr.output_name();
    let mut candidate = base.clone();
    if taken.contains(&candidate) {
        candidate = expr.to_string();
    }
    let mut suffix = 1;
    while taken.contains(&candidate) {
        candidate = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

/// Rewrites expressions over the aggregate input into expressions over the
/// aggregate output
struct AggregateRewriter {
    group_by: Vec<Expr>,
    group_columns: Vec<Column>,
    aggregates: Vec<Expr>,
    aggregate_columns: Vec<Column>,
}

impl AggregateRewriter {
    fn rewrite(&self, expr: &Expr) -> Result<Expr> {
        if let Some(i) = self.group_by.iter().position(|g| g == expr) {
            return Ok(Expr::Column(self.group_columns[i].clone()));
        }

        let rewrite_box = |e: &Expr| self.rewrite(e).map(Box::new);
        Ok(match expr {
            Expr::Aggregate { .. } => {
                let i = self
                    .aggregates
                    .iter()
                    .position(|a| a == expr)
                    .ok_or_else(|| {
                        QueryError::Internal(format!("aggregate {} was not collected", expr))
                    })?;
                Expr::Column(self.aggregate_columns[i].clone())
            }
            Expr::Column(col) => {
                return Err(QueryError::UnboundReference(format!(
                    "column '{}' must appear in GROUP BY or be used in an aggregate function",
                    col
                )))
            }
            Expr::Literal(_) | Expr::Wildcard => expr.clone(),
            Expr::BinaryExpr { left, op, right } => Expr::BinaryExpr {
                left: rewrite_box(left)?,
                op: *op,
                right: rewrite_box(right)?,
            },
            Expr::UnaryExpr { op, expr } => Expr::UnaryExpr {
                op: *op,
                expr: rewrite_box(expr)?,
            },
            Expr::Cast { expr, data_type } => Expr::Cast {
                expr: rewrite_box(expr)?,
                data_type: data_type.clone(),
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: rewrite_box(expr)?,
                list: list
                    .iter()
                    .map(|e| self.rewrite(e))
                    .collect::<Result<Vec<_>>>()?,
                negated: *negated,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: rewrite_box(expr)?,
                low: rewrite_box(low)?,
                high: rewrite_box(high)?,
                negated: *negated,
            },
            Expr::Alias { expr, name } => Expr::Alias {
                expr: rewrite_box(expr)?,
                name: name.clone(),
            },
        })
    }
}

/// Split an ON predicate into equi-join key pairs (left, right) and a residual
fn split_join_predicate(
    predicate: &Expr,
    left: &PlanSchema,
    right: &PlanSchema,
) -> Result<(Vec<(Expr, Expr)>, Option<Expr>)> {
    let mut on = Vec::new();
    let mut residual = Vec::new();

    for term in predicate.split_conjunction() {
        if let Expr::BinaryExpr {
            left: l,
            op: BinaryOp::Eq,
            right: r,
        } = term
        {
            if let Some((lk, rk)) = orient_keys(l, r, left, right) {
                on.push(equi_pair(lk, rk, left, right)?);
                continue;
            }
        }
        residual.push(term.clone());
    }

    Ok((on, residual.into_iter().reduce(Expr::and)))
}

/// Orders a column pair so the first resolves on the left input
fn orient_keys(a: &Expr, b: &Expr, left: &PlanSchema, right: &PlanSchema) -> Option<(Expr, Expr)> {
    let (Expr::Column(ca), Expr::Column(cb)) = (a, b) else {
        return None;
    };
    let on_left = |c: &Column| left.resolve_column(c).is_ok();
    let on_right = |c: &Column| right.resolve_column(c).is_ok();

    if on_left(ca) && on_right(cb) {
        Some((a.clone(), b.clone()))
    } else if on_left(cb) && on_right(ca) {
        Some((b.clone(), a.clone()))
    } else {
        None
    }
}

/// Key pair cast to a common type when the sides differ
fn equi_pair(l: Expr, r: Expr, left: &PlanSchema, right: &PlanSchema) -> Result<(Expr, Expr)> {
    let left_type = l.data_type(left)?;
    let right_type = r.data_type(right)?;
    if left_type == right_type {
        return Ok((l, r));
    }
    let common = comparison_type(&left_type, &right_type)?;
    let cast = |e: Expr, t: &ArrowDataType| {
        if *t == common {
            e
        } else {
            Expr::Cast {
                expr: Box::new(e),
                data_type: common.clone(),
            }
        }
    };
    Ok((cast(l, &left_type), cast(r, &right_type)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::planner::SchemaRegistry;
    use crate::types::{PrimitiveType, Schema};

    fn create_test_registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();

        let mut emp = Schema::builder();
        emp.add_field(1, "id", PrimitiveType::Long, true)
            .unwrap()
            .add_field(2, "name", PrimitiveType::String, false)
            .unwrap()
            .add_field(3, "dept", PrimitiveType::String, false)
            .unwrap()
            .add_field(4, "sal", PrimitiveType::Long, false)
            .unwrap()
            .add_field(5, "hired", PrimitiveType::Date, false)
            .unwrap();
        registry.register_table("emp", Arc::new(emp.build()));

        let mut dept = Schema::builder();
        dept.add_field(1, "id", PrimitiveType::Int, true)
            .unwrap()
            .add_field(2, "dept", PrimitiveType::String, false)
            .unwrap()
            .add_field(3, "budget", PrimitiveType::Double, false)
            .unwrap();
        registry.register_table("dept", Arc::new(dept.build()));

        registry
    }

    fn bind(sql: &str) -> Result<LogicalPlan> {
        let registry = create_test_registry();
        Binder::new(&registry).bind_sql(sql)
    }

    fn output_names_of(plan: &LogicalPlan) -> Vec<String> {
        plan.schema().fields().iter().map(|f| f.name.clone()).collect()
    }

    #[test]
    fn test_bind_simple_select() {
        let plan = bind("SELECT id, name FROM emp").unwrap();
        let LogicalPlan::Project(proj) = &plan else {
            panic!("Expected Project");
        };
        assert!(matches!(&*proj.input, LogicalPlan::Scan(_)));
        match &proj.exprs[1] {
            Expr::Column(col) => {
                assert_eq!(col.relation.as_deref(), Some("emp"));
                assert_eq!(col.field_id, Some(2));
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(output_names_of(&plan), vec!["id", "name"]);
    }

    #[test]
    fn test_bind_select_with_where() {
        let plan = bind("SELECT id FROM emp WHERE sal > 100").unwrap();

        // Should be Project -> Filter -> Scan
        if let LogicalPlan::Project(proj) = plan {
            assert!(matches!(&*proj.input, LogicalPlan::Filter(_)));
        } else {
            panic!("Expected Project");
        }
    }

    #[test]
    fn test_where_must_be_boolean() {
        let err = bind("SELECT id FROM emp WHERE sal + 1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        let err = bind("SELECT id FROM emp WHERE COUNT(*) > 1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_bind_group_by() {
        let plan = bind("SELECT dept, COUNT(*), SUM(sal) AS total FROM emp GROUP BY dept").unwrap();

        let LogicalPlan::Project(proj) = &plan else {
            panic!("Expected Project");
        };
        let LogicalPlan::Aggregate(agg) = &*proj.input else {
            panic!("Expected Aggregate");
        };
        assert_eq!(agg.group_by.len(), 1);
        assert_eq!(agg.aggregates.len(), 2);
        assert_eq!(output_names_of(&plan), vec!["dept", "COUNT(*)", "total"]);
    }

    #[test]
    fn test_ungrouped_column_is_unbound() {
        let err = bind("SELECT name, COUNT(*) FROM emp GROUP BY dept").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnboundReference);
    }

    #[test]
    fn test_group_by_ordinal_and_having() {
        let plan = bind("SELECT dept AS d, AVG(sal) FROM emp GROUP BY 1 HAVING COUNT(*) > 1").unwrap();
        let LogicalPlan::Project(proj) = &plan else {
            panic!("Expected Project");
        };
        let LogicalPlan::Filter(having) = &*proj.input else {
            panic!("Expected HAVING filter");
        };
        let LogicalPlan::Aggregate(agg) = &*having.input else {
            panic!("Expected Aggregate");
        };
        // AVG and the HAVING-only COUNT
        assert_eq!(agg.aggregates.len(), 2);
        assert_eq!(output_names_of(&plan), vec!["d", "AVG(sal)"]);
    }

    #[test]
    fn test_order_by_below_projection() {
        let plan = bind("SELECT id FROM emp ORDER BY sal DESC").unwrap();
        let LogicalPlan::Project(proj) = &plan else {
            panic!("Expected Project");
        };
        let LogicalPlan::Sort(sort) = &*proj.input else {
            panic!("Expected Sort");
        };
        assert_eq!(sort.order_by[0].direction, SortDirection::Desc);
        assert_eq!(sort.order_by[0].nulls, NullOrdering::NullsFirst);
    }

    #[test]
    fn test_order_by_alias_and_ordinal() {
        let plan = bind("SELECT dept, SUM(sal) AS total FROM emp GROUP BY dept ORDER BY total, 1").unwrap();
        let LogicalPlan::Project(proj) = &plan else {
            panic!("Expected Project");
        };
        let LogicalPlan::Sort(sort) = &*proj.input else {
            panic!("Expected Sort");
        };
        assert!(matches!(&sort.order_by[0].expr, Expr::Column(c) if c.name == "SUM(sal)"));
        assert!(matches!(&sort.order_by[1].expr, Expr::Column(c) if c.name == "dept"));

        let err = bind("SELECT id FROM emp ORDER BY 3").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnboundReference);
    }

    #[test]
    fn test_bind_limit_offset() {
        let plan = bind("SELECT id FROM emp LIMIT 10 OFFSET 2").unwrap();
        match plan {
            LogicalPlan::Limit(limit) => {
                assert_eq!(limit.skip, 2);
                assert_eq!(limit.fetch, Some(10));
            }
            other => panic!("Expected Limit, got {other}"),
        }
    }

    #[test]
    fn test_bind_join_orients_keys() {
        let plan = bind("SELECT e.name, d.budget FROM emp e JOIN dept d ON d.dept = e.dept").unwrap();
        let LogicalPlan::Project(proj) = &plan else {
            panic!("Expected Project");
        };
        let LogicalPlan::Join(join) = &*proj.input else {
            panic!("Expected Join");
        };
        assert_eq!(join.join_type, JoinType::Inner);
        assert_eq!(join.on.len(), 1);
        assert!(matches!(&join.on[0].0, Expr::Column(c) if c.relation.as_deref() == Some("e")));
        assert!(join.filter.is_none());
    }

    #[test]
    fn test_join_keys_of_different_types_are_cast() {
        let plan = bind("SELECT * FROM emp LEFT JOIN dept ON emp.id = dept.id AND dept.budget > 10").unwrap();
        let LogicalPlan::Project(proj) = &plan else {
            panic!("Expected Project");
        };
        let LogicalPlan::Join(join) = &*proj.input else {
            panic!("Expected Join");
        };
        assert_eq!(join.join_type, JoinType::Left);
        assert!(matches!(&join.on[0].1, Expr::Cast { data_type: ArrowDataType::Int64, .. }));
        assert!(join.filter.is_some());
        // Duplicate column names are qualified
        let names = output_names_of(&plan);
        assert!(names.contains(&"emp.id".to_string()));
        assert!(names.contains(&"dept.id".to_string()));
        assert!(names.contains(&"name".to_string()));
    }

    #[test]
    fn test_ambiguous_column() {
        let err = bind("SELECT id FROM emp, dept").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnboundReference);
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_unknown_names() {
        let err = bind("SELECT * FROM nonexistent").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTable);

        let err = bind("SELECT salary FROM emp").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnboundReference);
    }

    #[test]
    fn test_select_without_from() {
        let plan = bind("SELECT 1 + 2 AS three, DATE '2024-03-15'").unwrap();
        let LogicalPlan::Project(proj) = &plan else {
            panic!("Expected Project");
        };
        assert!(matches!(&*proj.input, LogicalPlan::EmptyRelation(_)));
        assert_eq!(plan.schema().fields()[1].data_type, ArrowDataType::Date32);
    }

    #[test]
    fn test_unsupported_features() {
        let err = bind("SELECT DISTINCT dept FROM emp").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
        let err = bind("SELECT upper(name) FROM emp").unwrap_err();
        assert!(matches!(err, QueryError::NotImplemented(_)));
    }

    #[test]
    fn test_bind_insert() {
        // -3 is not a string
        let err = bind("INSERT INTO emp (id, name) VALUES (1, 'a'), (2, -3)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        let plan = bind("INSERT INTO emp (name, id) VALUES ('a', 1), ('b', 2)").unwrap();
        match plan {
            LogicalPlan::Insert(insert) => {
                assert_eq!(insert.columns, vec![1, 0]);
                assert_eq!(insert.rows.len(), 2);
            }
            other => panic!("Expected Insert, got {other}"),
        }
    }

    #[test]
    fn test_insert_validation() {
        let err = bind("INSERT INTO emp VALUES (1, 'a')").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

        let err = bind("INSERT INTO emp (name) VALUES ('a')").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        let err = bind("INSERT INTO emp (id) VALUES (sal)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnboundReference);

        let err = bind("INSERT INTO nope VALUES (1)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTable);
    }
}
