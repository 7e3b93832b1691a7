//! Physical planner - converts logical plans to physical plans

use crate::error::{QueryError, Result};
use crate::physical::operators::{
    AggregateExpr, FilterExec, HashAggregateExec, HashJoinExec, InsertExec, LimitExec,
    NestedLoopJoinExec, ProjectExec, SortExec, SourceScanExec, TableProvider, ValuesExec,
};
use crate::physical::PhysicalOperator;
use crate::planner::{JoinType, LogicalPlan};
use arrow::array::new_null_array;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::collections::HashMap;
use std::sync::Arc;

/// Physical planner that converts logical plans to physical execution plans
#[derive(Debug)]
pub struct PhysicalPlanner {
    /// Table sources keyed by registered name
    tables: HashMap<String, Arc<dyn TableProvider>>,
    /// Partition count requested from large scans
    target_partitions: usize,
}

impl Default for PhysicalPlanner {
    fn default() -> Self {
        Self::new(1)
    }
}

impl PhysicalPlanner {
    pub fn new(target_partitions: usize) -> Self {
        Self {
            tables: HashMap::new(),
            target_partitions: target_partitions.max(1),
        }
    }

    /// Register a table source
    pub fn register_table(&mut self, name: impl Into<String>, provider: Arc<dyn TableProvider>) {
        self.tables.insert(name.into(), provider);
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn TableProvider>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }

    /// Convert a logical plan to a physical plan
    pub fn create_physical_plan(&self, logical: &LogicalPlan) -> Result<Arc<dyn PhysicalOperator>> {
        match logical {
            LogicalPlan::Scan(node) => {
                let provider = self.provider(&node.table_name)?;
                let schema = node.output_schema().to_arrow_schema_ref();
                Ok(Arc::new(SourceScanExec::new(
                    &node.table_name,
                    provider,
                    schema,
                    node.projection.clone(),
                    node.filter.clone(),
                    self.target_partitions,
                )))
            }

            LogicalPlan::Filter(node) => {
                let input = self.create_physical_plan(&node.input)?;
                Ok(Arc::new(FilterExec::new(input, node.predicate.clone())))
            }

            LogicalPlan::Project(node) => {
                let input = self.create_physical_plan(&node.input)?;
                let schema = node.schema.to_arrow_schema_ref();
                Ok(Arc::new(ProjectExec::new(input, node.exprs.clone(), schema)))
            }

            LogicalPlan::Join(node) => {
                let left = self.create_physical_plan(&node.left)?;
                let right = self.create_physical_plan(&node.right)?;
                let schema = node.schema.to_arrow_schema_ref();

                if node.on.is_empty() || node.join_type == JoinType::Cross {
                    Ok(Arc::new(NestedLoopJoinExec::new(
                        left,
                        right,
                        node.join_type,
                        node.filter.clone(),
                        schema,
                    )))
                } else {
                    Ok(Arc::new(HashJoinExec::try_new(
                        left,
                        right,
                        node.on.clone(),
                        node.join_type,
                        node.filter.clone(),
                        schema,
                    )?))
                }
            }

            LogicalPlan::Aggregate(node) => {
                let input = self.create_physical_plan(&node.input)?;
                let aggregates = node
                    .aggregates
                    .iter()
                    .map(AggregateExpr::try_from_expr)
                    .collect::<Result<Vec<_>>>()?;
                let schema = node.schema.to_arrow_schema_ref();
                Ok(Arc::new(HashAggregateExec::new(
                    input,
                    node.group_by.clone(),
                    aggregates,
                    schema,
                )))
            }

            LogicalPlan::Sort(node) => {
                let input = self.create_physical_plan(&node.input)?;
                Ok(Arc::new(SortExec::new(input, node.order_by.clone())))
            }

            LogicalPlan::Limit(node) => {
                let input = self.create_physical_plan(&node.input)?;
                Ok(Arc::new(LimitExec::new(input, node.skip, node.fetch)))
            }

            LogicalPlan::Insert(node) => {
                let provider = self.provider(&node.table_name)?;
                Ok(Arc::new(InsertExec::new(
                    &node.table_name,
                    provider,
                    node.table_schema.clone(),
                    node.columns.clone(),
                    node.rows.clone(),
                )))
            }

            LogicalPlan::EmptyRelation(node) => {
                let schema = node.schema.to_arrow_schema_ref();
                let batches = if node.produce_one_row {
                    // One row of NULLs; with no columns this is the single
                    // empty row that `SELECT 1` projects over
                    let columns = schema
                        .fields()
                        .iter()
                        .map(|f| new_null_array(f.data_type(), 1))
                        .collect();
                    vec![RecordBatch::try_new_with_options(
                        schema.clone(),
                        columns,
                        &RecordBatchOptions::new().with_row_count(Some(1)),
                    )?]
                } else {
                    vec![]
                };
                Ok(Arc::new(ValuesExec::new(schema, batches)))
            }
        }
    }
}
