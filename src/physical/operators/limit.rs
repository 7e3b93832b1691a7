//! Limit operator

use crate::error::Result;
use crate::physical::{PhysicalOperator, RecordBatchStream};
use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::sync::Arc;

/// Limit execution operator.
///
/// Reads the input partitions in order as one stream, drops the first
/// `skip` rows and stops once `fetch` rows were produced.
#[derive(Debug)]
pub struct LimitExec {
    input: Arc<dyn PhysicalOperator>,
    skip: usize,
    fetch: Option<usize>,
    schema: SchemaRef,
}

impl LimitExec {
    pub fn new(input: Arc<dyn PhysicalOperator>, skip: usize, fetch: Option<usize>) -> Self {
        let schema = input.schema();
        Self {
            input,
            skip,
            fetch,
            schema,
        }
    }
}

#[async_trait]
impl PhysicalOperator for LimitExec {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn children(&self) -> Vec<Arc<dyn PhysicalOperator>> {
        vec![self.input.clone()]
    }

    async fn execute(&self, partition: usize) -> Result<RecordBatchStream> {
        if partition != 0 || self.fetch == Some(0) {
            return Ok(Box::pin(stream::empty()));
        }

        let input = self.input.clone();
        let batches = stream::iter(0..input.output_partitions().max(1))
            .then(move |p| {
                let input = input.clone();
                async move { input.execute(p).await }
            })
            .try_flatten();

        // State: rows still to skip, rows still to emit
        let limited = batches
            .scan((self.skip, self.fetch), |(to_skip, remaining), item| {
                let out = match item {
                    Err(e) => Some(Err(e)),
                    Ok(_) if *remaining == Some(0) => None,
                    Ok(batch) => {
                        let start = (*to_skip).min(batch.num_rows());
                        *to_skip -= start;
                        let mut len = batch.num_rows() - start;
                        if let Some(rem) = remaining.as_mut() {
                            len = len.min(*rem);
                            *rem -= len;
                        }
                        Some(Ok((len > 0).then(|| batch.slice(start, len))))
                    }
                };
                future::ready(out)
            })
            .try_filter_map(|batch| future::ready(Ok(batch)));

        Ok(Box::pin(limited))
    }

    fn name(&self) -> &str {
        "Limit"
    }
}

impl fmt::Display for LimitExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fetch {
            Some(fetch) => write!(f, "Limit: skip={}, fetch={}", self.skip, fetch),
            None => write!(f, "Limit: skip={}, fetch=None", self.skip),
        }
    }
}
