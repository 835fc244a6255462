//! Deferred query frames
//!
//! A [`Frame`] records a chain of operations over a [`TabularSource`] without
//! touching any data. [`Frame::collect`] runs the chain: filters and
//! projections stream batch by batch, while grouping and ranking consume
//! their whole input before emitting a single batch.

use std::iter;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::compute::take_record_batch;
use arrow::datatypes::{Schema, SchemaRef};
use arrow_select::concat::concat_batches;
use tracing::{debug, info};

use crate::aggregator::{max_per_group, GroupSum};
use crate::error::{ClickstreamError, Result, ResultExt, Stage};
use crate::filter::Predicate;
use crate::schema::N;
use crate::source::{BatchIter, TabularSource};
use crate::utils::{desc_indices, Counts};

/// One step of a deferred query
#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    Filter(Predicate),
    Project(Vec<&'static str>),
    /// Group by the key columns and sum `n`
    GroupSum(Vec<&'static str>),
    /// Keep the row with the largest `n` for each value of the column
    MaxPerGroup(&'static str),
    /// Stable sort by `n` descending; missing counts last
    SortDesc,
    /// Stable sort by `n` descending, drop missing counts, keep the first k
    TopK(usize),
}

impl PlanNode {
    fn output_schema(&self, input: &SchemaRef) -> Result<SchemaRef> {
        match self {
            PlanNode::Filter(_) => Ok(input.clone()),
            PlanNode::SortDesc | PlanNode::TopK(_) => {
                require_column(input, N)?;
                Ok(input.clone())
            }
            PlanNode::MaxPerGroup(group) => {
                require_column(input, group)?;
                require_column(input, N)?;
                Ok(input.clone())
            }
            PlanNode::Project(columns) => {
                let indices = column_indices(input, columns)?;
                Ok(Arc::new(input.project(&indices)?))
            }
            PlanNode::GroupSum(keys) => GroupSum::output_schema(keys, input),
        }
    }

    fn execute<'a>(&self, input: BatchIter<'a>, schema: &SchemaRef) -> Result<BatchIter<'a>> {
        match self {
            PlanNode::Filter(predicate) => {
                let predicate = predicate.clone();
                Ok(Box::new(input.map(move |batch| {
                    batch.and_then(|b| predicate.apply(&b).stage(Stage::Filter))
                })))
            }
            PlanNode::Project(columns) => {
                let indices = column_indices(schema, columns)?;
                Ok(Box::new(input.map(move |batch| {
                    batch.and_then(|b| b.project(&indices).stage(Stage::Project))
                })))
            }
            PlanNode::GroupSum(keys) => {
                let mut agg = GroupSum::try_new(keys.clone(), schema).stage(Stage::Group)?;
                for batch in input {
                    agg.update(&batch?).stage(Stage::Group)?;
                }
                debug!(keys = ?keys, groups = agg.num_groups(), "grouped");
                let grouped = agg.finish().stage(Stage::Group)?;
                Ok(Box::new(iter::once(Ok(grouped))))
            }
            PlanNode::MaxPerGroup(group) => {
                let all = drain(input, schema)?;
                let best = max_per_group(&all, group).stage(Stage::Group)?;
                Ok(Box::new(iter::once(Ok(best))))
            }
            PlanNode::SortDesc => {
                let all = drain(input, schema)?;
                Ok(Box::new(iter::once(rank(&all, None))))
            }
            PlanNode::TopK(k) => {
                let all = drain(input, schema)?;
                Ok(Box::new(iter::once(rank(&all, Some(*k)))))
            }
        }
    }
}

fn require_column(schema: &Schema, name: &str) -> Result<()> {
    schema
        .index_of(name)
        .map(|_| ())
        .map_err(|_| ClickstreamError::Schema(format!("column {} not found", name)))
}

fn column_indices(schema: &Schema, columns: &[&'static str]) -> Result<Vec<usize>> {
    columns
        .iter()
        .map(|c| {
            schema
                .index_of(c)
                .map_err(|_| ClickstreamError::Schema(format!("column {} not found", c)))
        })
        .collect()
}

/// Pull every batch out of `input` and concatenate
fn drain(input: BatchIter<'_>, schema: &SchemaRef) -> Result<RecordBatch> {
    let batches = input.collect::<Result<Vec<_>>>()?;
    concat_batches(schema, &batches).stage(Stage::Materialize)
}

/// Order rows by `n` descending. With a limit, missing counts are dropped and
/// only the first `limit` rows are kept.
fn rank(batch: &RecordBatch, limit: Option<usize>) -> Result<RecordBatch> {
    let counts = Counts::from_batch(batch).stage(Stage::Sort)?;
    let mut indices = desc_indices(&counts, limit.is_some());
    if let Some(k) = limit {
        indices = indices.slice(0, k.min(indices.len()));
    }
    take_record_batch(batch, &indices).stage(Stage::Sort)
}

/// A deferred query over a tabular source
pub struct Frame<'a> {
    source: &'a dyn TabularSource,
    plan: Vec<PlanNode>,
}

impl<'a> Frame<'a> {
    pub fn new(source: &'a dyn TabularSource) -> Self {
        Self {
            source,
            plan: Vec::new(),
        }
    }

    fn push(mut self, node: PlanNode) -> Self {
        self.plan.push(node);
        self
    }

    pub fn filter(self, predicate: Predicate) -> Self {
        self.push(PlanNode::Filter(predicate))
    }

    pub fn project(self, columns: &[&'static str]) -> Self {
        self.push(PlanNode::Project(columns.to_vec()))
    }

    pub fn group_sum(self, keys: &[&'static str]) -> Self {
        self.push(PlanNode::GroupSum(keys.to_vec()))
    }

    pub fn max_per_group(self, group: &'static str) -> Self {
        self.push(PlanNode::MaxPerGroup(group))
    }

    pub fn sort_desc(self) -> Self {
        self.push(PlanNode::SortDesc)
    }

    pub fn top_k(self, k: usize) -> Self {
        self.push(PlanNode::TopK(k))
    }

    /// Rank descending, keeping everything (`None`) or the top k
    pub fn rank(self, limit: Option<usize>) -> Self {
        match limit {
            Some(k) => self.top_k(k),
            None => self.sort_desc(),
        }
    }

    pub fn plan(&self) -> &[PlanNode] {
        &self.plan
    }

    /// Schema of the materialized result; validates column references
    pub fn schema(&self) -> Result<SchemaRef> {
        let mut schema = self.source.schema();
        for node in &self.plan {
            schema = node.output_schema(&schema).stage(Stage::Materialize)?;
        }
        Ok(schema)
    }

    /// Run the plan and return the result as one batch
    pub fn collect(&self) -> Result<RecordBatch> {
        let mut schema = self.source.schema();
        let mut stream = self.source.scan()?;

        debug!(plan = ?self.plan, "materializing frame");
        for node in &self.plan {
            let output = node.output_schema(&schema).stage(Stage::Materialize)?;
            stream = node.execute(stream, &schema)?;
            schema = output;
        }

        let result = drain(stream, &schema)?;
        info!(rows = result.num_rows(), "materialized frame");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{eager_schema, ReferrerType, ARTICLE, COMING_FROM};
    use crate::source::MemoryTable;
    use arrow::array::{Array, AsArray, DictionaryArray, StringArray, UInt32Array};
    use arrow::datatypes::{Int32Type, UInt64Type};

    fn table(rows: &[(&str, &str, &str, u32)]) -> MemoryTable {
        let referrer: DictionaryArray<Int32Type> = rows.iter().map(|r| r.2).collect();
        let batch = RecordBatch::try_new(
            eager_schema(),
            vec![
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))),
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.1))),
                Arc::new(referrer),
                Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.3))),
            ],
        )
        .unwrap();
        // Two batches so streaming nodes see more than one input
        let mid = batch.num_rows() / 2;
        MemoryTable::new(eager_schema(), vec![batch.slice(0, mid), batch.slice(mid, batch.num_rows() - mid)])
    }

    #[test]
    fn test_frame_is_deferred_until_collect() {
        let t = table(&[("A", "X", "link", 1)]);
        let frame = t.frame().filter(Predicate::Referrer(ReferrerType::Link)).top_k(3);
        assert_eq!(frame.plan().len(), 2);
        assert_eq!(frame.collect().unwrap().num_rows(), 1);
        // Collecting twice replays the source
        assert_eq!(frame.collect().unwrap().num_rows(), 1);
    }

    #[test]
    fn test_group_then_rank() {
        let t = table(&[
            ("A", "X", "link", 5),
            ("B", "X", "link", 3),
            ("A", "X", "external", 2),
            ("C", "Y", "link", 8),
        ]);
        let out = t
            .frame()
            .filter(Predicate::Referrer(ReferrerType::Link))
            .project(&[COMING_FROM, ARTICLE, N])
            .group_sum(&[COMING_FROM, ARTICLE])
            .sort_desc()
            .collect()
            .unwrap();

        let from = out.column(0).as_string::<i32>();
        let n = out.column(2).as_primitive::<UInt64Type>();
        assert_eq!(from.value(0), "C");
        assert_eq!(from.value(1), "A");
        assert_eq!(from.value(2), "B");
        assert_eq!(n.values().to_vec(), vec![8, 5, 3]);
    }

    #[test]
    fn test_schema_rejects_unknown_columns() {
        let t = table(&[("A", "X", "link", 1)]);
        let err = t.frame().project(&["nope"]).schema().unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Materialize));
        assert!(t.frame().project(&[ARTICLE]).top_k(1).schema().is_err());
    }

    #[test]
    fn test_projection_errors_report_project_stage() {
        // Batches narrower than the declared schema
        let schema = Arc::new(Schema::new(vec![arrow::datatypes::Field::new(
            ARTICLE,
            arrow::datatypes::DataType::Utf8,
            false,
        )]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["X"]))]).unwrap();
        let t = MemoryTable::new(eager_schema(), vec![batch]);

        let err = t.frame().project(&[N]).collect().unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Project));
    }

    #[test]
    fn test_empty_result_keeps_schema() {
        let t = table(&[("A", "X", "other", 1)]);
        let frame = t
            .frame()
            .filter(Predicate::Referrer(ReferrerType::Link))
            .group_sum(&[COMING_FROM, ARTICLE]);
        let out = frame.collect().unwrap();
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.schema(), frame.schema().unwrap());
        assert_eq!(out.column(2).len(), 0);
    }
}
