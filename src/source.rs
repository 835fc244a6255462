//! The tabular-source capability both execution tiers implement

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;

use crate::error::Result;
use crate::frame::Frame;

/// A boxed stream of record batches
pub type BatchIter<'a> = Box<dyn Iterator<Item = Result<RecordBatch>> + 'a>;

/// Anything the query frames can scan.
///
/// `scan` must be re-playable: every call yields the full dataset again, in
/// the same order.
pub trait TabularSource {
    fn schema(&self) -> SchemaRef;

    fn scan(&self) -> Result<BatchIter<'_>>;

    /// Start a deferred query over this source
    fn frame(&self) -> Frame<'_>
    where
        Self: Sized,
    {
        Frame::new(self)
    }
}

/// A fully materialized table held in memory
#[derive(Debug, Clone)]
pub struct MemoryTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl MemoryTable {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    /// All rows as one batch
    pub fn to_batch(&self) -> Result<RecordBatch> {
        Ok(concat_batches(&self.schema, &self.batches)?)
    }
}

impl TabularSource for MemoryTable {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn scan(&self) -> Result<BatchIter<'_>> {
        Ok(Box::new(self.batches.iter().cloned().map(Ok)))
    }
}
