//! Hash group-by with summed counts
//!
//! Groups are kept in first-seen order so that ranking the output with a
//! stable sort gives a deterministic tie-break.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow::compute::take_record_batch;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::error::{ClickstreamError, Result};
use crate::schema::{sum_type, N};
use crate::utils::{get_utf8_column, Counts};

#[derive(Debug)]
enum Sums {
    Int(Vec<u64>),
    Float(Vec<f64>),
}

impl Sums {
    fn push_group(&mut self) {
        match self {
            Sums::Int(v) => v.push(0),
            Sums::Float(v) => v.push(0.0),
        }
    }
}

/// Sums `n` per distinct combination of key columns
#[derive(Debug)]
pub struct GroupSum {
    keys: Vec<&'static str>,
    schema: SchemaRef,
    index: HashMap<Vec<String>, usize>,
    groups: Vec<Vec<String>>,
    sums: Sums,
}

impl GroupSum {
    /// Output schema: the key columns as Utf8, then the summed `n`
    pub fn output_schema(keys: &[&'static str], input: &Schema) -> Result<SchemaRef> {
        let mut fields = Vec::with_capacity(keys.len() + 1);
        for key in keys {
            input
                .field_with_name(key)
                .map_err(|_| ClickstreamError::Schema(format!("column {} not found", key)))?;
            fields.push(Field::new(*key, DataType::Utf8, false));
        }
        let count = input
            .field_with_name(N)
            .map_err(|_| ClickstreamError::Schema(format!("column {} not found", N)))?;
        fields.push(Field::new(N, sum_type(count.data_type())?, false));
        Ok(Arc::new(Schema::new(fields)))
    }

    pub fn try_new(keys: Vec<&'static str>, input: &Schema) -> Result<Self> {
        let schema = Self::output_schema(&keys, input)?;
        let sums = match schema.field(keys.len()).data_type() {
            DataType::UInt64 => Sums::Int(Vec::new()),
            _ => Sums::Float(Vec::new()),
        };
        Ok(Self {
            keys,
            schema,
            index: HashMap::new(),
            groups: Vec::new(),
            sums,
        })
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Fold one batch into the running sums. Rows with a null key are
    /// ignored; rows with a missing count still create their group.
    pub fn update(&mut self, batch: &RecordBatch) -> Result<()> {
        let key_columns = self
            .keys
            .iter()
            .map(|k| get_utf8_column(batch, k))
            .collect::<Result<Vec<StringArray>>>()?;
        let counts = Counts::from_batch(batch)?;

        'rows: for row in 0..batch.num_rows() {
            let mut key = Vec::with_capacity(key_columns.len());
            for col in &key_columns {
                if col.is_null(row) {
                    continue 'rows;
                }
                key.push(col.value(row).to_string());
            }

            let slot = match self.index.get(&key) {
                Some(&slot) => slot,
                None => {
                    let slot = self.groups.len();
                    self.index.insert(key.clone(), slot);
                    self.groups.push(key);
                    self.sums.push_group();
                    slot
                }
            };

            match &mut self.sums {
                Sums::Int(sums) => {
                    if let Some(v) = counts.as_u64(row) {
                        sums[slot] = sums[slot].checked_add(v).ok_or_else(|| {
                            ClickstreamError::CountSumOverflow(self.groups[slot].join("/"))
                        })?;
                    }
                }
                Sums::Float(sums) => {
                    if let Some(v) = counts.as_f64(row) {
                        sums[slot] += v;
                    }
                }
            }
        }
        Ok(())
    }

    /// Emit one row per group, in first-seen order
    pub fn finish(self) -> Result<RecordBatch> {
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.keys.len() + 1);
        for k in 0..self.keys.len() {
            let values: StringArray = self.groups.iter().map(|g| Some(g[k].as_str())).collect();
            columns.push(Arc::new(values));
        }
        columns.push(match self.sums {
            Sums::Int(sums) => Arc::new(UInt64Array::from(sums)) as ArrayRef,
            Sums::Float(sums) => Arc::new(Float64Array::from(sums)),
        });
        Ok(RecordBatch::try_new(self.schema, columns)?)
    }
}

/// For each distinct value of `group`, keep the row with the largest `n`.
///
/// The first row reaching the maximum wins. Output follows the first-seen
/// order of the groups. Rows with a null group or missing count are skipped.
pub fn max_per_group(batch: &RecordBatch, group: &str) -> Result<RecordBatch> {
    let keys = get_utf8_column(batch, group)?;
    let counts = Counts::from_batch(batch)?;

    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut best: Vec<usize> = Vec::new();

    for row in 0..batch.num_rows() {
        if keys.is_null(row) || !counts.is_present(row) {
            continue;
        }
        match index.get(keys.value(row)) {
            Some(&slot) => {
                if counts.compare(row, best[slot]).is_gt() {
                    best[slot] = row;
                }
            }
            None => {
                index.insert(keys.value(row), best.len());
                best.push(row);
            }
        }
    }

    let indices = UInt32Array::from(best.into_iter().map(|i| i as u32).collect::<Vec<_>>());
    Ok(take_record_batch(batch, &indices)?)
}
