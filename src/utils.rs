//! Column access helpers shared by the loader, filter and aggregator

use std::cmp::Ordering;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, UInt32Type, UInt64Type};

use crate::error::{ClickstreamError, Result};
use crate::schema::N;

/// Look up a column by name
pub fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    let idx = batch
        .schema()
        .fields()
        .iter()
        .position(|f| f.name() == name)
        .ok_or_else(|| ClickstreamError::Schema(format!("column {} not found", name)))?;
    Ok(batch.column(idx))
}

/// Get a column as Float64, casting with the Arrow cast kernel when needed
pub fn get_f64_column(batch: &RecordBatch, name: &str) -> Result<Float64Array> {
    let col = column(batch, name)?;
    if col.data_type() == &DataType::Float64 {
        return Ok(col.as_primitive::<Float64Type>().clone());
    }
    let cast_array = cast(col, &DataType::Float64)?;
    Ok(cast_array.as_primitive::<Float64Type>().clone())
}

/// Get a column as plain Utf8; dictionary-encoded columns are unpacked
pub fn get_utf8_column(batch: &RecordBatch, name: &str) -> Result<StringArray> {
    let col = column(batch, name)?;
    if col.data_type() == &DataType::Utf8 {
        return Ok(col.as_string::<i32>().clone());
    }
    let cast_array = cast(col, &DataType::Utf8)?;
    Ok(cast_array.as_string::<i32>().clone())
}

/// The `n` column of a batch, in whichever numeric type the tier uses.
///
/// A value is "present" when it is non-null and, for floats, not NaN. Missing
/// counts never take part in sums or rankings.
#[derive(Debug, Clone)]
pub enum Counts {
    UInt32(UInt32Array),
    UInt64(UInt64Array),
    Float64(Float64Array),
}

impl Counts {
    pub fn from_batch(batch: &RecordBatch) -> Result<Self> {
        let col = column(batch, N)?;
        match col.data_type() {
            DataType::UInt32 => Ok(Counts::UInt32(col.as_primitive::<UInt32Type>().clone())),
            DataType::UInt64 => Ok(Counts::UInt64(col.as_primitive::<UInt64Type>().clone())),
            DataType::Float64 => Ok(Counts::Float64(col.as_primitive::<Float64Type>().clone())),
            other => Err(ClickstreamError::Schema(format!(
                "column {} has unsupported type {}",
                N, other
            ))),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Counts::UInt32(a) => a.len(),
            Counts::UInt64(a) => a.len(),
            Counts::Float64(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_present(&self, i: usize) -> bool {
        match self {
            Counts::UInt32(a) => a.is_valid(i),
            Counts::UInt64(a) => a.is_valid(i),
            Counts::Float64(a) => a.is_valid(i) && !a.value(i).is_nan(),
        }
    }

    /// Integer value at `i`; `None` for missing or float counts
    pub fn as_u64(&self, i: usize) -> Option<u64> {
        if !self.is_present(i) {
            return None;
        }
        match self {
            Counts::UInt32(a) => Some(a.value(i) as u64),
            Counts::UInt64(a) => Some(a.value(i)),
            Counts::Float64(_) => None,
        }
    }

    pub fn as_f64(&self, i: usize) -> Option<f64> {
        if !self.is_present(i) {
            return None;
        }
        match self {
            Counts::UInt32(a) => Some(a.value(i) as f64),
            Counts::UInt64(a) => Some(a.value(i) as f64),
            Counts::Float64(a) => Some(a.value(i)),
        }
    }

    /// Compare two present values
    pub fn compare(&self, i: usize, j: usize) -> Ordering {
        match self {
            Counts::UInt32(a) => a.value(i).cmp(&a.value(j)),
            Counts::UInt64(a) => a.value(i).cmp(&a.value(j)),
            Counts::Float64(a) => a.value(i).total_cmp(&a.value(j)),
        }
    }
}

/// Row indices ordered by `n` descending.
///
/// The sort is stable, so equal counts keep their input order. Rows with a
/// missing count go last, or are left out entirely when `drop_missing` is set.
pub fn desc_indices(counts: &Counts, drop_missing: bool) -> UInt32Array {
    let (mut present, missing): (Vec<u32>, Vec<u32>) =
        (0..counts.len() as u32).partition(|&i| counts.is_present(i as usize));

    present.sort_by(|&a, &b| counts.compare(b as usize, a as usize));

    if !drop_missing {
        present.extend(missing);
    }
    UInt32Array::from(present)
}
