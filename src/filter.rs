//! Row predicates evaluated with Arrow compute kernels

use arrow::array::{Array, BooleanArray, RecordBatch, Scalar, StringArray};
use arrow::compute;

use crate::error::Result;
use crate::schema::{ReferrerType, REFERRER_TYPE};
use crate::utils::get_utf8_column;

/// A filter over clickstream rows. Comparisons against null are false.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// String column equals a literal
    Equals { column: &'static str, value: String },
    /// `referrer_type` is the given category
    Referrer(ReferrerType),
    /// Every column is non-null
    Complete,
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn equals(column: &'static str, value: impl Into<String>) -> Self {
        Predicate::Equals {
            column,
            value: value.into(),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Build the selection mask for `batch`. Null comparison results are
    /// folded to `false` so the mask can be counted directly.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        let mask = match self {
            Predicate::Equals { column, value } => string_eq(batch, column, value)?,
            Predicate::Referrer(kind) => string_eq(batch, REFERRER_TYPE, kind.as_str())?,
            Predicate::Complete => {
                let mut mask = BooleanArray::from(vec![true; batch.num_rows()]);
                for col in batch.columns() {
                    mask = compute::and(&mask, &compute::is_not_null(col.as_ref())?)?;
                }
                mask
            }
            Predicate::And(parts) => {
                let mut mask = BooleanArray::from(vec![true; batch.num_rows()]);
                for part in parts {
                    mask = compute::and(&mask, &part.evaluate(batch)?)?;
                }
                mask
            }
        };
        Ok(fold_nulls(mask))
    }

    /// Keep only the rows of `batch` matching this predicate
    pub fn apply(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let mask = self.evaluate(batch)?;
        if mask.true_count() == batch.num_rows() {
            return Ok(batch.clone());
        }
        Ok(compute::filter_record_batch(batch, &mask)?)
    }
}

fn string_eq(batch: &RecordBatch, name: &str, value: &str) -> Result<BooleanArray> {
    let strings = get_utf8_column(batch, name)?;
    let scalar = Scalar::new(StringArray::from(vec![value]));
    Ok(compute::kernels::cmp::eq(&strings, &scalar)?)
}

fn fold_nulls(mask: BooleanArray) -> BooleanArray {
    if mask.null_count() == 0 {
        return mask;
    }
    mask.iter().map(|v| Some(v.unwrap_or(false))).collect()
}
