//! TSV decoding and the eager, in-memory loader

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use arrow::array::{Array, ArrayRef, BooleanArray, RecordBatch, StringArray, UInt32Array};
use arrow::compute::{self, cast};
use arrow::csv::{self, ReaderBuilder};
use tracing::{debug, info};

use crate::config::LoadOptions;
use crate::error::{ClickstreamError, Result, ResultExt, Stage};
use crate::filter::Predicate;
use crate::schema::{category_type, eager_schema, raw_schema, ReferrerType, ARTICLE, COMING_FROM, N, REFERRER_TYPE};
use crate::source::MemoryTable;
use crate::utils::{column, get_f64_column, get_utf8_column};

/// Build an Arrow CSV reader for headerless, tab-separated clickstream rows.
///
/// Short rows are padded with nulls; rows with too many fields are an error.
pub fn decode_tsv<R: Read>(input: R, batch_size: usize) -> Result<csv::Reader<R>> {
    let reader = ReaderBuilder::new(raw_schema())
        .with_header(false)
        .with_delimiter(b'\t')
        .with_truncated_rows(true)
        .with_batch_size(batch_size)
        .build(input)?;
    Ok(reader)
}

pub(crate) fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| ClickstreamError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Check every non-null referrer against the known categories and intern the
/// column as a dictionary
pub fn intern_referrer(strings: &StringArray) -> Result<ArrayRef> {
    for value in strings.iter().flatten() {
        value.parse::<ReferrerType>()?;
    }
    Ok(cast(strings, &category_type())?)
}

/// Narrow one count to u32. Negative, fractional, non-finite and too-large
/// values are rejected rather than wrapped or truncated.
pub fn narrow_count(value: f64) -> Option<u32> {
    if value.is_finite() && value >= 0.0 && value <= u32::MAX as f64 && value.fract() == 0.0 {
        Some(value as u32)
    } else {
        None
    }
}

/// Rows with no missing field and a count that is a number
fn complete_rows(batch: &RecordBatch) -> Result<BooleanArray> {
    let complete = Predicate::Complete.evaluate(batch)?;
    let n = get_f64_column(batch, N)?;
    let not_nan: BooleanArray = n.iter().map(|v| Some(!v.is_some_and(f64::is_nan))).collect();
    Ok(compute::and(&complete, &not_nan)?)
}

/// Drop incomplete rows from a raw batch, validate categories and narrow `n`.
///
/// `first_line` is the 1-based file line of the batch's first row, used to
/// point at the offending row on overflow.
fn to_eager_batch(raw: &RecordBatch, first_line: usize) -> Result<RecordBatch> {
    let keep = complete_rows(raw)?;
    let n = get_f64_column(raw, N)?;

    let narrowed = n
        .iter()
        .zip(keep.iter())
        .enumerate()
        .map(|(i, (value, keep))| match (value, keep) {
            (Some(v), Some(true)) => narrow_count(v)
                .map(Some)
                .ok_or(ClickstreamError::CountOverflow { row: first_line + i, value: v }),
            _ => Ok(None),
        })
        .collect::<Result<UInt32Array>>()?;

    let coming_from = compute::filter(column(raw, COMING_FROM)?, &keep)?;
    let article = compute::filter(column(raw, ARTICLE)?, &keep)?;
    let referrer = compute::filter(&get_utf8_column(raw, REFERRER_TYPE)?, &keep)?;
    let n = compute::filter(&narrowed, &keep)?;

    let referrer = referrer
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| ClickstreamError::Schema(format!("{} is not Utf8", REFERRER_TYPE)))?;

    Ok(RecordBatch::try_new(
        eager_schema(),
        vec![coming_from, article, intern_referrer(referrer)?, n],
    )?)
}

/// Load a clickstream TSV into memory.
///
/// Incomplete rows are dropped, `n` is narrowed to u32 and the result is cut
/// to the first `row_cap` retained rows. Narrowing runs over every row of the
/// file, so an out-of-range count past the cap still fails the load.
pub fn load_clickstream(path: impl AsRef<Path>, options: &LoadOptions) -> Result<MemoryTable> {
    let path = path.as_ref();
    let file = open(path).stage(Stage::Load)?;
    let reader = decode_tsv(BufReader::new(file), options.batch_size).stage(Stage::Load)?;

    let mut batches = Vec::new();
    let mut kept = 0usize;
    let mut read = 0usize;

    for raw in reader {
        let raw = raw.stage(Stage::Load)?;
        let first_line = read + 1;
        read += raw.num_rows();

        let batch = to_eager_batch(&raw, first_line).stage(Stage::Load)?;
        let room = options.row_cap.map_or(usize::MAX, |cap| cap.saturating_sub(kept));
        if room == 0 || batch.num_rows() == 0 {
            continue;
        }
        let batch = if batch.num_rows() > room {
            batch.slice(0, room)
        } else {
            batch
        };
        kept += batch.num_rows();
        batches.push(batch);
    }

    let table = MemoryTable::new(eager_schema(), batches);
    let dropped = read - table.num_rows();
    debug!(path = %path.display(), read, kept, dropped, "eager load finished");
    info!(rows = kept, "loaded clickstream into memory");

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TabularSource;
    use arrow::array::AsArray;
    use arrow::datatypes::{DataType, UInt32Type};
    use std::io::Write;

    fn write_tsv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_narrow_count() {
        assert_eq!(narrow_count(0.0), Some(0));
        assert_eq!(narrow_count(4294967295.0), Some(u32::MAX));
        assert_eq!(narrow_count(4294967296.0), None);
        assert_eq!(narrow_count(-1.0), None);
        assert_eq!(narrow_count(1.5), None);
        assert_eq!(narrow_count(f64::NAN), None);
    }

    #[test]
    fn test_load_drops_incomplete_rows() {
        let file = write_tsv("A\tX\tlink\t5\n\tX\tlink\t3\nB\tY\texternal\t\nC\tZ\tother\t7\n");
        let table = load_clickstream(file.path(), &LoadOptions::default()).unwrap();
        let batch = table.to_batch().unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), table.schema());
        assert_eq!(batch.column(3).data_type(), &DataType::UInt32);
        assert_eq!(batch.column(2).data_type(), &category_type());
        let n = batch.column(3).as_primitive::<UInt32Type>();
        assert_eq!(n.values().to_vec(), vec![5, 7]);
    }

    #[test]
    fn test_load_truncates_to_prefix() {
        let rows: String = (0..50).map(|i| format!("A{}\tX\tlink\t{}\n", i, i)).collect();
        let file = write_tsv(&rows);
        let options = LoadOptions {
            row_cap: Some(12),
            batch_size: 5,
        };
        let table = load_clickstream(file.path(), &options).unwrap();
        let batch = table.to_batch().unwrap();
        assert_eq!(batch.num_rows(), 12);
        let n = batch.column(3).as_primitive::<UInt32Type>();
        assert_eq!(n.value(11), 11);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let file = write_tsv("A\tX\tlink\t5\nB\tX\tlink\t5000000000\n");
        let options = LoadOptions {
            row_cap: Some(1),
            ..LoadOptions::default()
        };
        let err = load_clickstream(file.path(), &options).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Load));
        assert!(matches!(err.root(), ClickstreamError::CountOverflow { row: 2, .. }));
    }

    #[test]
    fn test_unknown_category_is_an_error() {
        let file = write_tsv("A\tX\tbogus\t5\n");
        let err = load_clickstream(file.path(), &LoadOptions::default()).unwrap_err();
        assert!(matches!(err.root(), ClickstreamError::Schema(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_clickstream("/nonexistent/clickstream.tsv", &LoadOptions::default()).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Load));
        assert!(matches!(err.root(), ClickstreamError::Io { .. }));
    }

    #[test]
    fn test_short_row_is_dropped() {
        let file = write_tsv("A\tX\tlink\t5\nB\tX\tlink\nC\tY\tlink\t2\n");
        let table = load_clickstream(file.path(), &LoadOptions::default()).unwrap();
        assert_eq!(table.num_rows(), 2);
        let batch = table.to_batch().unwrap();
        assert_eq!(batch.column(0).as_string::<i32>().value(1), "C");
    }

    #[test]
    fn test_extra_fields_fail_the_load() {
        let file = write_tsv("A\tX\tlink\t5\textra\n");
        let err = load_clickstream(file.path(), &LoadOptions::default()).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Load));
        assert!(matches!(err.root(), ClickstreamError::Arrow(_)));
    }

    #[test]
    fn test_non_numeric_count_fails_the_load() {
        let file = write_tsv("A\tX\tlink\tmany\n");
        assert!(load_clickstream(file.path(), &LoadOptions::default()).is_err());
    }
}
