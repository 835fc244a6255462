//! Store round-trip for materialized results

use arrow::array::RecordBatch;
use tracing::debug;

use crate::error::{ClickstreamError, Result, ResultExt, Stage};
use crate::store::TableStore;

/// Write `batch` to `store` as `table`, read it straight back and return the
/// reloaded copy.
///
/// The reloaded table must match what was written column for column: same
/// names, types, row count and values, in the same order.
pub fn persist_and_reload(
    store: &TableStore,
    table: &str,
    batch: &RecordBatch,
    data_columns: &[&str],
) -> Result<RecordBatch> {
    store.put(table, batch, data_columns).stage(Stage::StoreRoundTrip)?;
    let reloaded = store.select(table).stage(Stage::StoreRoundTrip)?;

    if reloaded.schema().fields() != batch.schema().fields() || reloaded.columns() != batch.columns() {
        return Err(ClickstreamError::Schema(format!(
            "table {} changed on reload ({} rows written, {} read)",
            table,
            batch.num_rows(),
            reloaded.num_rows()
        ))
        .at(Stage::StoreRoundTrip));
    }

    debug!(table, rows = reloaded.num_rows(), "store round-trip verified");
    Ok(reloaded)
}
