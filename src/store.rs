//! Named on-disk table store backed by Parquet files
//!
//! Each table is one Parquet file under the store directory. The Arrow schema
//! is embedded by the writer so column types come back exactly as written.
//! Data columns get page-level statistics so readers can prune on them; the
//! remaining columns are written without statistics.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use arrow_array::{RecordBatch, RecordBatchReader};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;
use parquet::schema::types::ColumnPath;
use tracing::{debug, info};

use crate::config::BATCH_SIZE;
use crate::error::{ClickstreamError, Result};

/// Key-value metadata entry listing a table's data columns
const DATA_COLUMNS_KEY: &str = "clickstream.data_columns";

#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| ClickstreamError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    fn table_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ClickstreamError::Schema(format!("invalid table name {:?}", name)));
        }
        Ok(self.root.join(format!("{}.parquet", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Write `batch` as table `name`, replacing any existing table.
    ///
    /// `data_columns` must name columns of `batch`; they are the columns
    /// written with statistics.
    pub fn put(&self, name: &str, batch: &RecordBatch, data_columns: &[&str]) -> Result<()> {
        let path = self.table_path(name)?;
        let schema = batch.schema();
        for column in data_columns {
            schema
                .index_of(column)
                .map_err(|_| ClickstreamError::Schema(format!("data column {} not in table {}", column, name)))?;
        }

        let mut props = WriterProperties::builder()
            .set_statistics_enabled(EnabledStatistics::None)
            .set_key_value_metadata(Some(vec![KeyValue::new(
                DATA_COLUMNS_KEY.to_string(),
                data_columns.join(","),
            )]));
        for column in data_columns {
            props = props.set_column_statistics_enabled(ColumnPath::from(*column), EnabledStatistics::Page);
        }

        // Write beside the target and rename so a failed put leaves the old table intact
        let tmp = path.with_extension("parquet.tmp");
        let file = File::create(&tmp)?;
        let mut writer = ArrowWriter::try_new(file, schema, Some(props.build()))?;
        writer.write(batch)?;
        writer.close()?;
        fs::rename(&tmp, &path)?;

        info!(table = name, rows = batch.num_rows(), path = %path.display(), "stored table");
        Ok(())
    }

    fn reader_builder(&self, name: &str) -> Result<ParquetRecordBatchReaderBuilder<File>> {
        let path = self.table_path(name)?;
        if !path.is_file() {
            return Err(ClickstreamError::TableNotFound(name.to_string()));
        }
        Ok(ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?)
    }

    /// Read every row and column of table `name`
    pub fn select(&self, name: &str) -> Result<RecordBatch> {
        let builder = self.reader_builder(name)?;
        let schema = plain_schema(builder.schema());
        read_all(builder.with_batch_size(BATCH_SIZE).build()?, schema)
    }

    /// Read only `columns` of table `name`, in the order given
    pub fn select_columns(&self, name: &str, columns: &[&str]) -> Result<RecordBatch> {
        let builder = self.reader_builder(name)?;
        let arrow_schema = builder.schema().clone();

        let indices = columns
            .iter()
            .map(|c| {
                arrow_schema
                    .index_of(c)
                    .map_err(|_| ClickstreamError::Schema(format!("column {} not in table {}", c, name)))
            })
            .collect::<Result<Vec<usize>>>()?;

        let projection = ProjectionMask::roots(builder.parquet_schema(), indices);
        let reader = builder
            .with_projection(projection)
            .with_batch_size(BATCH_SIZE)
            .build()?;
        let schema = plain_schema(&reader.schema());
        let batch = read_all(reader, schema)?;

        // The mask keeps file order; reorder to the caller's order
        let order = columns
            .iter()
            .map(|c| batch.schema().index_of(c))
            .collect::<std::result::Result<Vec<usize>, _>>()?;
        Ok(batch.project(&order)?)
    }

    /// Columns `name` was stored with statistics for
    pub fn data_columns(&self, name: &str) -> Result<Vec<String>> {
        let builder = self.reader_builder(name)?;
        let value = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|kv| kv.iter().find(|e| e.key == DATA_COLUMNS_KEY))
            .and_then(|e| e.value.clone())
            .unwrap_or_default();
        Ok(value
            .split(',')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Drop the file-level metadata the reader attaches to the schema
fn plain_schema(schema: &SchemaRef) -> SchemaRef {
    Arc::new(Schema::new(schema.fields().clone()))
}

fn read_all(
    reader: parquet::arrow::arrow_reader::ParquetRecordBatchReader,
    schema: SchemaRef,
) -> Result<RecordBatch> {
    let mut batches = Vec::new();
    for batch in reader {
        let batch = batch?;
        batches.push(RecordBatch::try_new(schema.clone(), batch.columns().to_vec())?);
    }
    debug!(batches = batches.len(), "read stored table");
    Ok(concat_batches(&schema, &batches)?)
}
