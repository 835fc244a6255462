//! Chunked clickstream source
//!
//! The file is split into byte ranges of roughly `chunk_size_bytes`, each
//! ending on a line boundary. Nothing is decoded until a frame scans the
//! source; every scan re-opens the file and walks the chunks in order, so
//! the source can be replayed for as many queries as needed.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Take};
use std::ops::Range;
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use arrow::csv;
use arrow::datatypes::SchemaRef;
use tracing::{debug, info};

use crate::config::ChunkOptions;
use crate::error::{ClickstreamError, Result, ResultExt, Stage};
use crate::reader::{decode_tsv, intern_referrer, open};
use crate::schema::{chunked_schema, ARTICLE, COMING_FROM, N, REFERRER_TYPE};
use crate::source::{BatchIter, TabularSource};
use crate::utils::{column, get_utf8_column};

pub struct ChunkedSource {
    path: PathBuf,
    chunks: Vec<Range<u64>>,
    batch_size: usize,
}

impl ChunkedSource {
    /// Plan the chunk boundaries of `path`. Only the bytes around each
    /// boundary are read here.
    pub fn open(path: impl AsRef<Path>, options: &ChunkOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = open(&path).stage(Stage::Load)?;
        let len = file.metadata().stage(Stage::Load)?.len();
        let chunks = plan_chunks(&mut file, len, options.chunk_size_bytes.max(1)).stage(Stage::Load)?;

        info!(path = %path.display(), bytes = len, chunks = chunks.len(), "planned chunked source");

        Ok(Self {
            path,
            chunks,
            batch_size: options.batch_size,
        })
    }

    pub fn chunks(&self) -> &[Range<u64>] {
        &self.chunks
    }

    fn read_chunk(&self, range: Range<u64>) -> Result<ChunkReader> {
        let mut file = open(&self.path)?;
        file.seek(SeekFrom::Start(range.start))?;
        let input = BufReader::new(file.take(range.end - range.start));
        debug!(start = range.start, end = range.end, "scanning chunk");
        Ok(ChunkReader {
            inner: decode_tsv(input, self.batch_size)?,
        })
    }
}

impl TabularSource for ChunkedSource {
    fn schema(&self) -> SchemaRef {
        chunked_schema()
    }

    fn scan(&self) -> Result<BatchIter<'_>> {
        let batches = self.chunks.iter().flat_map(move |range| -> BatchIter<'static> {
            match self.read_chunk(range.clone()) {
                Ok(reader) => Box::new(reader),
                Err(e) => Box::new(std::iter::once(Err(e.at(Stage::Scan)))),
            }
        });
        Ok(Box::new(batches))
    }
}

/// Split `[0, len)` into ranges of at least `chunk_size` bytes that each end
/// just after a newline (or at end of file).
fn plan_chunks(file: &mut File, len: u64, chunk_size: u64) -> Result<Vec<Range<u64>>> {
    let mut chunks = Vec::new();
    let mut start = 0u64;
    let mut line = Vec::new();

    while start < len {
        let target = start.saturating_add(chunk_size);
        if target >= len {
            chunks.push(start..len);
            break;
        }

        file.seek(SeekFrom::Start(target))?;
        line.clear();
        let skipped = BufReader::new(&mut *file).read_until(b'\n', &mut line)? as u64;
        let end = (target + skipped).min(len);
        chunks.push(start..end);
        start = end;
    }

    Ok(chunks)
}

/// Decodes one chunk and converts raw batches to the chunked schema
struct ChunkReader {
    inner: csv::Reader<BufReader<Take<File>>>,
}

impl Iterator for ChunkReader {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.inner.next()?;
        Some(
            raw.map_err(ClickstreamError::from)
                .and_then(|raw| to_chunked_batch(&raw))
                .stage(Stage::Scan),
        )
    }
}

/// Intern `referrer_type`; everything else, nulls included, passes through
fn to_chunked_batch(raw: &RecordBatch) -> Result<RecordBatch> {
    let referrer = intern_referrer(&get_utf8_column(raw, REFERRER_TYPE)?)?;
    Ok(RecordBatch::try_new(
        chunked_schema(),
        vec![
            column(raw, COMING_FROM)?.clone(),
            column(raw, ARTICLE)?.clone(),
            referrer,
            column(raw, N)?.clone(),
        ],
    )?)
}
