//! Fixed limits and per-tier options

/// Eager loader keeps only this many leading rows
pub const ROW_CAP: usize = 100_000;

/// Target byte size of one chunk in the chunked source (64 MB, decimal)
pub const CHUNK_SIZE_BYTES: u64 = 64_000_000;

/// Rows per Arrow batch when decoding
pub const BATCH_SIZE: usize = 8192;

pub const TOP_LINKS_CHUNKED_LIMIT: usize = 20;
pub const SUMMED_ARTICLES_LIMIT: usize = 10;
pub const MOST_POPULAR_LIMIT: usize = 40;

/// `coming_from` value for traffic arriving from a search engine
pub const OTHER_SEARCH: &str = "other-search";

/// Table name the chunked top-links result is stored under
pub const TOP_LINKS_TABLE: &str = "top_links_chunked";

/// Options for the eager, in-memory loader
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Keep only a prefix of this many rows; `None` keeps everything
    pub row_cap: Option<usize>,
    pub batch_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            row_cap: Some(ROW_CAP),
            batch_size: BATCH_SIZE,
        }
    }
}

/// Options for the chunked, deferred source
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub chunk_size_bytes: u64,
    pub batch_size: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size_bytes: CHUNK_SIZE_BYTES,
            batch_size: BATCH_SIZE,
        }
    }
}

/// Output limits for the four queries.
///
/// The two tiers disagree on `top_links`: the eager tier returns every group
/// (after capping its *input* at [`ROW_CAP`]) while the chunked tier reads all
/// rows and keeps the top [`TOP_LINKS_CHUNKED_LIMIT`]. Both are kept as-is;
/// callers wanting one behaviour set `top_links_limit` and
/// [`LoadOptions::row_cap`] explicitly.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub top_links_limit: Option<usize>,
    pub summed_articles_limit: usize,
    pub most_popular_limit: usize,
}

impl QueryOptions {
    pub fn eager() -> Self {
        Self {
            top_links_limit: None,
            summed_articles_limit: SUMMED_ARTICLES_LIMIT,
            most_popular_limit: MOST_POPULAR_LIMIT,
        }
    }

    pub fn chunked() -> Self {
        Self {
            top_links_limit: Some(TOP_LINKS_CHUNKED_LIMIT),
            ..Self::eager()
        }
    }
}
