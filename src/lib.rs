//! Clickstream statistics over an eager and a chunked execution tier
//!
//! The dataset is a headerless TSV of `coming_from, article, referrer_type, n`
//! rows. The eager tier ([`reader::load_clickstream`]) loads a capped prefix
//! into memory; the chunked tier ([`chunked::ChunkedSource`]) scans the whole
//! file in byte-range chunks. Queries in [`query`] are built as deferred
//! [`frame::Frame`]s and run the same way on either tier.

pub mod aggregator;
pub mod chunked;
pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod materialize;
pub mod query;
pub mod reader;
pub mod schema;
pub mod source;
pub mod store;
pub mod utils;

pub use chunked::ChunkedSource;
pub use error::{ClickstreamError, Result, Stage};
pub use query::{
    most_popular_articles, run, run_on, summed_articles, top_links, visitors_clicked_link, Dataset, Query,
    QueryOutput, Tier,
};
pub use schema::ReferrerType;
pub use source::{MemoryTable, TabularSource};
pub use store::TableStore;
