//! The four clickstream queries
//!
//! Each query is written once against [`TabularSource`] and runs unchanged on
//! the eager [`MemoryTable`] and on the [`ChunkedSource`]. The path-level
//! entry points at the bottom load a fresh dataset on every call.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use arrow::array::{Array, RecordBatch};

use crate::chunked::ChunkedSource;
use crate::config::{ChunkOptions, LoadOptions, QueryOptions, OTHER_SEARCH, TOP_LINKS_TABLE};
use crate::error::{ClickstreamError, Result, ResultExt, Stage};
use crate::filter::Predicate;
use crate::frame::Frame;
use crate::materialize::persist_and_reload;
use crate::reader::load_clickstream;
use crate::schema::{ReferrerType, ARTICLE, COMING_FROM, N, REFERRER_TYPE};
use crate::source::{MemoryTable, TabularSource};
use crate::store::TableStore;
use crate::utils::{get_utf8_column, Counts};

/// Which links people follow most: link traffic summed per
/// `(coming_from, article)`, ranked by `n`. `limit` of `None` keeps every
/// group.
pub fn top_links(source: &dyn TabularSource, limit: Option<usize>) -> Result<RecordBatch> {
    Frame::new(source)
        .filter(Predicate::Referrer(ReferrerType::Link))
        .project(&[COMING_FROM, ARTICLE, N])
        .group_sum(&[COMING_FROM, ARTICLE])
        .rank(limit)
        .collect()
}

/// The single most common traffic source of each article, top `limit`
/// articles by that source's summed `n`.
pub fn summed_articles(source: &dyn TabularSource, limit: usize) -> Result<RecordBatch> {
    Frame::new(source)
        .group_sum(&[ARTICLE, COMING_FROM])
        .max_per_group(ARTICLE)
        .top_k(limit)
        .collect()
}

/// Share of `article`'s visits that came through an internal link, as a
/// percentage rounded to two decimals.
///
/// Fails with [`ClickstreamError::NoVisits`] when the article has no rows or
/// its counts sum to zero.
pub fn visitors_clicked_link(source: &dyn TabularSource, article: &str) -> Result<f64> {
    let rows = Frame::new(source)
        .filter(Predicate::equals(ARTICLE, article))
        .project(&[REFERRER_TYPE, N])
        .collect()?;

    let referrer = get_utf8_column(&rows, REFERRER_TYPE).stage(Stage::Group)?;
    let counts = Counts::from_batch(&rows).stage(Stage::Group)?;

    let mut total = 0.0;
    let mut link_total = 0.0;
    for row in 0..rows.num_rows() {
        let Some(n) = counts.as_f64(row) else { continue };
        total += n;
        if referrer.is_valid(row) && referrer.value(row) == ReferrerType::Link.as_str() {
            link_total += n;
        }
    }

    if total == 0.0 {
        return Err(ClickstreamError::NoVisits(article.to_string()).at(Stage::Group));
    }
    Ok(round2(link_total / total * 100.0))
}

/// Articles most often reached straight from a search engine, top `limit` by `n`.
/// Rows are ranked as-is, without grouping.
pub fn most_popular_articles(source: &dyn TabularSource, limit: usize) -> Result<RecordBatch> {
    Frame::new(source)
        .filter(Predicate::Referrer(ReferrerType::External).and(Predicate::equals(COMING_FROM, OTHER_SEARCH)))
        .project(&[ARTICLE, N])
        .top_k(limit)
        .collect()
}

/// Round to two decimals, halves to even
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Execution tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Capped prefix loaded into memory
    Eager,
    /// Whole file, scanned chunk by chunk on demand
    Chunked,
}

impl FromStr for Tier {
    type Err = ClickstreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eager" => Ok(Tier::Eager),
            "chunked" => Ok(Tier::Chunked),
            other => Err(ClickstreamError::Schema(format!("unknown tier {:?}", other))),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Eager => f.write_str("eager"),
            Tier::Chunked => f.write_str("chunked"),
        }
    }
}

/// A query and its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    TopLinks,
    SummedArticles,
    VisitorsClickedLink { article: String },
    MostPopularArticles,
}

/// What a query returns
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Table(RecordBatch),
    Percentage(f64),
}

/// Loaded dataset for one query invocation
pub enum Dataset {
    Eager(MemoryTable),
    Chunked(ChunkedSource),
}

impl Dataset {
    pub fn open(path: impl AsRef<Path>, tier: Tier) -> Result<Self> {
        match tier {
            Tier::Eager => Ok(Dataset::Eager(load_clickstream(path, &LoadOptions::default())?)),
            Tier::Chunked => Ok(Dataset::Chunked(ChunkedSource::open(path, &ChunkOptions::default())?)),
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            Dataset::Eager(_) => Tier::Eager,
            Dataset::Chunked(_) => Tier::Chunked,
        }
    }

    pub fn source(&self) -> &dyn TabularSource {
        match self {
            Dataset::Eager(table) => table,
            Dataset::Chunked(chunked) => chunked,
        }
    }

    pub fn options(&self) -> QueryOptions {
        match self {
            Dataset::Eager(_) => QueryOptions::eager(),
            Dataset::Chunked(_) => QueryOptions::chunked(),
        }
    }
}

/// Run `query` on an already opened dataset.
///
/// On the chunked tier, `top_links` is written to `store` as
/// [`TOP_LINKS_TABLE`] and the reloaded copy is returned.
pub fn run_on(dataset: &Dataset, query: &Query, options: &QueryOptions, store: Option<&TableStore>) -> Result<QueryOutput> {
    let source = dataset.source();
    let output = match query {
        Query::TopLinks => {
            let ranked = top_links(source, options.top_links_limit)?;
            match (dataset.tier(), store) {
                (Tier::Chunked, Some(store)) => {
                    persist_and_reload(store, TOP_LINKS_TABLE, &ranked, &[COMING_FROM, ARTICLE, N])?
                }
                _ => ranked,
            }
        }
        Query::SummedArticles => summed_articles(source, options.summed_articles_limit)?,
        Query::VisitorsClickedLink { article } => {
            return Ok(QueryOutput::Percentage(visitors_clicked_link(source, article)?))
        }
        Query::MostPopularArticles => most_popular_articles(source, options.most_popular_limit)?,
    };
    Ok(QueryOutput::Table(output))
}

/// Load `path` fresh for `tier` and run `query` with that tier's defaults
pub fn run(path: impl AsRef<Path>, tier: Tier, query: &Query, store: Option<&TableStore>) -> Result<QueryOutput> {
    let dataset = Dataset::open(path, tier)?;
    run_on(&dataset, query, &dataset.options(), store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::eager_schema;
    use arrow::array::{AsArray, DictionaryArray, StringArray, UInt32Array};
    use arrow::datatypes::{Int32Type, UInt64Type};
    use std::sync::Arc;

    fn table(rows: &[(&str, &str, &str, u32)]) -> MemoryTable {
        let referrer: DictionaryArray<Int32Type> = rows.iter().map(|r| r.2).collect();
        let batch = RecordBatch::try_new(
            eager_schema(),
            vec![
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))),
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.1))),
                Arc::new(referrer),
                Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.3))),
            ],
        )
        .unwrap();
        MemoryTable::new(eager_schema(), vec![batch])
    }

    #[test]
    fn test_top_links_scenario() {
        let t = table(&[("A", "X", "link", 5), ("B", "X", "link", 3), ("A", "X", "external", 2)]);
        let out = top_links(&t, None).unwrap();

        assert_eq!(out.num_rows(), 2);
        let from = out.column(0).as_string::<i32>();
        let article = out.column(1).as_string::<i32>();
        let n = out.column(2).as_primitive::<UInt64Type>();
        assert_eq!((from.value(0), article.value(0), n.value(0)), ("A", "X", 5));
        assert_eq!((from.value(1), article.value(1), n.value(1)), ("B", "X", 3));
    }

    #[test]
    fn test_top_links_limit() {
        let rows: Vec<(String, u32)> = (0..30).map(|i| (format!("P{}", i), i)).collect();
        let rows: Vec<(&str, &str, &str, u32)> = rows.iter().map(|(p, n)| (p.as_str(), "X", "link", *n)).collect();
        let t = table(&rows);
        let out = top_links(&t, Some(20)).unwrap();
        assert_eq!(out.num_rows(), 20);
        assert_eq!(out.column(2).as_primitive::<UInt64Type>().value(0), 29);
    }

    #[test]
    fn test_summed_articles_one_row_per_article() {
        let t = table(&[
            ("A", "X", "link", 5),
            ("B", "X", "link", 7),
            ("A", "X", "external", 4),
            ("C", "Y", "other", 2),
            ("D", "Y", "link", 2),
        ]);
        let out = summed_articles(&t, 10).unwrap();

        let article = out.column(0).as_string::<i32>();
        let from = out.column(1).as_string::<i32>();
        let n = out.column(2).as_primitive::<UInt64Type>();
        assert_eq!(out.num_rows(), 2);
        assert_eq!((article.value(0), from.value(0), n.value(0)), ("X", "A", 9));
        // Tie between C and D: first seen wins
        assert_eq!((article.value(1), from.value(1), n.value(1)), ("Y", "C", 2));
    }

    #[test]
    fn test_visitors_clicked_link() {
        let t = table(&[
            ("A", "X", "link", 1),
            ("other-search", "X", "external", 2),
            ("B", "Y", "link", 9),
        ]);
        assert_eq!(visitors_clicked_link(&t, "X").unwrap(), 33.33);
        assert_eq!(visitors_clicked_link(&t, "Y").unwrap(), 100.0);

        let err = visitors_clicked_link(&t, "Z").unwrap_err();
        assert!(matches!(err.root(), ClickstreamError::NoVisits(a) if a == "Z"));
        assert_eq!(err.stage(), Some(Stage::Group));
    }

    #[test]
    fn test_visitors_clicked_link_rounds_half_to_even() {
        let t = table(&[("A", "X", "link", 1), ("other-search", "X", "external", 31)]);
        assert_eq!(visitors_clicked_link(&t, "X").unwrap(), 3.12);
        assert_eq!(round2(0.125), 0.12);
        assert_eq!(round2(0.375), 0.38);
    }

    #[test]
    fn test_most_popular_articles() {
        let t = table(&[
            ("other-search", "X", "external", 3),
            ("other-search", "Y", "link", 50),
            ("other-empty", "Z", "external", 40),
            ("other-search", "W", "external", 8),
        ]);
        let out = most_popular_articles(&t, 40).unwrap();
        assert_eq!(out.num_columns(), 2);
        let article = out.column(0).as_string::<i32>();
        assert_eq!(out.num_rows(), 2);
        assert_eq!(article.value(0), "W");
        assert_eq!(article.value(1), "X");
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("eager".parse::<Tier>().unwrap(), Tier::Eager);
        assert_eq!("chunked".parse::<Tier>().unwrap(), Tier::Chunked);
        assert!("lazy".parse::<Tier>().is_err());
        assert_eq!(Tier::Chunked.to_string(), "chunked");
    }
}
