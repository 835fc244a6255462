//! Fixed clickstream schema and the referrer category set

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};

use crate::error::ClickstreamError;

pub const COMING_FROM: &str = "coming_from";
pub const ARTICLE: &str = "article";
pub const REFERRER_TYPE: &str = "referrer_type";
pub const N: &str = "n";

/// Column order of the input file (no header; positional)
pub const COLUMNS: [&str; 4] = [COMING_FROM, ARTICLE, REFERRER_TYPE, N];

/// How a visit arrived at an article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferrerType {
    /// Internal link from another article
    Link,
    /// External site or search engine
    External,
    Other,
}

impl ReferrerType {
    pub const ALL: [ReferrerType; 3] = [ReferrerType::Link, ReferrerType::External, ReferrerType::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferrerType::Link => "link",
            ReferrerType::External => "external",
            ReferrerType::Other => "other",
        }
    }
}

impl fmt::Display for ReferrerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferrerType {
    type Err = ClickstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReferrerType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ClickstreamError::Schema(format!("unknown referrer_type {:?}", s)))
    }
}

/// Interned storage type of `referrer_type`
pub fn category_type() -> DataType {
    DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
}

/// Schema the TSV is decoded with: every column nullable, `n` as f64
pub fn raw_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(COMING_FROM, DataType::Utf8, true),
        Field::new(ARTICLE, DataType::Utf8, true),
        Field::new(REFERRER_TYPE, DataType::Utf8, true),
        Field::new(N, DataType::Float64, true),
    ]))
}

/// Schema of the chunked tier: categorical referrer, nulls kept, `n` stays f64
pub fn chunked_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(COMING_FROM, DataType::Utf8, true),
        Field::new(ARTICLE, DataType::Utf8, true),
        Field::new(REFERRER_TYPE, category_type(), true),
        Field::new(N, DataType::Float64, true),
    ]))
}

/// Schema of the eager tier after incomplete rows are dropped and `n` narrowed
pub fn eager_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(COMING_FROM, DataType::Utf8, false),
        Field::new(ARTICLE, DataType::Utf8, false),
        Field::new(REFERRER_TYPE, category_type(), false),
        Field::new(N, DataType::UInt32, false),
    ]))
}

/// Type a summed count column takes for a given input count type.
/// Integer counts widen to u64; float counts stay f64.
pub fn sum_type(count_type: &DataType) -> Result<DataType, ClickstreamError> {
    match count_type {
        DataType::UInt32 | DataType::UInt64 => Ok(DataType::UInt64),
        DataType::Float64 => Ok(DataType::Float64),
        other => Err(ClickstreamError::Schema(format!(
            "column {} has unsupported type {}",
            N, other
        ))),
    }
}
