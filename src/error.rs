//! Error types for clickstream loading and queries

use std::fmt;
use thiserror::Error;

/// Result type alias for clickstream operations
pub type Result<T> = std::result::Result<T, ClickstreamError>;

/// Pipeline stage an error surfaced in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Scan,
    Filter,
    Project,
    Group,
    Sort,
    Materialize,
    StoreRoundTrip,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Scan => "scan",
            Stage::Filter => "filter",
            Stage::Project => "project",
            Stage::Group => "group",
            Stage::Sort => "sort",
            Stage::Materialize => "materialize",
            Stage::StoreRoundTrip => "store round-trip",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ClickstreamError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ClickstreamError>,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Count {value} at row {row} does not fit in u32")]
    CountOverflow { row: usize, value: f64 },

    #[error("Count sum overflowed u64 for group {0}")]
    CountSumOverflow(String),

    #[error("No visits recorded for article {0:?}")]
    NoVisits(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("IO error: {0}")]
    RawIo(#[from] std::io::Error),
}

impl ClickstreamError {
    /// Tag this error with the stage it came from. Already-tagged errors keep
    /// their innermost stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            tagged @ ClickstreamError::Stage { .. } => tagged,
            other => ClickstreamError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error was tagged with, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ClickstreamError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The error with any stage wrapper removed
    pub fn root(&self) -> &ClickstreamError {
        match self {
            ClickstreamError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub trait ResultExt<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T, E: Into<ClickstreamError>> ResultExt<T> for std::result::Result<T, E> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.into().at(stage))
    }
}
