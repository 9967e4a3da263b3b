use std::{fmt, str::FromStr, time::Instant};

use serde::Serialize;
use tracing::debug;

use crate::{errors::StorageError, metrics_consts::PROJECTION_RECOMPUTE_TIME, store::SongStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    ReleaseYear,
    Genre,
}

impl Dimension {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Dimension::ReleaseYear => "release_year",
            Dimension::Genre => "genre",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Sentiment,
    DurationSeconds,
}

impl Measure {
    fn column(self) -> &'static str {
        match self {
            Measure::Sentiment => "sentiment",
            Measure::DurationSeconds => "duration_seconds",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    Count,
    Mean(Measure),
}

impl Aggregator {
    pub(crate) fn sql_expression(self) -> String {
        match self {
            Aggregator::Count => "COUNT(*)".to_string(),
            Aggregator::Mean(measure) => format!("AVG({})", measure.column()),
        }
    }
}

/// Selects what a projection groups by and how each group is summarised.
/// Parses from and prints as `<dimension>:<aggregator>`, e.g. `release_year:count`
/// or `genre:mean_sentiment`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ProjectionSpec {
    pub dimension: Dimension,
    pub aggregator: Aggregator,
}

impl ProjectionSpec {
    pub fn new(dimension: Dimension, aggregator: Aggregator) -> Self {
        Self {
            dimension,
            aggregator,
        }
    }
}

impl fmt::Display for ProjectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let aggregator = match self.aggregator {
            Aggregator::Count => "count".to_string(),
            Aggregator::Mean(measure) => format!("mean_{}", measure.column()),
        };
        write!(f, "{}:{}", self.dimension.column(), aggregator)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseProjectionError {
    #[error("expected <dimension>:<aggregator>, got '{0}'")]
    Malformed(String),
    #[error("unknown dimension '{0}'")]
    UnknownDimension(String),
    #[error("unknown aggregator '{0}'")]
    UnknownAggregator(String),
}

impl FromStr for ProjectionSpec {
    type Err = ParseProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((dimension, aggregator)) = s.trim().split_once(':') else {
            return Err(ParseProjectionError::Malformed(s.to_string()));
        };

        let dimension = match dimension.trim().to_lowercase().as_str() {
            "release_year" => Dimension::ReleaseYear,
            "genre" => Dimension::Genre,
            other => return Err(ParseProjectionError::UnknownDimension(other.to_string())),
        };

        let aggregator = match aggregator.trim().to_lowercase().as_str() {
            "count" => Aggregator::Count,
            "mean_sentiment" => Aggregator::Mean(Measure::Sentiment),
            "mean_duration_seconds" => Aggregator::Mean(Measure::DurationSeconds),
            other => return Err(ParseProjectionError::UnknownAggregator(other.to_string())),
        };

        Ok(ProjectionSpec::new(dimension, aggregator))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupKey {
    ReleaseYear(i64),
    Genre(Option<String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AggregateValue {
    Count(i64),
    Mean(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectionRow {
    pub key: GroupKey,
    pub value: AggregateValue,
}

/// A grouped summary of the store, as of the moment it was computed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Projection {
    pub spec: ProjectionSpec,
    pub rows: Vec<ProjectionRow>,
}

/// Computes one projection from scratch against the store's current contents.
pub async fn compute(store: &SongStore, spec: ProjectionSpec) -> Result<Projection, StorageError> {
    let rows = store.query_grouped(spec.dimension, spec.aggregator).await?;
    Ok(Projection { spec, rows })
}

/// Holds the projections the consumer keeps up to date. Stateless apart from
/// that list; every recompute reads the store afresh.
#[derive(Clone, Debug)]
pub struct AggregateEngine {
    tracked: Vec<ProjectionSpec>,
}

impl AggregateEngine {
    pub fn new(tracked: Vec<ProjectionSpec>) -> Self {
        Self { tracked }
    }

    pub fn tracked(&self) -> &[ProjectionSpec] {
        &self.tracked
    }

    pub async fn recompute_all(&self, store: &SongStore) -> Result<Vec<Projection>, StorageError> {
        let start = Instant::now();

        let mut projections = Vec::with_capacity(self.tracked.len());
        for spec in &self.tracked {
            let projection = compute(store, *spec).await?;
            debug!(%spec, groups = projection.rows.len(), "recomputed projection");
            projections.push(projection);
        }

        metrics::histogram!(PROJECTION_RECOMPUTE_TIME).record(start.elapsed().as_millis() as f64);
        Ok(projections)
    }
}
