use std::str::FromStr;

use common_kafka::SONG_ATTRIBUTES_TOPIC;
use envconfig::Envconfig;

use crate::aggregate::{ParseProjectionError, ProjectionSpec};

pub use common_kafka::config::{ConsumerConfig, KafkaConfig};

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(default = "sqlite://songs.sqlite")]
    pub database_url: String,

    #[envconfig(default = "5")]
    pub max_sqlite_connections: u32,

    // Drop everything stored by a previous run before consuming
    #[envconfig(default = "true")]
    pub reset_store_on_start: bool,

    #[envconfig(default = "release_year:count,release_year:mean_sentiment")]
    pub tracked_projections: ProjectionList,

    // When set, the latest projections are written here as json after every stored song
    pub projection_snapshot_path: Option<String>,

    // When set, prometheus metrics are served on this address
    pub metrics_bind: Option<String>,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        ConsumerConfig::set_defaults("song-attributes-consumer", SONG_ATTRIBUTES_TOPIC, true);
        Self::init_from_env()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectionList(pub Vec<ProjectionSpec>);

impl FromStr for ProjectionList {
    type Err = ParseProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let specs = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(ProjectionSpec::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ProjectionList(specs))
    }
}
