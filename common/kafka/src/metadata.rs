use rdkafka::{
    consumer::{BaseConsumer, Consumer},
    error::KafkaError,
    ClientConfig,
};
use tracing::{debug, info};

use crate::config::KafkaConfig;

#[derive(Debug, thiserror::Error)]
pub enum VerifyErr {
    #[error("could not create metadata client: {0}")]
    Client(#[source] KafkaError),
    #[error("broker unreachable at {hosts}: {source}")]
    BrokerUnreachable {
        hosts: String,
        #[source]
        source: KafkaError,
    },
    #[error("topic '{0}' does not exist")]
    TopicMissing(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub name: String,
    pub partitions: usize,
}

/// Asks the cluster for its metadata and checks that `topic` is listed with at
/// least one partition. Blocks for up to the configured metadata timeout, so
/// async callers should run it on the blocking pool.
pub fn verify_topic(config: &KafkaConfig, topic: &str) -> Result<TopicInfo, VerifyErr> {
    let client_config: ClientConfig = config.into();
    let client: BaseConsumer = client_config.create().map_err(VerifyErr::Client)?;

    // Listing every topic rather than asking for this one keeps brokers with
    // topic auto-creation enabled from conjuring it up for us.
    let metadata = client
        .fetch_metadata(None, config.metadata_timeout())
        .map_err(|source| VerifyErr::BrokerUnreachable {
            hosts: config.kafka_hosts.clone(),
            source,
        })?;

    info!(
        "Successfully connected to Kafka brokers. Found {} topics.",
        metadata.topics().len()
    );

    let found = metadata.topics().iter().find(|t| t.name() == topic);
    let Some(found) = found else {
        return Err(VerifyErr::TopicMissing(topic.to_string()));
    };

    if let Some(err) = found.error() {
        debug!(topic, ?err, "topic metadata carries an error");
        return Err(VerifyErr::TopicMissing(topic.to_string()));
    }
    if found.partitions().is_empty() {
        return Err(VerifyErr::TopicMissing(topic.to_string()));
    }

    Ok(TopicInfo {
        name: topic.to_string(),
        partitions: found.partitions().len(),
    })
}
