use async_trait::async_trait;
use common_kafka::{
    config::{ConsumerConfig, KafkaConfig},
    kafka_consumer::{Offset, SingleTopicConsumer},
    metadata::{verify_topic, VerifyErr},
};
use rdkafka::{error::KafkaError, types::RDKafkaErrorCode};
use tracing::{info, warn};

use crate::{
    errors::{StartupError, TransportError},
    metrics_consts::RECV_ERRORS,
};

/// One message as delivered by the topic, before any decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub payload: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SourceEvent {
    Message(Delivery),
    /// The source has nothing more to give, ever. Live topics never end.
    EndOfStream,
}

/// Pull-based view of a topic. `next` waits as long as it takes for the next
/// message and must be cancel safe, since the consumer loop races it against
/// shutdown.
#[async_trait]
pub trait MessageSource: Send {
    async fn next(&mut self) -> Result<SourceEvent, TransportError>;

    /// Called once the delivery has been fully handled, stored or dropped,
    /// so its position can be committed.
    async fn complete(&mut self, delivery: &Delivery) -> Result<(), TransportError>;
}

/// Startup side of a topic: checks that it can be consumed, then attaches to it.
#[async_trait]
pub trait TopicConnector: Send + Sync {
    async fn verify(&self) -> Result<(), StartupError>;

    async fn subscribe(&self) -> Result<Box<dyn MessageSource>, StartupError>;
}

pub struct KafkaConnector {
    kafka: KafkaConfig,
    consumer: ConsumerConfig,
}

impl KafkaConnector {
    pub fn new(kafka: KafkaConfig, consumer: ConsumerConfig) -> Self {
        Self { kafka, consumer }
    }
}

#[async_trait]
impl TopicConnector for KafkaConnector {
    async fn verify(&self) -> Result<(), StartupError> {
        let kafka = self.kafka.clone();
        let topic = self.consumer.kafka_consumer_topic.clone();

        // Metadata fetches block for up to the configured timeout
        let verified = tokio::task::spawn_blocking(move || verify_topic(&kafka, &topic))
            .await
            .map_err(|e| StartupError::BrokerUnreachable(format!("verification task failed: {e}")))?;

        match verified {
            Ok(topic) => {
                info!(
                    topic = %topic.name,
                    partitions = topic.partitions,
                    "Kafka topic is ready"
                );
                Ok(())
            }
            Err(VerifyErr::TopicMissing(topic)) => Err(StartupError::TopicMissing(topic)),
            Err(e @ VerifyErr::BrokerUnreachable { .. }) => {
                Err(StartupError::BrokerUnreachable(e.to_string()))
            }
            Err(e @ VerifyErr::Client(_)) => Err(StartupError::BrokerUnreachable(e.to_string())),
        }
    }

    async fn subscribe(&self) -> Result<Box<dyn MessageSource>, StartupError> {
        let consumer = SingleTopicConsumer::new(&self.kafka, &self.consumer)
            .map_err(|e| StartupError::ConsumerCreation(e.to_string()))?;

        info!(
            topic = %self.consumer.kafka_consumer_topic,
            group_id = %self.consumer.kafka_consumer_group,
            "Kafka consumer subscribed"
        );

        Ok(Box::new(KafkaSource {
            consumer,
            pending: None,
        }))
    }
}

pub struct KafkaSource {
    consumer: SingleTopicConsumer,
    // Messages are handled one at a time, so at most one offset is waiting to be stored
    pending: Option<Offset>,
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn next(&mut self) -> Result<SourceEvent, TransportError> {
        loop {
            match self.consumer.recv().await {
                Ok(received) => {
                    let delivery = Delivery {
                        payload: received.payload,
                        partition: received.offset.partition(),
                        offset: received.offset.offset(),
                    };
                    self.pending = Some(received.offset);
                    return Ok(SourceEvent::Message(delivery));
                }
                Err(e) if is_unrecoverable(&e) => {
                    return Err(TransportError::Kafka(e));
                }
                Err(e) => {
                    // librdkafka reconnects on its own for everything else
                    metrics::counter!(RECV_ERRORS).increment(1);
                    warn!(error = %e, topic = self.consumer.topic(), "kafka recv error");
                }
            }
        }
    }

    async fn complete(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        let Some(offset) = self.pending.take() else {
            return Ok(());
        };

        if offset.partition() != delivery.partition || offset.offset() != delivery.offset {
            warn!(
                partition = delivery.partition,
                offset = delivery.offset,
                "completed delivery is not the pending one, skipping offset store"
            );
            return Ok(());
        }

        offset.store()?;
        Ok(())
    }
}

fn is_unrecoverable(error: &KafkaError) -> bool {
    if matches!(error, KafkaError::MessageConsumptionFatal(_)) {
        return true;
    }
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::Fatal) | Some(RDKafkaErrorCode::AllBrokersDown)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_and_all_brokers_down_stop_the_source() {
        assert!(is_unrecoverable(&KafkaError::MessageConsumption(
            RDKafkaErrorCode::AllBrokersDown
        )));
        assert!(is_unrecoverable(&KafkaError::MessageConsumption(
            RDKafkaErrorCode::Fatal
        )));
        assert!(!is_unrecoverable(&KafkaError::MessageConsumption(
            RDKafkaErrorCode::BrokerTransportFailure
        )));
        assert!(is_unrecoverable(&KafkaError::MessageConsumptionFatal(
            RDKafkaErrorCode::BrokerTransportFailure
        )));
        assert!(!is_unrecoverable(&KafkaError::NoMessageReceived));
    }
}
