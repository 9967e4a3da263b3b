use std::sync::{Arc, Weak};

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};

use crate::config::{ConsumerConfig, KafkaConfig};

#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

/// A single message as pulled off the topic. The payload is copied out of the
/// borrowed librdkafka buffer so the consumer can be polled again right away.
pub struct RawDelivery {
    pub payload: Option<Vec<u8>>,
    pub offset: Offset,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config: ClientConfig = common_config.into();
        client_config
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "enable.auto.commit",
                consumer_config.kafka_consumer_auto_commit.to_string(),
            )
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            );

        // Offsets are stored by hand once a message has been fully handled
        client_config.set("enable.auto.offset.store", "false");

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic.clone(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Waits for the next message. Cancel safe: dropping the future before it
    /// resolves loses nothing, the message stays queued in librdkafka.
    pub async fn recv(&self) -> Result<RawDelivery, KafkaError> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        Ok(RawDelivery {
            payload: message.payload().map(<[u8]>::to_vec),
            offset,
        })
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }
}
