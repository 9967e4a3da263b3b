use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // How long startup verification waits for cluster metadata before giving up on the broker
    #[envconfig(default = "10000")]
    pub kafka_metadata_timeout_ms: u64,
}

impl KafkaConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_metadata_timeout_ms)
    }
}

impl From<&KafkaConfig> for ClientConfig {
    fn from(config: &KafkaConfig) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };
        client_config
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,

    // A fresh group replays the whole topic, which is what rebuilding the store from scratch needs
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Offsets are only ever /stored/ after a message is fully handled; this controls
    // whether librdkafka then commits the stored offsets on its own.
    pub kafka_consumer_auto_commit: bool,

    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: i32,
}

impl ConsumerConfig {
    /// Because the consumer config is so application specific, we
    /// can't set good defaults in the derive macro, so we expose a way
    /// for users to set them here before init'ing their main config struct
    pub fn set_defaults(consumer_group: &str, consumer_topic: &str, auto_commit: bool) {
        if std::env::var("KAFKA_CONSUMER_GROUP").is_err() {
            std::env::set_var("KAFKA_CONSUMER_GROUP", consumer_group);
        };
        if std::env::var("KAFKA_CONSUMER_TOPIC").is_err() {
            std::env::set_var("KAFKA_CONSUMER_TOPIC", consumer_topic);
        };

        if std::env::var("KAFKA_CONSUMER_AUTO_COMMIT").is_err() {
            std::env::set_var("KAFKA_CONSUMER_AUTO_COMMIT", auto_commit.to_string());
        }
    }
}
