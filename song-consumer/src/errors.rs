use thiserror::Error;

// Stable process exit codes, one per fatal cause
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_STORE_RESET: i32 = 2;
pub const EXIT_STORAGE: i32 = 3;
pub const EXIT_BROKER_UNREACHABLE: i32 = 11;
pub const EXIT_CONSUMER_CREATION: i32 = 12;
pub const EXIT_TOPIC_MISSING: i32 = 13;
pub const EXIT_TRANSPORT: i32 = 14;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("kafka broker unreachable, is it running? {0}")]
    BrokerUnreachable(String),
    #[error("topic '{0}' does not exist, run the producer first")]
    TopicMissing(String),
    #[error("could not create kafka consumer: {0}")]
    ConsumerCreation(String),
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("received empty payload")]
    EmptyPayload,
    #[error("payload is not valid json: {0}")]
    Undecodable(#[from] serde_json::Error),
    #[error("expected a json object, got {0}")]
    NotAMapping(&'static str),
}

impl ValidationError {
    /// Short label used when counting dropped messages.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::EmptyPayload => "empty",
            ValidationError::Undecodable(_) => "undecodable",
            ValidationError::NotAMapping(_) => "not_a_mapping",
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not discard songs from a previous run: {0}")]
    Reset(#[source] sqlx::Error),
    #[error("table '{table}' exists with columns {found:?}, expected {expected:?}")]
    SchemaMismatch {
        table: &'static str,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("could not store offset: {0}")]
    Offset(#[from] common_kafka::kafka_consumer::OffsetErr),
    #[error("message source closed: {0}")]
    Closed(String),
}

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("startup failed: {0}")]
    Startup(#[from] StartupError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
}

impl ConsumerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ConsumerError::Startup(StartupError::BrokerUnreachable(_)) => EXIT_BROKER_UNREACHABLE,
            ConsumerError::Startup(StartupError::TopicMissing(_)) => EXIT_TOPIC_MISSING,
            ConsumerError::Startup(StartupError::ConsumerCreation(_)) => EXIT_CONSUMER_CREATION,
            ConsumerError::Storage(StorageError::Reset(_)) => EXIT_STORE_RESET,
            ConsumerError::Storage(_) => EXIT_STORAGE,
            ConsumerError::Transport(_) => EXIT_TRANSPORT,
        }
    }
}
