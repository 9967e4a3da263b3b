pub mod config;
pub mod kafka_consumer;
pub mod metadata;

pub const SONG_ATTRIBUTES_TOPIC: &str = "song_attributes";
