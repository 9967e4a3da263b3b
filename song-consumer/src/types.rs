use std::fmt;

use serde::Serialize;
use sqlx::FromRow;

/// The untyped payload as it came off the topic, before validation.
pub type RawMessage = serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, FromRow)]
pub struct SongRecord {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub duration_seconds: i64, // Never negative, 0 when the message had nothing usable
    pub release_year: i64,
    pub sentiment: f64, // Nominally in [-1, 1], not enforced
}

/// A record as read back from the store, with the id it was given on insert.
#[derive(Clone, Debug, PartialEq, FromRow)]
pub struct StoredSong {
    pub id: i64,
    #[sqlx(flatten)]
    pub song: SongRecord,
}

impl StoredSong {
    pub fn record_id(&self) -> RecordId {
        RecordId(self.id)
    }
}
