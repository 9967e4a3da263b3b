use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Row, SqlitePool,
};
use tracing::{debug, info, warn};

use crate::{
    aggregate::{AggregateValue, Aggregator, Dimension, GroupKey, ProjectionRow},
    errors::StorageError,
    types::{RecordId, SongRecord, StoredSong},
};

pub const SONGS_TABLE: &str = "songs";

// Column layout other tools read the table with, in declaration order
const SONG_COLUMNS: [&str; 7] = [
    "id",
    "title",
    "artist",
    "genre",
    "duration_seconds",
    "release_year",
    "sentiment",
];

/// Append-only table of validated songs. One writer (the consumer loop) and any
/// number of readers can share it; every write is a single transaction.
#[derive(Clone)]
pub struct SongStore {
    pool: SqlitePool,
}

impl SongStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Builds a pool that does not open the database until the first query, so
    /// nothing is created or touched before startup verification has passed.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = if is_in_memory(database_url) {
            // An in-memory database lives and dies with its connection, so the
            // pool holds exactly one and never recycles it
            if max_connections > 1 {
                warn!(
                    max_connections,
                    "in-memory database only supports a single connection"
                );
            }
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_lazy_with(options)
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_lazy_with(options)
        };

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Discards every stored song. Only meant to run once, at startup, before `initialize`.
    pub async fn reset(&self) -> Result<(), StorageError> {
        sqlx::query("DROP TABLE IF EXISTS songs")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Reset)?;

        info!("Dropped table '{}' for a fresh start", SONGS_TABLE);
        Ok(())
    }

    pub async fn initialize(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS songs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT,
                artist TEXT,
                genre TEXT,
                duration_seconds INTEGER,
                release_year INTEGER,
                sentiment REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let found: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('songs') ORDER BY cid")
                .fetch_all(&self.pool)
                .await?;

        if found != SONG_COLUMNS {
            return Err(StorageError::SchemaMismatch {
                table: SONGS_TABLE,
                expected: SONG_COLUMNS.iter().map(|c| c.to_string()).collect(),
                found,
            });
        }

        info!("Table '{}' is ready", SONGS_TABLE);
        Ok(())
    }

    pub async fn append(&self, record: &SongRecord) -> Result<RecordId, StorageError> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO songs (
                title, artist, genre, duration_seconds, release_year, sentiment
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.title.as_deref())
        .bind(record.artist.as_deref())
        .bind(record.genre.as_deref())
        .bind(record.duration_seconds)
        .bind(record.release_year)
        .bind(record.sentiment)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        debug!(id, "appended song");
        Ok(RecordId(id))
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<StoredSong>, StorageError> {
        let song = sqlx::query_as::<_, StoredSong>(
            r#"
            SELECT id, title, artist, genre, duration_seconds, release_year, sentiment
            FROM songs
            WHERE id = ?
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(song)
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM songs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Groups every stored song by `dimension` and aggregates each group,
    /// ordered by group key ascending.
    pub async fn query_grouped(
        &self,
        dimension: Dimension,
        aggregator: Aggregator,
    ) -> Result<Vec<ProjectionRow>, StorageError> {
        // Both fragments come from fixed enum mappings, never from input
        let column = dimension.column();
        let sql = format!(
            "SELECT {column} AS group_key, {} AS value FROM songs GROUP BY {column} ORDER BY {column} ASC",
            aggregator.sql_expression()
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut projected = Vec::with_capacity(rows.len());
        for row in rows {
            let key = match dimension {
                Dimension::ReleaseYear => GroupKey::ReleaseYear(row.try_get("group_key")?),
                Dimension::Genre => GroupKey::Genre(row.try_get("group_key")?),
            };
            let value = match aggregator {
                Aggregator::Count => AggregateValue::Count(row.try_get("value")?),
                Aggregator::Mean(_) => AggregateValue::Mean(row.try_get("value")?),
            };
            projected.push(ProjectionRow { key, value });
        }

        Ok(projected)
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aggregate::Measure, test_utils::memory_store};

    fn song(genre: Option<&str>, year: i64, sentiment: f64) -> SongRecord {
        SongRecord {
            title: Some("Hotel California".to_string()),
            artist: Some("Eagles".to_string()),
            genre: genre.map(str::to_string),
            duration_seconds: 391,
            release_year: year,
            sentiment,
        }
    }

    #[tokio::test]
    async fn append_assigns_increasing_ids_and_round_trips() {
        let store = memory_store().await;
        store.initialize().await.unwrap();

        let first = song(Some("Rock"), 1976, 0.5);
        let second = SongRecord {
            title: None,
            artist: None,
            genre: None,
            duration_seconds: 0,
            release_year: 0,
            sentiment: -0.75,
        };

        let first_id = store.append(&first).await.unwrap();
        let second_id = store.append(&second).await.unwrap();

        assert!(second_id > first_id);

        let stored = store.get(first_id).await.unwrap().unwrap();
        assert_eq!(stored.record_id(), first_id);
        assert_eq!(stored.song, first);

        let stored = store.get(second_id).await.unwrap().unwrap();
        assert_eq!(stored.song, second);

        assert_eq!(store.get(RecordId(9999)).await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[test]
    fn recognises_in_memory_urls() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://file:songs?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://songs.sqlite"));
        assert!(!is_in_memory("sqlite:///var/lib/songs/memory.sqlite"));
    }

    #[tokio::test]
    async fn in_memory_url_keeps_one_database_for_every_query() {
        let store = SongStore::connect_lazy("sqlite::memory:", 5).unwrap();
        assert_eq!(store.pool().options().get_max_connections(), 1);

        store.initialize().await.unwrap();
        for year in [1971, 1975, 1980, 1991] {
            store.append(&song(None, year, 0.0)).await.unwrap();
        }

        let counts = concurrent_counts(&store).await;
        assert_eq!(counts, vec![4; 8]);
    }

    // Several queries in flight at once, so a pool with more than one
    // connection would spread them over separate databases
    async fn concurrent_counts(store: &SongStore) -> Vec<i64> {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.count().await.unwrap() })
            })
            .collect();

        let mut counts = Vec::with_capacity(handles.len());
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts
    }

    #[tokio::test]
    async fn reset_failure_is_reported_as_a_reset_error() {
        let store = memory_store().await;
        store.pool().close().await;

        assert!(matches!(store.reset().await, Err(StorageError::Reset(_))));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = memory_store().await;
        store.initialize().await.unwrap();

        let id = store.append(&song(Some("Jazz"), 1959, 0.1)).await.unwrap();

        store.initialize().await.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(
            store.get(id).await.unwrap().unwrap().song,
            song(Some("Jazz"), 1959, 0.1)
        );
    }

    #[tokio::test]
    async fn initialize_rejects_a_foreign_table_layout() {
        let store = memory_store().await;
        sqlx::query("CREATE TABLE songs (id INTEGER PRIMARY KEY, name TEXT)")
            .execute(store.pool())
            .await
            .unwrap();

        match store.initialize().await {
            Err(StorageError::SchemaMismatch { found, .. }) => {
                assert_eq!(found, vec!["id".to_string(), "name".to_string()]);
            }
            other => panic!("Expected SchemaMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reset_discards_records_and_restarts_ids() {
        let store = memory_store().await;
        store.initialize().await.unwrap();
        store.append(&song(None, 1980, 0.0)).await.unwrap();
        store.append(&song(None, 1981, 0.0)).await.unwrap();

        store.reset().await.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        let id = store.append(&song(None, 1982, 0.0)).await.unwrap();
        assert_eq!(id, RecordId(1));
    }

    #[tokio::test]
    async fn counts_by_release_year_in_ascending_order() {
        let store = memory_store().await;
        store.initialize().await.unwrap();
        for year in [1980, 1975, 1975] {
            store.append(&song(Some("Rock"), year, 0.0)).await.unwrap();
        }

        let rows = store
            .query_grouped(Dimension::ReleaseYear, Aggregator::Count)
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![
                ProjectionRow {
                    key: GroupKey::ReleaseYear(1975),
                    value: AggregateValue::Count(2)
                },
                ProjectionRow {
                    key: GroupKey::ReleaseYear(1980),
                    value: AggregateValue::Count(1)
                },
            ]
        );
    }

    #[tokio::test]
    async fn release_years_sort_numerically() {
        let store = memory_store().await;
        store.initialize().await.unwrap();
        for year in [2001, 999, 0, 1965] {
            store.append(&song(None, year, 0.0)).await.unwrap();
        }

        let rows = store
            .query_grouped(Dimension::ReleaseYear, Aggregator::Count)
            .await
            .unwrap();
        let years: Vec<GroupKey> = rows.into_iter().map(|r| r.key).collect();

        assert_eq!(
            years,
            vec![
                GroupKey::ReleaseYear(0),
                GroupKey::ReleaseYear(999),
                GroupKey::ReleaseYear(1965),
                GroupKey::ReleaseYear(2001),
            ]
        );
    }

    #[tokio::test]
    async fn averages_sentiment_by_genre_with_missing_genre_first() {
        let store = memory_store().await;
        store.initialize().await.unwrap();
        store.append(&song(Some("Rock"), 1975, 0.5)).await.unwrap();
        store.append(&song(Some("Pop"), 1980, 1.0)).await.unwrap();
        store.append(&song(Some("Rock"), 1991, -0.25)).await.unwrap();
        store.append(&song(None, 2000, 0.25)).await.unwrap();

        let rows = store
            .query_grouped(Dimension::Genre, Aggregator::Mean(Measure::Sentiment))
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![
                ProjectionRow {
                    key: GroupKey::Genre(None),
                    value: AggregateValue::Mean(0.25)
                },
                ProjectionRow {
                    key: GroupKey::Genre(Some("Pop".to_string())),
                    value: AggregateValue::Mean(1.0)
                },
                ProjectionRow {
                    key: GroupKey::Genre(Some("Rock".to_string())),
                    value: AggregateValue::Mean(0.125)
                },
            ]
        );
    }

    #[tokio::test]
    async fn grouped_query_on_empty_table_is_empty() {
        let store = memory_store().await;
        store.initialize().await.unwrap();

        let rows = store
            .query_grouped(
                Dimension::ReleaseYear,
                Aggregator::Mean(Measure::DurationSeconds),
            )
            .await
            .unwrap();

        assert!(rows.is_empty());
    }
}
