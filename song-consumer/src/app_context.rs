use std::sync::Arc;

use tracing::info;

use crate::{
    aggregate::AggregateEngine,
    config::Config,
    errors::StorageError,
    sink::{JsonSnapshotSink, LogSink, RenderSink},
    store::SongStore,
};

/// Everything the consumer loop works against, built once at startup.
pub struct AppContext {
    pub store: SongStore,
    pub engine: AggregateEngine,
    pub sink: Arc<dyn RenderSink>,
    pub reset_store_on_start: bool,
}

impl AppContext {
    pub fn new(
        store: SongStore,
        engine: AggregateEngine,
        sink: Arc<dyn RenderSink>,
        reset_store_on_start: bool,
    ) -> Self {
        Self {
            store,
            engine,
            sink,
            reset_store_on_start,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, StorageError> {
        let store = SongStore::connect_lazy(&config.database_url, config.max_sqlite_connections)?;
        let engine = AggregateEngine::new(config.tracked_projections.0.clone());

        let sink: Arc<dyn RenderSink> = match &config.projection_snapshot_path {
            Some(path) => Arc::new(JsonSnapshotSink::new(path)),
            None => Arc::new(LogSink),
        };

        Ok(Self::new(store, engine, sink, config.reset_store_on_start))
    }

    /// Optionally wipes the store, then makes sure the table exists.
    pub async fn prepare_store(&self) -> Result<(), StorageError> {
        if self.reset_store_on_start {
            info!("Deleting any prior songs for a fresh start");
            self.store.reset().await?;
        }
        self.store.initialize().await
    }
}
