use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::aggregate::Projection;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Receives the freshly recomputed projections after every stored record.
/// Turning them into charts or files is up to the implementation.
#[async_trait]
pub trait RenderSink: Send + Sync {
    async fn render(&self, projections: &[Projection]) -> Result<(), RenderError>;
}

pub struct LogSink;

#[async_trait]
impl RenderSink for LogSink {
    async fn render(&self, projections: &[Projection]) -> Result<(), RenderError> {
        for projection in projections {
            let rows = serde_json::to_string(&projection.rows)?;
            info!(
                projection = %projection.spec,
                groups = projection.rows.len(),
                %rows,
                "projection updated"
            );
        }
        Ok(())
    }
}

/// Writes the latest projections to a json file. The file is replaced by
/// rename, so readers see either the previous snapshot or the new one.
pub struct JsonSnapshotSink {
    path: PathBuf,
}

impl JsonSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RenderSink for JsonSnapshotSink {
    async fn render(&self, projections: &[Projection]) -> Result<(), RenderError> {
        let body = serde_json::to_vec_pretty(projections)?;

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let io_err = |source| RenderError::Io {
            path: self.path.display().to_string(),
            source,
        };
        tokio::fs::write(&staging, body).await.map_err(io_err)?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(io_err)?;

        Ok(())
    }
}
