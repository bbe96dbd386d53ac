use std::path::Path;

use atlas_core::{EntityFeatures, FeatureStore, InMemoryFeatureStore};
use chrono::NaiveDate;

use crate::db::FeatureRepository;
use crate::error::{HistoryError, Result};

/// Where the runner pulls daily frames from
pub enum FrameSource {
    Clickhouse(FeatureRepository),
    Snapshot(InMemoryFeatureStore),
}

impl FrameSource {
    /// Load a `{"frames": {"YYYY-MM-DD": [...]}}` snapshot file
    pub async fn load_snapshot(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HistoryError::Snapshot(format!("{}: {}", path.display(), e)))?;
        let store: InMemoryFeatureStore = serde_json::from_str(&raw)
            .map_err(|e| HistoryError::Snapshot(format!("{}: {}", path.display(), e)))?;

        tracing::info!(path = %path.display(), days = store.len(), "Loaded snapshot");
        Ok(FrameSource::Snapshot(store))
    }

    pub async fn fetch_frame(&self, date: NaiveDate) -> Result<Option<Vec<EntityFeatures>>> {
        match self {
            FrameSource::Clickhouse(repo) => repo.fetch_frame(date).await,
            FrameSource::Snapshot(store) => Ok(store.fetch_frame(date)?),
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        match self {
            FrameSource::Clickhouse(repo) => repo.health_check().await,
            FrameSource::Snapshot(_) => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameSource::Clickhouse(_) => "clickhouse",
            FrameSource::Snapshot(_) => "snapshot",
        }
    }
}
