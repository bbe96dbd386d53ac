//! Feature store boundary
//!
//! The engine pulls one day at a time through [`FeatureStore`]. Concrete
//! stores (ClickHouse, JSON snapshots) live with the binaries; the in-memory
//! store here backs tests and offline replays.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AtlasResult;
use crate::models::EntityFeatures;

/// Per-day source of entity feature rows.
///
/// `Ok(None)` means there is no data for the day; a transient failure that
/// survived the adapter's own retries is an `Err`.
pub trait FeatureStore {
    fn fetch_frame(&self, date: NaiveDate) -> AtlasResult<Option<Vec<EntityFeatures>>>;
}

impl<S: FeatureStore + ?Sized> FeatureStore for &S {
    fn fetch_frame(&self, date: NaiveDate) -> AtlasResult<Option<Vec<EntityFeatures>>> {
        (**self).fetch_frame(date)
    }
}

/// Frames keyed by date, deserializable from `{"frames": {"YYYY-MM-DD": [...]}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryFeatureStore {
    #[serde(default)]
    frames: BTreeMap<NaiveDate, Vec<EntityFeatures>>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate, rows: Vec<EntityFeatures>) {
        self.frames.insert(date, rows);
    }

    pub fn with_frame(mut self, date: NaiveDate, rows: Vec<EntityFeatures>) -> Self {
        self.insert(date, rows);
        self
    }

    /// Stored dates, oldest first
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.frames.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn fetch_frame(&self, date: NaiveDate) -> AtlasResult<Option<Vec<EntityFeatures>>> {
        Ok(self.frames.get(&date).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store_round_trip() {
        let d1 = NaiveDate::from_ymd_opt(2025, 10, 2).unwrap();
        let d0 = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let store = InMemoryFeatureStore::new()
            .with_frame(d1, vec![EntityFeatures::new("AAPL", vec![1.0, 0.0])])
            .with_frame(d0, vec![]);

        assert_eq!(store.dates(), vec![d0, d1]);
        assert_eq!(store.fetch_frame(d1).unwrap().unwrap().len(), 1);
        assert!(store.fetch_frame(NaiveDate::from_ymd_opt(2025, 10, 3).unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_store_deserializes_snapshot_shape() {
        let json = r#"{
            "frames": {
                "2025-10-01": [
                    {"ticker": "NVDA", "vector": [0.1, 0.2], "attributes": {"volume": 10.0}},
                    {"entity_id": "AMD", "feature_vector": [0.3, 0.1], "headline": "Chips rally"}
                ]
            }
        }"#;
        let store: InMemoryFeatureStore = serde_json::from_str(json).unwrap();
        let rows = store
            .fetch_frame(NaiveDate::from_ymd_opt(2025, 10, 1).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(rows[0].entity_id, "NVDA");
        assert_eq!(rows[0].attributes["volume"], 10.0);
        assert_eq!(rows[1].headline.as_deref(), Some("Chips rally"));
    }
}
