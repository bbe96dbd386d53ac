use std::sync::Arc;
use std::time::Duration;

use atlas_core::EntityFeatures;
use chrono::NaiveDate;
use moka::future::Cache;

use crate::config::CacheConfig;

/// A fetched day. `None` records that the store had nothing for that date.
pub type CachedFrame = Option<Arc<Vec<EntityFeatures>>>;

/// Frames already fetched this run, so a global scaling prefit and the
/// walk itself hit Clickhouse once per day
#[derive(Clone)]
pub struct FrameCache {
    cache: Cache<NaiveDate, CachedFrame>,
}

impl FrameCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_seconds))
            .build();

        Self { cache }
    }

    /// Outer `None` is a miss; inner `None` is a cached empty day
    pub async fn get(&self, date: NaiveDate) -> Option<CachedFrame> {
        self.cache.get(&date).await
    }

    pub async fn insert(&self, date: NaiveDate, frame: CachedFrame) {
        self.cache.insert(date, frame).await;
    }

    /// Get cache statistics for monitoring
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entry_count: u64,
    pub weighted_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    #[tokio::test]
    async fn test_distinguishes_miss_from_empty_day() {
        let cache = FrameCache::new(&CacheConfig::default());
        let rows = vec![EntityFeatures::new("AAPL", vec![1.0, 0.0])];

        cache.insert(day(1), Some(Arc::new(rows))).await;
        cache.insert(day(2), None).await;

        let hit = cache.get(day(1)).await.unwrap().unwrap();
        assert_eq!(hit[0].entity_id, "AAPL");
        assert!(matches!(cache.get(day(2)).await, Some(None)));
        assert!(cache.get(day(3)).await.is_none());
    }
}
