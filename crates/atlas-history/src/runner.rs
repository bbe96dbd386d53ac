//! Cancellable day loop feeding the walk-forward engine

use std::sync::Arc;
use std::time::Instant;

use atlas_core::{
    DayOutcome, EngineConfig, EntityFeatures, Frame, OutputRecord, RobustScaler, ScalingFit,
    SkipReason, WalkForward,
};
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::cache::FrameCache;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::source::FrameSource;

/// What a run produced. `records` is always a valid prefix of the full
/// history, including when the run was cancelled.
#[derive(Debug)]
pub struct RunReport {
    pub records: Vec<OutputRecord>,
    pub emitted: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

pub struct HistoryRunner {
    source: FrameSource,
    cache: FrameCache,
    retry: RetryPolicy,
    engine: EngineConfig,
}

impl HistoryRunner {
    pub fn new(source: FrameSource, cache: FrameCache, retry: RetryPolicy, engine: EngineConfig) -> Self {
        Self {
            source,
            cache,
            retry,
            engine,
        }
    }

    /// Fetch a day through the cache, retrying transient failures
    async fn frame(&self, date: NaiveDate) -> Result<Option<Vec<EntityFeatures>>> {
        if let Some(cached) = self.cache.get(date).await {
            tracing::debug!(%date, "Frame cache hit");
            return Ok(cached.map(|rows| rows.as_ref().clone()));
        }

        let rows = self
            .retry
            .run(date, || self.source.fetch_frame(date))
            .await?;
        self.cache.insert(date, rows.clone().map(Arc::new)).await;
        Ok(rows)
    }

    /// Fit one scaler over every frame in the window before the walk starts
    async fn prefit_scaler(&self, dates: &[NaiveDate], cancel: &CancellationToken) -> Option<RobustScaler> {
        let mut frames = Vec::new();
        for &date in dates {
            if cancel.is_cancelled() {
                return None;
            }
            match self.frame(date).await {
                Ok(Some(rows)) => frames.push(Frame::from_rows(date, rows).0),
                Ok(None) => {}
                Err(e) => tracing::warn!(%date, error = %e, "Prefit fetch failed, leaving day out"),
            }
        }
        let scaler = RobustScaler::fit_frames(&frames);
        tracing::info!(
            frames = frames.len(),
            fitted = scaler.is_some(),
            "Global scaler prefit"
        );
        scaler
    }

    pub async fn run(&self, dates: &[NaiveDate], cancel: &CancellationToken) -> Result<RunReport> {
        let mut engine = WalkForward::new(self.engine.clone())?;

        if self.engine.preprocess.scaling == ScalingFit::Global {
            match self.prefit_scaler(dates, cancel).await {
                Some(scaler) => engine = engine.with_global_scaler(scaler),
                None => tracing::warn!("No global scaler fitted, falling back to per-frame scaling"),
            }
        }

        let mut emitted = 0;
        let mut skipped = 0;
        let mut cancelled = false;

        for &date in dates {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let started = Instant::now();
            let fetched = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                fetched = self.frame(date) => fetched,
            };

            let outcome = match fetched {
                Ok(rows) => {
                    // Reduction is CPU-bound; keep it off the async workers
                    let (returned, outcome) = tokio::task::spawn_blocking(move || {
                        let outcome = engine.advance(date, rows);
                        (engine, outcome)
                    })
                    .await?;
                    engine = returned;
                    outcome
                }
                Err(e) => {
                    tracing::warn!(%date, error = %e, "Fetch failed, treating day as absent");
                    DayOutcome::Skipped(SkipReason::StoreError {
                        message: e.to_string(),
                    })
                }
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                DayOutcome::Emitted { entities, .. } => {
                    emitted += 1;
                    tracing::debug!(%date, entities, duration_ms, "Day processed");
                }
                DayOutcome::Skipped(reason) => {
                    skipped += 1;
                    tracing::debug!(%date, ?reason, duration_ms, "Day skipped");
                }
            }
        }

        if cancelled {
            tracing::warn!(emitted, skipped, "Run cancelled, keeping completed days");
        }

        let stats = self.cache.stats();
        tracing::debug!(
            cached_frames = stats.entry_count,
            weighted_size = stats.weighted_size,
            "Frame cache"
        );

        Ok(RunReport {
            records: engine.into_records(),
            emitted,
            skipped,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, RetryConfig};
    use atlas_core::InMemoryFeatureStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    fn rows(shift: f64) -> Vec<EntityFeatures> {
        (0..12)
            .map(|i| {
                let group = (i % 3) as f64;
                let vector = vec![
                    1.0 + group * 4.0 + shift,
                    0.5 + (i as f64) * 0.1,
                    2.0 - group * 3.0,
                    0.3 * (i as f64).sin() + 1.0,
                ];
                EntityFeatures::new(format!("T{i:02}"), vector).with_attribute("volume", 1000.0 + i as f64)
            })
            .collect()
    }

    fn runner(store: InMemoryFeatureStore, engine: EngineConfig) -> HistoryRunner {
        HistoryRunner::new(
            FrameSource::Snapshot(store),
            FrameCache::new(&CacheConfig::default()),
            RetryPolicy::new(&RetryConfig::default()),
            engine,
        )
    }

    fn store() -> InMemoryFeatureStore {
        InMemoryFeatureStore::new()
            .with_frame(day(1), rows(0.0))
            .with_frame(day(3), rows(0.2))
            .with_frame(day(4), rows(0.4))
    }

    #[tokio::test]
    async fn test_run_skips_missing_days() {
        let dates = atlas_core::lookback_dates(day(4), 4);
        let report = runner(store(), EngineConfig::default())
            .run(&dates, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.emitted, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.records.len(), 36);
        assert!(report.records.iter().all(|r| r.date != day(2)));
        assert!(report.records.windows(2).all(|w| w[0].date <= w[1].date));
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_empty_prefix() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = runner(store(), EngineConfig::default())
            .run(&[day(1), day(3), day(4)], &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.emitted, 0);
        assert!(report.records.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_matches_synchronous_engine() {
        let dates = atlas_core::lookback_dates(day(4), 4);
        let report = runner(store(), EngineConfig::default())
            .run(&dates, &CancellationToken::new())
            .await
            .unwrap();

        let mut engine = WalkForward::new(EngineConfig::default()).unwrap();
        engine.run(&store(), &dates);
        assert_eq!(report.records, engine.into_records());
    }

    #[tokio::test]
    async fn test_global_scaling_prefit() {
        let mut engine = EngineConfig::default();
        engine.preprocess.scaling = ScalingFit::Global;

        let runner = runner(store(), engine);
        let report = runner
            .run(&[day(1), day(3), day(4)], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.emitted, 3);
        assert!(report.records.iter().all(|r| r.x.is_finite() && r.y.is_finite()));
        // Prefit and walk share the cache
        assert!(runner.cache.get(day(1)).await.is_some());
    }
}
