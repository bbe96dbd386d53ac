//! Walk-forward orchestration
//!
//! Days are processed strictly in order. Each emitted day's final layout is
//! carried forward: it seeds the next reduction and is the reference the next
//! layout is aligned onto. Skipped days leave the carried state untouched.
//!
//! Seeds are weighted by how far each entity's prepared features moved since
//! the carried frame, so an unchanged entity is held in place while one whose
//! features changed is free to find its new neighborhood.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use nalgebra::{DMatrix, Vector2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::align::{Aligner, AlignerConfig, Alignment};
use crate::error::{AtlasError, AtlasResult};
use crate::models::{EntityFeatures, Frame, FrameLayout, Layout, OutputRecord, RejectedEntity};
use crate::normalize::{normalize_with_scale, DEFAULT_TARGET_RADIUS};
use crate::preprocess::{PreprocessConfig, Preprocessor, RobustScaler};
use crate::reducer::{Metric, Reducer, ReducerConfig, Seed};
use crate::store::FeatureStore;

/// Returning entities whose seed weight falls below this are re-seeded like
/// newcomers
const RELEASE_WEIGHT: f64 = 0.5;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub preprocess: PreprocessConfig,
    pub reducer: ReducerConfig,
    pub aligner: AlignerConfig,

    /// Canvas radius every frame is normalized to
    pub target_radius: f64,

    /// Frames with fewer valid entities are skipped
    pub min_entities: usize,

    /// Standard deviation (canvas units) of the jitter around the previous
    /// centroid used to seed newcomers
    pub seed_jitter: f64,

    /// Seed each reduction with the previous layout
    pub seeding: bool,

    /// Rigidly align each layout onto the previous one
    pub alignment: bool,

    /// Feature drift, in the reducer metric, at which a returning entity's
    /// seed weight has decayed to `1/e`
    pub seed_tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            reducer: ReducerConfig::default(),
            aligner: AlignerConfig::default(),
            target_radius: DEFAULT_TARGET_RADIUS,
            min_entities: 2,
            seed_jitter: 1.0,
            seeding: true,
            alignment: true,
            seed_tolerance: 0.3,
        }
    }
}

// =============================================================================
// Day Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The store had nothing for the day
    NoData,
    /// The store failed; the day is treated as absent
    StoreError { message: String },
    /// Too few valid entities after validation
    TooFewEntities {
        found: usize,
        required: usize,
        rejected: Vec<RejectedEntity>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DayOutcome {
    Emitted {
        entities: usize,
        rejected: Vec<RejectedEntity>,
        /// `None` on the first frame or with alignment disabled
        alignment: Option<Alignment>,
    },
    Skipped(SkipReason),
}

impl DayOutcome {
    pub fn is_emitted(&self) -> bool {
        matches!(self, DayOutcome::Emitted { .. })
    }
}

/// Calendar days of a lookback window ending at `end`, oldest first
pub fn lookback_dates(end: NaiveDate, days: usize) -> Vec<NaiveDate> {
    (0..days)
        .rev()
        .filter_map(|offset| end.checked_sub_signed(Duration::days(offset as i64)))
        .collect()
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone)]
struct CarriedFrame {
    layout: FrameLayout,
    prepared: DMatrix<f64>,
    /// Normalization factor applied to the reducer output
    scale: f64,
}

/// Sequential, state-carrying driver over a run of days.
pub struct WalkForward {
    config: EngineConfig,
    preprocessor: Preprocessor,
    reducer: Reducer,
    aligner: Aligner,
    jitter: Normal<f64>,
    rng: ChaCha8Rng,
    previous: Option<CarriedFrame>,
    records: Vec<OutputRecord>,
}

impl WalkForward {
    pub fn new(config: EngineConfig) -> AtlasResult<Self> {
        if !(config.target_radius > 0.0) || !config.target_radius.is_finite() {
            return Err(AtlasError::InvalidParameter(format!(
                "target_radius must be positive, got {}",
                config.target_radius
            )));
        }
        if config.min_entities == 0 {
            return Err(AtlasError::InvalidParameter(
                "min_entities must be at least 1".to_string(),
            ));
        }
        if !(config.seed_tolerance > 0.0) {
            return Err(AtlasError::InvalidParameter(format!(
                "seed_tolerance must be positive, got {}",
                config.seed_tolerance
            )));
        }
        let jitter = Normal::new(0.0, config.seed_jitter).map_err(|e| {
            AtlasError::InvalidParameter(format!("seed_jitter {}: {}", config.seed_jitter, e))
        })?;

        Ok(Self {
            preprocessor: Preprocessor::new(config.preprocess.clone()),
            reducer: Reducer::new(config.reducer.clone())?,
            aligner: Aligner::new(config.aligner.clone()),
            jitter,
            rng: ChaCha8Rng::seed_from_u64(config.reducer.random_seed),
            previous: None,
            records: Vec::new(),
            config,
        })
    }

    /// Use a scaler fitted over the whole run (see `ScalingFit::Global`)
    pub fn with_global_scaler(mut self, scaler: RobustScaler) -> Self {
        self.preprocessor = self.preprocessor.with_global_scaler(scaler);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Output accumulated so far, in chronological then frame order
    pub fn records(&self) -> &[OutputRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<OutputRecord> {
        self.records
    }

    /// Final layout of the last emitted day
    pub fn previous(&self) -> Option<&FrameLayout> {
        self.previous.as_ref().map(|carried| &carried.layout)
    }

    /// Pull every date from `store` in order.
    ///
    /// Store failures are logged and the day is treated as absent.
    pub fn run<S: FeatureStore>(&mut self, store: &S, dates: &[NaiveDate]) -> Vec<(NaiveDate, DayOutcome)> {
        let mut outcomes = Vec::with_capacity(dates.len());
        for &date in dates {
            let outcome = match store.fetch_frame(date) {
                Ok(rows) => self.advance(date, rows),
                Err(e) => {
                    tracing::warn!(%date, error = %e, "Feature store failed, skipping day");
                    DayOutcome::Skipped(SkipReason::StoreError {
                        message: e.to_string(),
                    })
                }
            };
            outcomes.push((date, outcome));
        }
        outcomes
    }

    /// Process one already-fetched day.
    pub fn advance(&mut self, date: NaiveDate, rows: Option<Vec<EntityFeatures>>) -> DayOutcome {
        let Some(rows) = rows else {
            tracing::info!(%date, "No frame for day, skipping");
            return DayOutcome::Skipped(SkipReason::NoData);
        };

        let (frame, rejected) = Frame::from_rows(date, rows);
        for entity in &rejected {
            tracing::debug!(%date, entity = %entity.entity_id, reason = ?entity.reason, "Entity excluded");
        }

        if frame.len() < self.config.min_entities {
            tracing::info!(
                %date,
                entities = frame.len(),
                required = self.config.min_entities,
                rejected = rejected.len(),
                "Frame below minimum size, skipping"
            );
            return DayOutcome::Skipped(SkipReason::TooFewEntities {
                found: frame.len(),
                required: self.config.min_entities,
                rejected,
            });
        }

        let entity_ids = frame.entity_ids();
        let prepared = self.preprocessor.prepare(&frame);

        let (layout, alignment, scale) = self.project(date, &entity_ids, &prepared);

        self.emit(&frame, &layout);

        tracing::info!(
            %date,
            entities = frame.len(),
            rejected = rejected.len(),
            basis = %alignment_basis(alignment.as_ref()),
            "Frame emitted"
        );

        self.previous = Some(CarriedFrame {
            layout: FrameLayout {
                date,
                entity_ids,
                layout,
            },
            prepared,
            scale,
        });

        DayOutcome::Emitted {
            entities: frame.len(),
            rejected,
            alignment,
        }
    }

    /// Reduce, normalize and align a frame; also returns the normalization
    /// factor
    fn project(
        &mut self,
        date: NaiveDate,
        entity_ids: &[String],
        prepared: &DMatrix<f64>,
    ) -> (Layout, Option<Alignment>, f64) {
        let seed = match (&self.previous, self.config.seeding) {
            (Some(previous), true) => {
                let seed = seed_layout(
                    entity_ids,
                    prepared,
                    previous,
                    SeedParams {
                        metric: self.config.reducer.metric,
                        tolerance: self.config.seed_tolerance,
                        jitter: &self.jitter,
                    },
                    &mut self.rng,
                );
                let held = seed.weights.iter().filter(|&&w| w > 0.0).count();
                tracing::debug!(%date, held, released = entity_ids.len() - held, "Seed layout built");
                Some(seed)
            }
            _ => None,
        };

        let reduced = match self.reducer.reduce(prepared, seed.as_ref()) {
            Ok(layout) => layout,
            Err(e) => {
                tracing::warn!(%date, error = %e, "Seeded reduction failed, retrying without seed");
                self.reducer.reduce(prepared, None).unwrap_or_else(|e| {
                    tracing::warn!(%date, error = %e, "Reduction failed, placing frame at origin");
                    Layout::origin(prepared.nrows())
                })
            }
        };

        let (normalized, scale) = normalize_with_scale(&reduced, self.config.target_radius);

        let previous = match (&self.previous, self.config.alignment) {
            (Some(previous), true) => &previous.layout,
            _ => return (normalized, None, scale),
        };
        match self.aligner.align(entity_ids, &normalized, previous) {
            Ok((aligned, alignment)) => {
                match &alignment {
                    Alignment::Aligned {
                        transform, points, ..
                    } => tracing::debug!(
                        %date,
                        points,
                        angle = transform.angle_degrees(),
                        "Aligned onto previous frame"
                    ),
                    Alignment::Skipped { shared } => tracing::info!(
                        %date,
                        shared,
                        "Too few shared entities, frame left unaligned"
                    ),
                }
                (aligned, Some(alignment), scale)
            }
            Err(e) => {
                tracing::warn!(%date, error = %e, "Alignment failed, frame left unaligned");
                (normalized, None, scale)
            }
        }
    }

    fn emit(&mut self, frame: &Frame, layout: &Layout) {
        self.records.reserve(frame.len());
        for (entity, point) in frame.entities().iter().zip(layout.iter()) {
            self.records.push(OutputRecord {
                date: frame.date(),
                entity_id: entity.entity_id.clone(),
                x: point.x,
                y: point.y,
                headline: entity.headline.clone(),
                attributes: entity.attributes.clone(),
            });
        }
    }
}

struct SeedParams<'a> {
    metric: Metric,
    tolerance: f64,
    jitter: &'a Normal<f64>,
}

/// Seed for today's frame, in reducer units and centered on the origin.
///
/// A returning entity starts at its previous position with weight
/// `exp(-(drift / tolerance)^2)`, where drift is the metric distance between
/// its previous and current prepared rows. Newcomers, and entities whose
/// weight falls below [`RELEASE_WEIGHT`], start near the centroid with weight
/// zero.
fn seed_layout(
    entity_ids: &[String],
    prepared: &DMatrix<f64>,
    previous: &CarriedFrame,
    params: SeedParams<'_>,
    rng: &mut ChaCha8Rng,
) -> Seed {
    let lookup: HashMap<&str, usize> = previous
        .layout
        .entity_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let centroid = previous.layout.layout.centroid();
    let comparable = previous.prepared.ncols() == prepared.ncols();

    let mut points = Vec::with_capacity(entity_ids.len());
    let mut weights = Vec::with_capacity(entity_ids.len());
    for (i, id) in entity_ids.iter().enumerate() {
        let held = lookup.get(id.as_str()).filter(|_| comparable).and_then(|&j| {
            let current: Vec<f64> = prepared.row(i).iter().copied().collect();
            let before: Vec<f64> = previous.prepared.row(j).iter().copied().collect();
            let drift = params.metric.distance(&current, &before);
            let weight = (-(drift / params.tolerance).powi(2)).exp();
            (weight >= RELEASE_WEIGHT).then(|| (previous.layout.layout.point(j) - centroid, weight))
        });
        let (offset, weight) = held.unwrap_or_else(|| {
            let offset = Vector2::new(params.jitter.sample(rng), params.jitter.sample(rng));
            (offset, 0.0)
        });
        points.push(offset / previous.scale);
        weights.push(weight);
    }

    Seed {
        layout: Layout::new(points),
        weights,
    }
}

fn alignment_basis(alignment: Option<&Alignment>) -> String {
    match alignment {
        Some(Alignment::Aligned { basis, .. }) => basis.to_string(),
        Some(Alignment::Skipped { .. }) => "skipped".to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    #[test]
    fn test_lookback_dates_oldest_first() {
        let dates = lookback_dates(day(20), 20);
        assert_eq!(dates.len(), 20);
        assert_eq!(dates[0], day(1));
        assert_eq!(dates[19], day(20));
        assert!(lookback_dates(day(20), 0).is_empty());
    }

    #[test]
    fn test_invalid_engine_config() {
        let config = EngineConfig {
            target_radius: 0.0,
            ..Default::default()
        };
        assert!(WalkForward::new(config).is_err());

        let config = EngineConfig {
            seed_jitter: -1.0,
            ..Default::default()
        };
        assert!(WalkForward::new(config).is_err());
    }

    #[test]
    fn test_missing_day_is_skipped() {
        let mut engine = WalkForward::new(EngineConfig::default()).unwrap();
        let outcome = engine.advance(day(1), None);
        assert_eq!(outcome, DayOutcome::Skipped(SkipReason::NoData));
        assert!(engine.records().is_empty());
        assert!(engine.previous().is_none());
    }

    #[test]
    fn test_two_entity_frame_sits_at_origin() {
        let mut engine = WalkForward::new(EngineConfig::default()).unwrap();
        let rows = vec![
            EntityFeatures::new("AAPL", vec![1.0, 0.0, 0.5]),
            EntityFeatures::new("MSFT", vec![0.0, 1.0, 0.5]),
        ];
        assert!(engine.advance(day(1), Some(rows)).is_emitted());
        assert_eq!(engine.records().len(), 2);
        assert!(engine.records().iter().all(|r| r.x == 0.0 && r.y == 0.0));
    }

    fn carried(prepared: DMatrix<f64>) -> CarriedFrame {
        CarriedFrame {
            layout: FrameLayout {
                date: day(1),
                entity_ids: vec!["A".into(), "B".into(), "C".into()],
                layout: Layout::from_xy(&[(10.0, 0.0), (-10.0, 40.0), (0.0, -40.0)]),
            },
            prepared,
            scale: 2.0,
        }
    }

    fn seed_for(ids: &[&str], prepared: &DMatrix<f64>, previous: &CarriedFrame) -> Seed {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let jitter = Normal::new(0.0, 1.0).unwrap();
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let params = SeedParams {
            metric: Metric::Cosine,
            tolerance: 0.3,
            jitter: &jitter,
        };
        seed_layout(&ids, prepared, previous, params, &mut rng)
    }

    #[test]
    fn test_seed_layout_weights_by_feature_drift() {
        let previous = carried(DMatrix::identity(3, 3));
        #[rustfmt::skip]
        let today = DMatrix::from_row_slice(4, 3, &[
            0.0, 1.0, 0.0, // B unchanged
            0.5, 0.5, 0.5, // NEW
            1.0, 0.2, 0.0, // A drifted a little
            1.0, 0.0, 0.0, // C now looks like A
        ]);
        let seed = seed_for(&["B", "NEW", "A", "C"], &today, &previous);

        // Positions come back in reducer units around the previous centroid
        assert_eq!(seed.layout.point(0), Vector2::new(-5.0, 20.0));
        assert_eq!(seed.weights[0], 1.0);
        assert_eq!(seed.layout.point(2), Vector2::new(5.0, 0.0));
        assert!(seed.weights[2] > 0.99 && seed.weights[2] < 1.0);

        // Newcomers and entities that changed neighborhood start free near the centroid
        for i in [1, 3] {
            assert_eq!(seed.weights[i], 0.0);
            assert!(seed.layout.point(i).norm() < 5.0);
        }
    }

    #[test]
    fn test_seed_layout_releases_everything_when_dimensions_change() {
        let previous = carried(DMatrix::identity(3, 3));
        let today = DMatrix::from_element(2, 4, 1.0);
        let seed = seed_for(&["A", "B"], &today, &previous);
        assert_eq!(seed.weights, vec![0.0, 0.0]);
    }

    #[test]
    fn test_invalid_seed_tolerance() {
        let config = EngineConfig {
            seed_tolerance: 0.0,
            ..Default::default()
        };
        assert!(WalkForward::new(config).is_err());
    }

    #[test]
    fn test_engine_config_deserializes_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"target_radius": 100.0, "reducer": {"n_neighbors": 15}}"#).unwrap();
        assert_eq!(config.target_radius, 100.0);
        assert_eq!(config.reducer.n_neighbors, 15);
        assert_eq!(config.reducer.min_dist, 0.1);
        assert_eq!(config.min_entities, 2);
        assert!(config.seeding && config.alignment);
        assert_eq!(config.seed_tolerance, 0.3);
        assert_eq!(config.reducer.seed_pull, 0.2);
    }
}
