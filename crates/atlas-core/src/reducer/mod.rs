//! Neighborhood-preserving reduction of a frame to 2D
//!
//! A native UMAP: exact kNN graph, fuzzy simplicial set, fitted similarity
//! curve and stochastic gradient layout. An optional seed layout replaces the
//! default initialization. A seeded run is a short, low-rate refinement that
//! keeps pulling each point back towards its seed in proportion to its weight.

mod curve;
mod graph;
mod init;
mod optimize;

pub use curve::find_ab_params;

use nalgebra::{DMatrix, Vector2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, AtlasResult};
use crate::models::Layout;
use optimize::{Anchor, LayoutParams};

/// Below this many entities every point is placed at the origin
pub const MIN_VIABLE_ENTITIES: usize = 3;
const MIN_NEIGHBORS: usize = 2;
const LARGE_GRAPH: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
}

/// Starting layout used when no seed is supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    #[default]
    Spectral,
    Random,
}

/// Starting positions for a seeded reduction, index-aligned with the rows
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub layout: Layout,
    /// Pull strength per point in `[0, 1]`; zero leaves a point free
    pub weights: Vec<f64>,
}

impl Seed {
    /// Every point pulled at full strength
    pub fn uniform(layout: Layout) -> Self {
        let weights = vec![1.0; layout.len()];
        Self { layout, weights }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    /// Upper bound on the neighborhood size; clamped to N - 1 per frame
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub metric: Metric,
    /// Defaults to 500, or 200 above 10k entities
    pub n_epochs: Option<usize>,
    pub learning_rate: f64,
    pub negative_sample_rate: usize,
    pub repulsion_strength: f64,
    pub init: InitStrategy,
    /// Epochs of a seeded refinement
    pub seeded_epochs: usize,
    /// Initial learning rate of a seeded refinement
    pub seeded_learning_rate: f64,
    /// Share of the remaining distance to its seed a full-weight point is
    /// pulled back every epoch
    pub seed_pull: f64,
    pub random_seed: u64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 30,
            min_dist: 0.1,
            spread: 1.0,
            metric: Metric::Cosine,
            n_epochs: None,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            repulsion_strength: 1.0,
            init: InitStrategy::Spectral,
            seeded_epochs: 200,
            seeded_learning_rate: 0.2,
            seed_pull: 0.2,
            random_seed: 42,
        }
    }
}

impl ReducerConfig {
    pub fn validate(&self) -> AtlasResult<()> {
        if self.n_neighbors < MIN_NEIGHBORS {
            return Err(AtlasError::InvalidParameter(format!(
                "n_neighbors must be at least {MIN_NEIGHBORS}, got {}",
                self.n_neighbors
            )));
        }
        if !(self.spread > 0.0) {
            return Err(AtlasError::InvalidParameter(format!(
                "spread must be positive, got {}",
                self.spread
            )));
        }
        if !(0.0..=self.spread).contains(&self.min_dist) {
            return Err(AtlasError::InvalidParameter(format!(
                "min_dist must lie in [0, spread], got {}",
                self.min_dist
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(AtlasError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.n_epochs == Some(0) || self.seeded_epochs == 0 {
            return Err(AtlasError::InvalidParameter("n_epochs must be positive".to_string()));
        }
        if !(self.seeded_learning_rate > 0.0) {
            return Err(AtlasError::InvalidParameter(format!(
                "seeded_learning_rate must be positive, got {}",
                self.seeded_learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.seed_pull) {
            return Err(AtlasError::InvalidParameter(format!(
                "seed_pull must lie in [0, 1], got {}",
                self.seed_pull
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Reducer
// =============================================================================

#[derive(Debug, Clone)]
pub struct Reducer {
    config: ReducerConfig,
    a: f64,
    b: f64,
}

impl Reducer {
    pub fn new(config: ReducerConfig) -> AtlasResult<Self> {
        config.validate()?;
        let (a, b) = find_ab_params(config.spread, config.min_dist);
        Ok(Self { config, a, b })
    }

    pub fn config(&self) -> &ReducerConfig {
        &self.config
    }

    /// Neighborhood size actually used for a frame of `n` entities
    pub fn effective_neighbors(&self, n: usize) -> usize {
        self.config.n_neighbors.min(n.saturating_sub(1))
    }

    /// Project the rows of `data` into 2D.
    ///
    /// `seed`, when given, must be index-aligned with the rows and is taken in
    /// the reducer's own units. A collapsed seed falls back to the default
    /// initialization. Frames that are too small for a neighborhood graph come
    /// back at the origin.
    pub fn reduce(&self, data: &DMatrix<f64>, seed: Option<&Seed>) -> AtlasResult<Layout> {
        let n = data.nrows();
        if let Some(seed) = seed {
            if seed.layout.len() != n || seed.weights.len() != n {
                return Err(AtlasError::InvalidParameter(format!(
                    "seed has {} points and {} weights for {} rows",
                    seed.layout.len(),
                    seed.weights.len(),
                    n
                )));
            }
        }
        let seed = seed.filter(|seed| {
            let collapsed = init::is_collapsed(&seed.layout);
            if collapsed {
                tracing::debug!(entities = n, "Seed layout collapsed, using default init");
            }
            !collapsed
        });

        let k = self.effective_neighbors(n);
        if n < MIN_VIABLE_ENTITIES || k < MIN_NEIGHBORS {
            tracing::debug!(entities = n, neighbors = k, "Frame too small to reduce, placing at origin");
            return Ok(Layout::origin(n));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(AtlasError::Numerical("non-finite value in reducer input".to_string()));
        }

        let rows: Vec<Vec<f64>> = data
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect();
        let knn = graph::nearest_neighbors(&rows, k, self.config.metric);

        let (n_epochs, initial_alpha) = match seed {
            Some(_) => (self.config.seeded_epochs, self.config.seeded_learning_rate),
            None => (
                self.config
                    .n_epochs
                    .unwrap_or(if n > LARGE_GRAPH { 200 } else { 500 }),
                self.config.learning_rate,
            ),
        };

        let mut edges = graph::fuzzy_simplicial_set(&knn, k);
        let max_weight = edges.iter().fold(0.0_f64, |acc, e| acc.max(e.weight));
        edges.retain(|e| e.weight >= max_weight / n_epochs as f64);
        if edges.is_empty() {
            tracing::warn!(entities = n, "Neighbor graph has no edges, placing at origin");
            return Ok(Layout::origin(n));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.random_seed);
        let (mut embedding, anchor) = match seed {
            Some(seed) => {
                let embedding = init::from_seed(&seed.layout, &mut rng);
                let anchor = embedding.clone();
                (embedding, Some((anchor, seed.weights.as_slice())))
            }
            None => {
                let mut embedding = match self.config.init {
                    InitStrategy::Spectral => init::spectral(n, &edges, &mut rng).unwrap_or_else(|| {
                        tracing::debug!(entities = n, "Spectral init unavailable, using random init");
                        init::random(n, &mut rng)
                    }),
                    InitStrategy::Random => init::random(n, &mut rng),
                };
                init::rescale_to_box(&mut embedding);
                (embedding, None)
            }
        };

        let params = LayoutParams {
            a: self.a,
            b: self.b,
            gamma: self.config.repulsion_strength,
            initial_alpha,
            negative_sample_rate: self.config.negative_sample_rate,
            n_epochs,
            seed_pull: self.config.seed_pull,
        };
        let anchor = anchor.as_ref().map(|(positions, weights)| Anchor {
            positions: positions.as_slice(),
            weights: *weights,
        });
        optimize::optimize_layout(&mut embedding, &edges, &params, anchor, &mut rng);

        if embedding.iter().flatten().any(|v| !v.is_finite()) {
            return Err(AtlasError::Numerical("layout optimization diverged".to_string()));
        }

        Ok(embedding.iter().map(|p| Vector2::new(p[0], p[1])).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn two_clusters(per_cluster: usize, dim: usize) -> DMatrix<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        DMatrix::from_fn(2 * per_cluster, dim, |r, c| {
            let cluster = r / per_cluster;
            let base = if c == cluster { 5.0 } else { 0.0 };
            base + rng.gen_range(-0.3..0.3)
        })
    }

    fn fast_config() -> ReducerConfig {
        ReducerConfig {
            n_neighbors: 5,
            n_epochs: Some(200),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ReducerConfig::default();
        assert_eq!(config.n_neighbors, 30);
        assert_eq!(config.min_dist, 0.1);
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.random_seed, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ReducerConfig {
            min_dist: 2.0,
            ..Default::default()
        };
        assert!(matches!(Reducer::new(config), Err(AtlasError::InvalidParameter(_))));
    }

    #[test]
    fn test_neighborhood_clamped_to_frame() {
        let reducer = Reducer::new(ReducerConfig::default()).unwrap();
        assert_eq!(reducer.effective_neighbors(5), 4);
        assert_eq!(reducer.effective_neighbors(200), 30);
        assert_eq!(reducer.effective_neighbors(0), 0);
    }

    #[test]
    fn test_tiny_frames_placed_at_origin() {
        let reducer = Reducer::new(ReducerConfig::default()).unwrap();
        let data = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 3.0, 2.0, 1.0]);
        let layout = reducer.reduce(&data, None).unwrap();
        assert_eq!(layout, Layout::origin(2));
    }

    #[test]
    fn test_seed_length_mismatch() {
        let reducer = Reducer::new(fast_config()).unwrap();
        let data = two_clusters(5, 4);
        let seed = Seed::uniform(Layout::origin(3));
        assert!(matches!(
            reducer.reduce(&data, Some(&seed)),
            Err(AtlasError::InvalidParameter(_))
        ));

        let mut seed = Seed::uniform(Layout::origin(10));
        seed.weights.pop();
        assert!(reducer.reduce(&data, Some(&seed)).is_err());
    }

    #[test]
    fn test_invalid_seed_pull_rejected() {
        let config = ReducerConfig {
            seed_pull: 1.5,
            ..Default::default()
        };
        assert!(Reducer::new(config).is_err());

        let config = ReducerConfig {
            seeded_epochs: 0,
            ..Default::default()
        };
        assert!(Reducer::new(config).is_err());
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let reducer = Reducer::new(fast_config()).unwrap();
        let data = two_clusters(8, 6);
        let first = reducer.reduce(&data, None).unwrap();
        let second = reducer.reduce(&data, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
    }

    #[test]
    fn test_clusters_stay_separated() {
        let reducer = Reducer::new(fast_config()).unwrap();
        let data = two_clusters(10, 5);
        let layout = reducer.reduce(&data, None).unwrap();

        let left = Layout::new(layout.points()[..10].to_vec());
        let right = Layout::new(layout.points()[10..].to_vec());
        let gap = (left.centroid() - right.centroid()).norm();
        let spread = |part: &Layout| {
            let c = part.centroid();
            part.iter().map(|p| (p - c).norm()).sum::<f64>() / part.len() as f64
        };
        assert!(gap > spread(&left) + spread(&right), "gap {gap}");
    }

    #[test]
    fn test_seeded_reduction_runs() {
        let reducer = Reducer::new(fast_config()).unwrap();
        let data = two_clusters(6, 4);
        let seed: Layout = (0..12)
            .map(|i| Vector2::new(i as f64, (i % 3) as f64))
            .collect();
        let layout = reducer.reduce(&data, Some(&Seed::uniform(seed))).unwrap();
        assert_eq!(layout.len(), 12);
        assert!(layout.iter().all(|p| p.x.is_finite() && p.y.is_finite()));
    }

    #[test]
    fn test_reseeding_with_own_layout_barely_moves() {
        let reducer = Reducer::new(fast_config()).unwrap();
        let data = two_clusters(8, 6);
        let first = reducer.reduce(&data, None).unwrap();
        let center = first.centroid();
        let seed: Layout = first.iter().map(|p| p - center).collect();

        let second = reducer.reduce(&data, Some(&Seed::uniform(seed.clone()))).unwrap();
        let shift = second.centroid();
        let radius = seed.iter().map(|p| p.norm()).fold(0.0, f64::max);
        let moved = seed
            .iter()
            .zip(second.iter())
            .map(|(p, q)| (q - shift - p).norm())
            .fold(0.0, f64::max);
        assert!(moved < 0.1 * radius, "moved {moved} of radius {radius}");
    }

    #[test]
    fn test_collapsed_seed_uses_default_init() {
        let reducer = Reducer::new(fast_config()).unwrap();
        let data = two_clusters(6, 4);
        let seeded = reducer.reduce(&data, Some(&Seed::uniform(Layout::origin(12)))).unwrap();
        assert_eq!(seeded, reducer.reduce(&data, None).unwrap());
    }
}
