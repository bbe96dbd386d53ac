//! Temporal alignment of consecutive layouts
//!
//! Today's layout is moved rigidly (rotation plus translation, never a
//! mirror or a scale) onto yesterday's using a least-squares fit over the
//! entities both days share. Structurally stable anchor tickers are
//! preferred as the correspondence set when enough of them are present.

use std::collections::{HashMap, HashSet};

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, AtlasResult};
use crate::models::{FrameLayout, Layout};

/// Broad index ETFs and mega caps whose news neighborhoods rarely change
pub const DEFAULT_ANCHORS: [&str; 17] = [
    "SPY", "QQQ", "IWM", "DIA", "AAPL", "MSFT", "NVDA", "GOOGL", "AMZN", "META", "TSLA", "JPM",
    "V", "UNH", "XOM", "AMD", "GME",
];

/// Smallest correspondence set a rotation is fitted on
pub const MIN_CORRESPONDENCE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    pub anchors: Vec<String>,
    pub min_points: usize,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            anchors: DEFAULT_ANCHORS.iter().map(|s| s.to_string()).collect(),
            min_points: MIN_CORRESPONDENCE,
        }
    }
}

// =============================================================================
// Rigid Transform
// =============================================================================

/// `p -> rotation * (p - moving_centroid) + reference_centroid`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: Matrix2<f64>,
    pub moving_centroid: Vector2<f64>,
    pub reference_centroid: Vector2<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix2::identity(),
            moving_centroid: Vector2::zeros(),
            reference_centroid: Vector2::zeros(),
        }
    }

    pub fn apply(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.rotation * (point - self.moving_centroid) + self.reference_centroid
    }

    pub fn apply_layout(&self, layout: &Layout) -> Layout {
        layout.map(|p| self.apply(p))
    }

    pub fn determinant(&self) -> f64 {
        self.rotation.determinant()
    }

    /// Rotation angle in degrees, counter-clockwise
    pub fn angle_degrees(&self) -> f64 {
        self.rotation[(1, 0)].atan2(self.rotation[(0, 0)]).to_degrees()
    }
}

/// Orthogonal Procrustes: the proper rotation and translation that best maps
/// `moving[i]` onto `reference[i]` in the least-squares sense.
pub fn procrustes(moving: &[Vector2<f64>], reference: &[Vector2<f64>]) -> AtlasResult<RigidTransform> {
    if moving.len() != reference.len() {
        return Err(AtlasError::DimensionMismatch {
            expected: reference.len(),
            actual: moving.len(),
        });
    }
    if moving.is_empty() {
        return Err(AtlasError::InsufficientCorrespondence {
            found: 0,
            required: 1,
        });
    }

    let count = moving.len() as f64;
    let moving_centroid = moving.iter().fold(Vector2::zeros(), |acc, p| acc + p) / count;
    let reference_centroid = reference.iter().fold(Vector2::zeros(), |acc, p| acc + p) / count;

    // Cross-covariance of the centered point sets
    let covariance = moving
        .iter()
        .zip(reference)
        .fold(Matrix2::zeros(), |acc: Matrix2<f64>, (p, q)| {
            acc + (p - moving_centroid) * (q - reference_centroid).transpose()
        });

    if covariance.norm() < 1e-12 {
        return Ok(RigidTransform {
            rotation: Matrix2::identity(),
            moving_centroid,
            reference_centroid,
        });
    }

    let svd = covariance.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(AtlasError::Numerical("SVD did not converge".to_string())),
    };

    let mut v = v_t.transpose();
    let mut rotation = v * u.transpose();
    if rotation.determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        v.column_mut(weakest).neg_mut();
        rotation = v * u.transpose();
    }

    Ok(RigidTransform {
        rotation,
        moving_centroid,
        reference_centroid,
    })
}

// =============================================================================
// Aligner
// =============================================================================

/// Which correspondence set a transform was fitted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrespondenceBasis {
    Anchors,
    Overlap,
}

impl std::fmt::Display for CorrespondenceBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrespondenceBasis::Anchors => write!(f, "anchors"),
            CorrespondenceBasis::Overlap => write!(f, "overlap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alignment {
    Aligned {
        transform: RigidTransform,
        basis: CorrespondenceBasis,
        /// Correspondence points the transform was fitted on
        points: usize,
        /// Entities present on both days
        shared: usize,
    },
    /// Too few shared entities; the layout was left as it was
    Skipped { shared: usize },
}

#[derive(Debug, Clone)]
pub struct Aligner {
    config: AlignerConfig,
    anchors: HashSet<String>,
}

impl Aligner {
    pub fn new(config: AlignerConfig) -> Self {
        let anchors = config.anchors.iter().cloned().collect();
        Self { config, anchors }
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    fn min_points(&self) -> usize {
        self.config.min_points.max(1)
    }

    /// Indices into today's entities paired with yesterday's positions, in
    /// today's order. Anchors are used when at least `min_points` of them are
    /// shared, otherwise the whole overlap. `None` when even the overlap is
    /// too small.
    pub fn correspondence(
        &self,
        entity_ids: &[String],
        previous: &FrameLayout,
    ) -> (usize, Option<(CorrespondenceBasis, Vec<(usize, Vector2<f64>)>)>) {
        let lookup: HashMap<&str, usize> = previous
            .entity_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let shared: Vec<(usize, &str, Vector2<f64>)> = entity_ids
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                lookup
                    .get(id.as_str())
                    .map(|&j| (i, id.as_str(), previous.layout.point(j)))
            })
            .collect();
        let overlap = shared.len();

        let anchored: Vec<(usize, Vector2<f64>)> = shared
            .iter()
            .filter(|(_, id, _)| self.anchors.contains(*id))
            .map(|&(i, _, p)| (i, p))
            .collect();

        if anchored.len() >= self.min_points() {
            return (overlap, Some((CorrespondenceBasis::Anchors, anchored)));
        }
        if overlap >= self.min_points() {
            let pairs = shared.into_iter().map(|(i, _, p)| (i, p)).collect();
            return (overlap, Some((CorrespondenceBasis::Overlap, pairs)));
        }
        (overlap, None)
    }

    /// Rigidly move `layout` (index-aligned with `entity_ids`) onto `previous`.
    pub fn align(
        &self,
        entity_ids: &[String],
        layout: &Layout,
        previous: &FrameLayout,
    ) -> AtlasResult<(Layout, Alignment)> {
        if entity_ids.len() != layout.len() {
            return Err(AtlasError::DimensionMismatch {
                expected: entity_ids.len(),
                actual: layout.len(),
            });
        }

        let (shared, (basis, pairs)) = match self.correspondence(entity_ids, previous) {
            (shared, Some(found)) => (shared, found),
            (shared, None) => return Ok((layout.clone(), Alignment::Skipped { shared })),
        };

        let moving: Vec<Vector2<f64>> = pairs.iter().map(|&(i, _)| layout.point(i)).collect();
        let reference: Vec<Vector2<f64>> = pairs.iter().map(|&(_, p)| p).collect();
        let transform = procrustes(&moving, &reference)?;

        Ok((
            transform.apply_layout(layout),
            Alignment::Aligned {
                transform,
                basis,
                points: pairs.len(),
                shared,
            },
        ))
    }
}
