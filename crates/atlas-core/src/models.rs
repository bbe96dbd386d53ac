//! Data model for the walk-forward engine
//!
//! Frames are built from raw feature-store rows, layouts are index-aligned
//! with a frame's entity list, and output records are the flattened artifact
//! rows the visualizer consumes.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use nalgebra::{DMatrix, Vector2};
use serde::{Deserialize, Serialize};

// =============================================================================
// Raw Entity Rows
// =============================================================================

/// One entity's features for one day, as handed over by a feature store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFeatures {
    /// Ticker symbol (e.g., "NVDA", "SPY")
    #[serde(alias = "ticker")]
    pub entity_id: String,

    /// News-derived embedding, averaged over the day's articles
    #[serde(alias = "vector")]
    pub feature_vector: Vec<f64>,

    /// Scalar side attributes (volume, sentiment, market_cap, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,

    /// Latest headline mentioning the entity, passed through to the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
}

impl EntityFeatures {
    pub fn new(entity_id: impl Into<String>, feature_vector: Vec<f64>) -> Self {
        Self {
            entity_id: entity_id.into(),
            feature_vector,
            attributes: BTreeMap::new(),
            headline: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: f64) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_headline(mut self, headline: impl Into<String>) -> Self {
        self.headline = Some(headline.into());
        self
    }

    /// Returns the reason this row can never enter a frame, if any.
    fn vector_defect(&self) -> Option<RejectReason> {
        if self.feature_vector.is_empty() {
            return Some(RejectReason::Empty);
        }
        if self.feature_vector.iter().any(|v| !v.is_finite()) {
            return Some(RejectReason::NonFinite);
        }
        if self.feature_vector.iter().all(|v| *v == 0.0) {
            return Some(RejectReason::ZeroVector);
        }
        None
    }
}

/// Why an entity was excluded from a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Empty,
    NonFinite,
    ZeroVector,
    DimensionMismatch,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEntity {
    pub entity_id: String,
    pub reason: RejectReason,
}

// =============================================================================
// Frame
// =============================================================================

/// A validated day of entity features.
///
/// Entity identifiers are unique and every feature vector has the same
/// dimension, is finite and non-zero.
#[derive(Debug, Clone)]
pub struct Frame {
    date: NaiveDate,
    entities: Vec<EntityFeatures>,
    dimension: usize,
}

impl Frame {
    /// Validate raw rows into a frame, returning the rows that were dropped.
    ///
    /// The frame dimension is taken from the first row with a usable vector;
    /// later duplicates of an identifier are dropped in favour of the first.
    pub fn from_rows(date: NaiveDate, rows: Vec<EntityFeatures>) -> (Self, Vec<RejectedEntity>) {
        let mut entities = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());
        let mut dimension = 0;

        for row in rows {
            let reason = if let Some(defect) = row.vector_defect() {
                Some(defect)
            } else if seen.contains(&row.entity_id) {
                Some(RejectReason::Duplicate)
            } else if dimension != 0 && row.feature_vector.len() != dimension {
                Some(RejectReason::DimensionMismatch)
            } else {
                None
            };

            match reason {
                Some(reason) => rejected.push(RejectedEntity {
                    entity_id: row.entity_id,
                    reason,
                }),
                None => {
                    if dimension == 0 {
                        dimension = row.feature_vector.len();
                    }
                    seen.insert(row.entity_id.clone());
                    entities.push(row);
                }
            }
        }

        (
            Self {
                date,
                entities,
                dimension,
            },
            rejected,
        )
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Shared feature dimension (0 for an empty frame)
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn entities(&self) -> &[EntityFeatures] {
        &self.entities
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.entity_id.clone()).collect()
    }

    /// N x D matrix, row i belongs to entity i
    pub fn feature_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.entities.len(), self.dimension, |r, c| {
            self.entities[r].feature_vector[c]
        })
    }
}

// =============================================================================
// Layout
// =============================================================================

/// N x 2 coordinates, index-aligned with a frame's entity list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layout {
    points: Vec<Vector2<f64>>,
}

impl Layout {
    pub fn new(points: Vec<Vector2<f64>>) -> Self {
        Self { points }
    }

    /// Every entity at (0, 0)
    pub fn origin(n: usize) -> Self {
        Self {
            points: vec![Vector2::zeros(); n],
        }
    }

    pub fn from_xy(xy: &[(f64, f64)]) -> Self {
        xy.iter().map(|&(x, y)| Vector2::new(x, y)).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Vector2<f64>] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Vector2<f64> {
        self.points[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vector2<f64>> {
        self.points.iter()
    }

    /// Mean of all points; the origin for an empty layout
    pub fn centroid(&self) -> Vector2<f64> {
        if self.points.is_empty() {
            return Vector2::zeros();
        }
        let sum = self
            .points
            .iter()
            .fold(Vector2::zeros(), |acc, p| acc + p);
        sum / self.points.len() as f64
    }

    pub fn map<F>(&self, f: F) -> Layout
    where
        F: Fn(&Vector2<f64>) -> Vector2<f64>,
    {
        self.points.iter().map(f).collect()
    }
}

impl FromIterator<Vector2<f64>> for Layout {
    fn from_iter<I: IntoIterator<Item = Vector2<f64>>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

/// A finished layout together with the entities and day it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLayout {
    pub date: NaiveDate,
    pub entity_ids: Vec<String>,
    pub layout: Layout,
}

impl FrameLayout {
    /// Coordinates of an entity, if it is part of this frame
    pub fn position_of(&self, entity_id: &str) -> Option<Vector2<f64>> {
        self.entity_ids
            .iter()
            .position(|id| id == entity_id)
            .map(|i| self.layout.point(i))
    }
}

// =============================================================================
// Output Records
// =============================================================================

/// One artifact row: an entity's canvas position on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Serialized as YYYY-MM-DD
    pub date: NaiveDate,

    /// Written under `ticker`, the key the map front end reads
    #[serde(rename = "ticker", alias = "entity_id")]
    pub entity_id: String,

    pub x: f64,
    pub y: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,

    #[serde(flatten)]
    pub attributes: BTreeMap<String, f64>,
}
