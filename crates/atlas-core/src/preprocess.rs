//! Frame preprocessing
//!
//! Robust per-dimension scaling (median / interquartile range) of a frame's
//! feature matrix, plus optional mass weighting of entity rows before the
//! matrix is handed to the reducer.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, AtlasResult};
use crate::models::Frame;
use crate::stats::{median, percentile_sorted};

/// Where the robust scaler is fitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingFit {
    /// Fit on each day's matrix alone
    #[default]
    PerFrame,
    /// Fit once over every frame in the run (requires a prefit scaler)
    Global,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default)]
    pub scaling: ScalingFit,

    /// Side attribute used for mass weighting (e.g. "volume"); disabled when unset
    #[serde(default)]
    pub mass_attribute: Option<String>,
}

// =============================================================================
// Robust Scaler
// =============================================================================

/// Per-dimension affine scaler: `(x - median) / iqr`.
///
/// Dimensions with zero spread map to 0 so the column count is preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct RobustScaler {
    centers: Vec<f64>,
    spreads: Vec<f64>,
}

impl RobustScaler {
    /// Fit on the rows of a single matrix
    pub fn fit(matrix: &DMatrix<f64>) -> Self {
        let columns = (0..matrix.ncols()).map(|c| matrix.column(c).iter().copied().collect::<Vec<f64>>());
        Self::from_columns(columns)
    }

    /// Fit on the concatenated rows of several frames.
    ///
    /// The dimension comes from the first non-empty frame; frames with a
    /// different dimension are left out of the fit. Returns `None` when there
    /// is nothing to fit on.
    pub fn fit_frames<'a, I>(frames: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Frame>,
    {
        let mut columns: Vec<Vec<f64>> = Vec::new();

        for frame in frames {
            if frame.is_empty() {
                continue;
            }
            if columns.is_empty() {
                columns = vec![Vec::new(); frame.dimension()];
            }
            if frame.dimension() != columns.len() {
                tracing::warn!(
                    date = %frame.date(),
                    expected = columns.len(),
                    actual = frame.dimension(),
                    "Frame left out of global scaler fit"
                );
                continue;
            }
            for entity in frame.entities() {
                for (column, value) in columns.iter_mut().zip(&entity.feature_vector) {
                    column.push(*value);
                }
            }
        }

        if columns.is_empty() {
            return None;
        }
        Some(Self::from_columns(columns.into_iter()))
    }

    fn from_columns<I>(columns: I) -> Self
    where
        I: Iterator<Item = Vec<f64>>,
    {
        let mut centers = Vec::new();
        let mut spreads = Vec::new();
        for mut values in columns {
            if values.is_empty() {
                centers.push(0.0);
                spreads.push(0.0);
                continue;
            }
            values.sort_by(|a, b| a.total_cmp(b));
            centers.push(percentile_sorted(&values, 50.0));
            spreads.push(percentile_sorted(&values, 75.0) - percentile_sorted(&values, 25.0));
        }
        Self { centers, spreads }
    }

    pub fn dimension(&self) -> usize {
        self.centers.len()
    }

    pub fn transform(&self, matrix: &mut DMatrix<f64>) -> AtlasResult<()> {
        if matrix.ncols() != self.dimension() {
            return Err(AtlasError::DimensionMismatch {
                expected: self.dimension(),
                actual: matrix.ncols(),
            });
        }
        self.scale_columns(matrix);
        Ok(())
    }

    /// Column-wise scaling; callers guarantee the column count matches
    fn scale_columns(&self, matrix: &mut DMatrix<f64>) {
        for (c, mut column) in matrix.column_iter_mut().enumerate() {
            let (center, spread) = (self.centers[c], self.spreads[c]);
            if spread > 0.0 && spread.is_finite() {
                column.apply(|v| *v = (*v - center) / spread);
            } else {
                column.fill(0.0);
            }
        }
    }
}

// =============================================================================
// Mass Weighting
// =============================================================================

/// Row weights `ln(1 + v) / median(ln(1 + v))` for a side attribute.
///
/// Entities without the attribute, or frames whose median is not positive,
/// get weight 1.
pub fn mass_weights(frame: &Frame, attribute: &str) -> Vec<f64> {
    let logs: Vec<Option<f64>> = frame
        .entities()
        .iter()
        .map(|e| {
            e.attributes
                .get(attribute)
                .filter(|v| v.is_finite())
                .map(|v| v.max(0.0).ln_1p())
        })
        .collect();

    let present: Vec<f64> = logs.iter().flatten().copied().collect();
    let center = median(&present).unwrap_or(0.0);
    if center <= 0.0 {
        return vec![1.0; logs.len()];
    }

    logs.into_iter()
        .map(|log| log.map_or(1.0, |l| l / center))
        .collect()
}

// =============================================================================
// Preprocessor
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
    global: Option<RobustScaler>,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            config,
            global: None,
        }
    }

    /// Install the scaler used when `scaling = global`
    pub fn with_global_scaler(mut self, scaler: RobustScaler) -> Self {
        self.global = Some(scaler);
        self
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Scaled (and optionally weighted) N x D matrix for a frame
    pub fn prepare(&self, frame: &Frame) -> DMatrix<f64> {
        let mut matrix = frame.feature_matrix();

        let global = match (self.config.scaling, &self.global) {
            (ScalingFit::Global, Some(scaler)) if scaler.dimension() == frame.dimension() => {
                Some(scaler)
            }
            (ScalingFit::Global, _) => {
                tracing::warn!(
                    date = %frame.date(),
                    dimension = frame.dimension(),
                    "No usable global scaler, fitting on this frame"
                );
                None
            }
            (ScalingFit::PerFrame, _) => None,
        };

        let fitted;
        let scaler = match global {
            Some(scaler) => scaler,
            None => {
                fitted = RobustScaler::fit(&matrix);
                &fitted
            }
        };
        scaler.scale_columns(&mut matrix);

        if let Some(attribute) = &self.config.mass_attribute {
            let weights = mass_weights(frame, attribute);
            for (mut row, weight) in matrix.row_iter_mut().zip(weights) {
                row *= weight;
            }
        }

        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityFeatures;
    use chrono::NaiveDate;

    fn frame(rows: Vec<EntityFeatures>) -> Frame {
        let date = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        Frame::from_rows(date, rows).0
    }

    #[test]
    fn test_robust_scaler_centers_and_scales() {
        let m = DMatrix::from_row_slice(5, 1, &[1.0, 2.0, 3.0, 4.0, 100.0]);
        let scaler = RobustScaler::fit(&m);
        let mut scaled = m.clone();
        scaler.transform(&mut scaled).unwrap();
        // median 3, iqr 4 - 2 = 2
        assert!((scaled[(0, 0)] + 1.0).abs() < 1e-12);
        assert!((scaled[(2, 0)]).abs() < 1e-12);
        assert!((scaled[(4, 0)] - 48.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_spread_dimension_is_zeroed_not_dropped() {
        let m = DMatrix::from_row_slice(3, 2, &[5.0, 1.0, 5.0, 2.0, 5.0, 3.0]);
        let scaler = RobustScaler::fit(&m);
        let mut scaled = m.clone();
        scaler.transform(&mut scaled).unwrap();
        assert_eq!(scaled.ncols(), 2);
        assert!(scaled.column(0).iter().all(|v| *v == 0.0));
        assert!(scaled.column(1).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_transform_dimension_mismatch() {
        let scaler = RobustScaler::fit(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]));
        let mut other = DMatrix::zeros(2, 3);
        assert!(matches!(
            scaler.transform(&mut other),
            Err(AtlasError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_mass_weights_normalized_by_median() {
        let f = frame(vec![
            EntityFeatures::new("A", vec![1.0]).with_attribute("volume", 0.0),
            EntityFeatures::new("B", vec![2.0]).with_attribute("volume", std::f64::consts::E - 1.0),
            EntityFeatures::new("C", vec![3.0]).with_attribute("volume", 1e6),
            EntityFeatures::new("D", vec![4.0]),
        ]);
        let weights = mass_weights(&f, "volume");
        // median of [0, 1, ln(1e6 + 1)] is 1
        assert_eq!(weights[0], 0.0);
        assert!((weights[1] - 1.0).abs() < 1e-12);
        assert!(weights[2] > 10.0);
        assert_eq!(weights[3], 1.0);
    }

    #[test]
    fn test_mass_weights_without_attribute() {
        let f = frame(vec![
            EntityFeatures::new("A", vec![1.0]),
            EntityFeatures::new("B", vec![2.0]),
        ]);
        assert_eq!(mass_weights(&f, "volume"), vec![1.0, 1.0]);
    }

    #[test]
    fn test_global_scaler_fits_across_frames() {
        let day1 = frame(vec![
            EntityFeatures::new("A", vec![1.0, 10.0]),
            EntityFeatures::new("B", vec![2.0, 20.0]),
        ]);
        let day2 = frame(vec![
            EntityFeatures::new("A", vec![3.0, 30.0]),
            EntityFeatures::new("B", vec![4.0, 40.0]),
            EntityFeatures::new("C", vec![5.0, 50.0]),
        ]);
        let odd = frame(vec![EntityFeatures::new("X", vec![1.0, 2.0, 3.0])]);

        let scaler = RobustScaler::fit_frames([&day1, &odd, &day2]).unwrap();
        assert_eq!(scaler.dimension(), 2);

        let pre = Preprocessor::new(PreprocessConfig {
            scaling: ScalingFit::Global,
            mass_attribute: None,
        })
        .with_global_scaler(scaler);

        // Global median of [1..5] is 3, so day1's first row sits below center
        let m = pre.prepare(&day1);
        assert!((m[(0, 0)] + 1.0).abs() < 1e-12);
        assert!((m[(1, 0)] + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_prepare_applies_mass_weighting() {
        let f = frame(vec![
            EntityFeatures::new("A", vec![1.0]).with_attribute("volume", 10.0),
            EntityFeatures::new("B", vec![2.0]).with_attribute("volume", 10.0),
            EntityFeatures::new("C", vec![4.0]).with_attribute("volume", 10.0),
        ]);
        let unweighted = Preprocessor::default().prepare(&f);
        let weighted = Preprocessor::new(PreprocessConfig {
            scaling: ScalingFit::PerFrame,
            mass_attribute: Some("volume".to_string()),
        })
        .prepare(&f);
        // Equal volumes give unit weights
        assert!((unweighted - weighted).abs().max() < 1e-12);
    }

    #[test]
    fn test_prepare_refits_when_global_scaler_dimension_differs() {
        let f = frame(vec![
            EntityFeatures::new("A", vec![1.0, 10.0]),
            EntityFeatures::new("B", vec![2.0, 30.0]),
            EntityFeatures::new("C", vec![5.0, 20.0]),
        ]);
        let wide = RobustScaler::fit(&DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));

        let global = Preprocessor::new(PreprocessConfig {
            scaling: ScalingFit::Global,
            mass_attribute: None,
        })
        .with_global_scaler(wide)
        .prepare(&f);
        let per_frame = Preprocessor::default().prepare(&f);

        assert_eq!(global, per_frame);
        // Median 2 and IQR 2 on the first column
        assert!((global[(2, 0)] - 1.5).abs() < 1e-12);
    }
}
