//! Scale normalization onto the fixed-radius canvas

use crate::models::Layout;
use crate::stats::percentile;

/// Canvas radius the visualizer is built around
pub const DEFAULT_TARGET_RADIUS: f64 = 150.0;

/// Below this many points the maximum radius is used instead of the 95th
/// percentile.
pub const SMALL_FRAME: usize = 10;

const RADIUS_PERCENTILE: f64 = 95.0;

/// Robust radius of a layout around its centroid
pub fn layout_radius(layout: &Layout) -> f64 {
    let center = layout.centroid();
    let norms: Vec<f64> = layout.iter().map(|p| (p - center).norm()).collect();
    if norms.len() < SMALL_FRAME {
        norms.iter().copied().fold(0.0, f64::max)
    } else {
        percentile(&norms, RADIUS_PERCENTILE).unwrap_or(0.0)
    }
}

/// Center `layout` on its centroid and scale it so its robust radius equals
/// `target_radius`.
///
/// A layout with zero radius (empty, single point, all coincident) is
/// returned unchanged.
pub fn normalize_to_radius(layout: &Layout, target_radius: f64) -> Layout {
    normalize_with_scale(layout, target_radius).0
}

/// As [`normalize_to_radius`], also returning the factor applied (1 when the
/// layout was left unchanged)
pub fn normalize_with_scale(layout: &Layout, target_radius: f64) -> (Layout, f64) {
    let radius = layout_radius(layout);
    if radius == 0.0 || !radius.is_finite() {
        return (layout.clone(), 1.0);
    }
    let center = layout.centroid();
    let scale = target_radius / radius;
    (layout.map(|p| (p - center) * scale), scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;
    use proptest::prelude::*;

    #[test]
    fn test_small_frame_uses_max_radius() {
        let layout = Layout::from_xy(&[(1.0, 1.0), (3.0, 1.0), (2.0, 4.0), (2.0, -2.0)]);
        let normalized = normalize_to_radius(&layout, 150.0);
        assert!(normalized.centroid().norm() < 1e-9);
        let max = normalized.iter().map(|p| p.norm()).fold(0.0, f64::max);
        assert!((max - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_frame_ignores_outliers() {
        let mut points: Vec<(f64, f64)> = (0..40)
            .map(|i| {
                let t = i as f64 * std::f64::consts::TAU / 40.0;
                (t.cos(), t.sin())
            })
            .collect();
        points.push((1000.0, 0.0));
        let normalized = normalize_to_radius(&Layout::from_xy(&points), 150.0);
        // The outlier ends up far outside the canvas, the ring does not
        let outlier = normalized.point(40).norm();
        assert!(outlier > 1000.0);
        assert!((layout_radius(&normalized) - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_scale_factor_reported() {
        let layout = Layout::from_xy(&[(-3.0, 0.0), (3.0, 0.0), (0.0, 0.0)]);
        let (normalized, scale) = normalize_with_scale(&layout, 150.0);
        assert!((scale - 50.0).abs() < 1e-9);
        assert_eq!(normalized, normalize_to_radius(&layout, 150.0));
        assert_eq!(normalize_with_scale(&Layout::origin(3), 150.0).1, 1.0);
    }

    #[test]
    fn test_zero_radius_returns_input() {
        let layout = Layout::from_xy(&[(2.0, 2.0), (2.0, 2.0), (2.0, 2.0)]);
        assert_eq!(normalize_to_radius(&layout, 150.0), layout);
        assert_eq!(normalize_to_radius(&Layout::default(), 150.0), Layout::default());
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(
            xy in prop::collection::vec((-500.0f64..500.0, -500.0f64..500.0), 2..40)
        ) {
            let layout: Layout = xy.iter().map(|&(x, y)| Vector2::new(x, y)).collect();
            let once = normalize_to_radius(&layout, 150.0);
            let twice = normalize_to_radius(&once, 150.0);
            for (p, q) in once.iter().zip(twice.iter()) {
                prop_assert!((p - q).norm() < 1e-6);
            }
        }
    }
}
