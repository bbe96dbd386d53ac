//! Initial embeddings for the layout optimizer

use nalgebra::{DMatrix, SymmetricEigen};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use super::graph::{connected_components, Edge};
use crate::models::Layout;

/// Side of the box every initial embedding is rescaled into
pub(crate) const INIT_BOX: f64 = 10.0;

pub(crate) fn random(n: usize, rng: &mut ChaCha8Rng) -> Vec<[f64; 2]> {
    (0..n)
        .map(|_| [rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0)])
        .collect()
}

/// Eigenvectors 2 and 3 of the normalized graph Laplacian.
///
/// Returns `None` for disconnected graphs, where the low eigenvectors only
/// separate components and carry no layout information.
pub(crate) fn spectral(n: usize, edges: &[Edge], rng: &mut ChaCha8Rng) -> Option<Vec<[f64; 2]>> {
    if n < 3 || connected_components(n, edges) > 1 {
        return None;
    }

    let mut weights = DMatrix::<f64>::zeros(n, n);
    for edge in edges {
        weights[(edge.head, edge.tail)] = edge.weight;
    }
    let inv_sqrt_degree: Vec<f64> = weights
        .row_iter()
        .map(|row| {
            let degree = row.sum();
            if degree > 0.0 {
                1.0 / degree.sqrt()
            } else {
                0.0
            }
        })
        .collect();

    let laplacian = DMatrix::from_fn(n, n, |i, j| {
        let identity = if i == j { 1.0 } else { 0.0 };
        identity - inv_sqrt_degree[i] * weights[(i, j)] * inv_sqrt_degree[j]
    });

    let eigen = SymmetricEigen::try_new(laplacian, f64::EPSILON, 0)?;
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| eigen.eigenvalues[x].total_cmp(&eigen.eigenvalues[y]));

    let (first, second) = (eigen.eigenvectors.column(order[1]), eigen.eigenvectors.column(order[2]));
    let max_abs = first
        .iter()
        .chain(second.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if !max_abs.is_finite() || max_abs == 0.0 {
        return None;
    }

    let expansion = 10.0 / max_abs;
    let noise = Normal::new(0.0, 1e-4).ok()?;
    Some(
        (0..n)
            .map(|i| {
                [
                    first[i] * expansion + noise.sample(rng),
                    second[i] * expansion + noise.sample(rng),
                ]
            })
            .collect(),
    )
}

/// Seeds whose points all sit within this of their centroid carry no layout
const COLLAPSED_SPREAD: f64 = 1e-9;

pub(crate) fn is_collapsed(seed: &Layout) -> bool {
    let center = seed.centroid();
    seed.iter().all(|p| (p - center).norm() <= COLLAPSED_SPREAD)
}

/// Seed positions, kept in their own units so an unchanged frame starts
/// where it ended, with a tiny perturbation so coincident seeds can separate
pub(crate) fn from_seed(seed: &Layout, rng: &mut ChaCha8Rng) -> Vec<[f64; 2]> {
    let jitter = 1e-4 * INIT_BOX;
    seed.iter()
        .map(|p| {
            [
                p.x + rng.gen_range(-jitter..jitter),
                p.y + rng.gen_range(-jitter..jitter),
            ]
        })
        .collect()
}

/// Min-max rescale each axis into `[0, INIT_BOX]`; flat axes collapse to 0
pub(crate) fn rescale_to_box(embedding: &mut [[f64; 2]]) {
    for axis in 0..2 {
        let (min, max) = embedding.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p[axis]), hi.max(p[axis]))
        });
        let range = max - min;
        for point in embedding.iter_mut() {
            point[axis] = if range > 0.0 {
                INIT_BOX * (point[axis] - min) / range
            } else {
                0.0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn ring(n: usize) -> Vec<Edge> {
        (0..n)
            .flat_map(|i| {
                let j = (i + 1) % n;
                [
                    Edge { head: i, tail: j, weight: 1.0 },
                    Edge { head: j, tail: i, weight: 1.0 },
                ]
            })
            .collect()
    }

    #[test]
    fn test_rescale_to_box() {
        let mut e = vec![[-5.0, 2.0], [5.0, 2.0], [0.0, 2.0]];
        rescale_to_box(&mut e);
        assert_eq!(e[0], [0.0, 0.0]);
        assert_eq!(e[1], [10.0, 0.0]);
        assert_eq!(e[2], [5.0, 0.0]);
    }

    #[test]
    fn test_from_seed_keeps_seed_units() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let seed = Layout::from_xy(&[(-40.0, 3.0), (25.0, -1.0), (0.5, 0.5)]);
        let embedding = from_seed(&seed, &mut rng);
        for (p, q) in seed.iter().zip(&embedding) {
            assert!((p.x - q[0]).abs() < 1e-3 && (p.y - q[1]).abs() < 1e-3);
        }
        assert!(!is_collapsed(&seed));
        assert!(is_collapsed(&Layout::from_xy(&[(2.0, 2.0), (2.0, 2.0)])));
    }

    #[test]
    fn test_spectral_ring_is_spread_out() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let embedding = spectral(12, &ring(12), &mut rng).unwrap();
        assert_eq!(embedding.len(), 12);
        // A ring's second and third eigenvectors trace a circle
        let radii: Vec<f64> = embedding.iter().map(|p| (p[0] * p[0] + p[1] * p[1]).sqrt()).collect();
        let max = radii.iter().cloned().fold(0.0, f64::max);
        let min = radii.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(min > 0.5 * max);
    }

    #[test]
    fn test_spectral_rejects_disconnected_graph() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let edges = vec![
            Edge { head: 0, tail: 1, weight: 1.0 },
            Edge { head: 1, tail: 0, weight: 1.0 },
            Edge { head: 2, tail: 3, weight: 1.0 },
            Edge { head: 3, tail: 2, weight: 1.0 },
        ];
        assert!(spectral(4, &edges, &mut rng).is_none());
    }
}
