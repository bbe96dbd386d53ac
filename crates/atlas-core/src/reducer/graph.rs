//! Neighbor graph construction
//!
//! Exact k-nearest neighbors followed by the fuzzy simplicial set: per-point
//! smooth distance calibration and a probabilistic union of the directed
//! neighbor relations.

use std::collections::BTreeMap;

use super::Metric;

const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const BINARY_SEARCH_STEPS: usize = 64;

/// Directed kNN lists; entry 0 of every list is the point itself.
#[derive(Debug, Clone)]
pub(crate) struct KnnGraph {
    pub indices: Vec<Vec<usize>>,
    pub distances: Vec<Vec<f64>>,
}

/// Undirected weighted edge, stored once per direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Edge {
    pub head: usize,
    pub tail: usize,
    pub weight: f64,
}

impl Metric {
    pub(crate) fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            Metric::Cosine => {
                let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                if norm_a == 0.0 && norm_b == 0.0 {
                    0.0
                } else if norm_a == 0.0 || norm_b == 0.0 {
                    1.0
                } else {
                    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).max(0.0)
                }
            }
        }
    }
}

/// Brute-force kNN. Ties are broken by index so the graph is deterministic.
pub(crate) fn nearest_neighbors(rows: &[Vec<f64>], k: usize, metric: Metric) -> KnnGraph {
    let n = rows.len();
    let mut pairwise = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = metric.distance(&rows[i], &rows[j]);
            pairwise[i][j] = d;
            pairwise[j][i] = d;
        }
    }

    let mut indices = Vec::with_capacity(n);
    let mut distances = Vec::with_capacity(n);
    for (i, row) in pairwise.iter().enumerate() {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&x, &y| {
            (x != i)
                .cmp(&(y != i))
                .then(row[x].total_cmp(&row[y]))
                .then(x.cmp(&y))
        });
        order.truncate(k);
        distances.push(order.iter().map(|&j| row[j]).collect());
        indices.push(order);
    }

    KnnGraph { indices, distances }
}

/// Per-point `(rho, sigma)`: distance to the nearest distinct neighbor and the
/// bandwidth that makes the neighborhood's total membership equal `log2(k)`.
pub(crate) fn smooth_knn_dist(knn: &KnnGraph, k: usize) -> Vec<(f64, f64)> {
    let target = (k as f64).log2();
    let all: Vec<f64> = knn.distances.iter().flatten().copied().collect();
    let mean_all = if all.is_empty() {
        0.0
    } else {
        all.iter().sum::<f64>() / all.len() as f64
    };

    knn.distances
        .iter()
        .map(|dists| {
            let rho = dists.iter().copied().find(|d| *d > 0.0).unwrap_or(0.0);

            let (mut lo, mut hi, mut mid) = (0.0_f64, f64::INFINITY, 1.0_f64);
            for _ in 0..BINARY_SEARCH_STEPS {
                let psum: f64 = dists
                    .iter()
                    .skip(1)
                    .map(|d| {
                        let gap = d - rho;
                        if gap > 0.0 {
                            (-gap / mid).exp()
                        } else {
                            1.0
                        }
                    })
                    .sum();

                if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                    break;
                }
                if psum > target {
                    hi = mid;
                    mid = (lo + hi) / 2.0;
                } else {
                    lo = mid;
                    if hi == f64::INFINITY {
                        mid *= 2.0;
                    } else {
                        mid = (lo + hi) / 2.0;
                    }
                }
            }

            let floor = if rho > 0.0 {
                MIN_K_DIST_SCALE * dists.iter().sum::<f64>() / dists.len() as f64
            } else {
                MIN_K_DIST_SCALE * mean_all
            };
            (rho, mid.max(floor))
        })
        .collect()
}

/// Symmetric fuzzy membership graph as a sorted edge list.
///
/// Directed strengths `A` are combined as `A + A^T - A * A^T`.
pub(crate) fn fuzzy_simplicial_set(knn: &KnnGraph, k: usize) -> Vec<Edge> {
    let calibration = smooth_knn_dist(knn, k);

    let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (i, (neighbors, dists)) in knn.indices.iter().zip(&knn.distances).enumerate() {
        let (rho, sigma) = calibration[i];
        for (&j, &d) in neighbors.iter().zip(dists) {
            if j == i {
                continue;
            }
            let strength = if d - rho <= 0.0 || sigma == 0.0 {
                1.0
            } else {
                (-(d - rho) / sigma).exp()
            };
            if strength > 0.0 {
                directed.insert((i, j), strength);
            }
        }
    }

    let mut union: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (&(i, j), &forward) in &directed {
        let backward = directed.get(&(j, i)).copied().unwrap_or(0.0);
        let weight = forward + backward - forward * backward;
        union.insert((i, j), weight);
        union.insert((j, i), weight);
    }

    union
        .into_iter()
        .filter(|(_, w)| *w > 0.0)
        .map(|((head, tail), weight)| Edge { head, tail, weight })
        .collect()
}

/// Number of connected components of the edge graph
pub(crate) fn connected_components(n: usize, edges: &[Edge]) -> usize {
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for edge in edges {
        let (a, b) = (find(&mut parent, edge.head), find(&mut parent, edge.tail));
        if a != b {
            parent[a] = b;
        }
    }

    (0..n).filter(|&x| find(&mut parent, x) == x).count()
}
