//! Stochastic gradient layout over the fuzzy graph

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::graph::Edge;

const GRADIENT_CLIP: f64 = 4.0;

#[derive(Debug, Clone, Copy)]
pub(crate) struct LayoutParams {
    pub a: f64,
    pub b: f64,
    pub gamma: f64,
    pub initial_alpha: f64,
    pub negative_sample_rate: usize,
    pub n_epochs: usize,
    pub seed_pull: f64,
}

/// Positions a seeded run is pulled back towards, with a weight per point
#[derive(Debug, Clone, Copy)]
pub(crate) struct Anchor<'a> {
    pub positions: &'a [[f64; 2]],
    pub weights: &'a [f64],
}

fn clip(value: f64) -> f64 {
    value.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn squared_distance(p: [f64; 2], q: [f64; 2]) -> f64 {
    let (dx, dy) = (p[0] - q[0], p[1] - q[1]);
    dx * dx + dy * dy
}

/// Optimize `embedding` in place.
///
/// Heavier edges are sampled more often: an edge of weight `w` is visited
/// every `max_w / w` epochs. When `anchor` is given, every point moves
/// `seed_pull * weight` of the way back to its anchor once per epoch. The pull
/// does not decay with the learning rate, so it has the last word.
pub(crate) fn optimize_layout(
    embedding: &mut [[f64; 2]],
    edges: &[Edge],
    params: &LayoutParams,
    anchor: Option<Anchor<'_>>,
    rng: &mut ChaCha8Rng,
) {
    let n = embedding.len();
    if n == 0 || edges.is_empty() {
        return;
    }

    let max_weight = edges.iter().fold(0.0_f64, |acc, e| acc.max(e.weight));
    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_weight / e.weight).collect();
    let epochs_per_negative: Vec<f64> = epochs_per_sample
        .iter()
        .map(|eps| eps / params.negative_sample_rate.max(1) as f64)
        .collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    let (a, b) = (params.a, params.b);
    let mut alpha = params.initial_alpha;

    for epoch in 0..params.n_epochs {
        let now = epoch as f64;

        for (e, edge) in edges.iter().enumerate() {
            if next_sample[e] > now {
                continue;
            }
            let (j, k) = (edge.head, edge.tail);

            let dist_sq = squared_distance(embedding[j], embedding[k]);
            let attract = if dist_sq > 0.0 {
                -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..2 {
                let grad = clip(attract * (embedding[j][d] - embedding[k][d]));
                embedding[j][d] += grad * alpha;
                embedding[k][d] -= grad * alpha;
            }
            next_sample[e] += epochs_per_sample[e];

            if params.negative_sample_rate == 0 {
                continue;
            }
            let n_negative = ((now - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
            for _ in 0..n_negative {
                let other = rng.gen_range(0..n);
                if other == j {
                    continue;
                }
                let dist_sq = squared_distance(embedding[j], embedding[other]);
                let repel = if dist_sq > 0.0 {
                    2.0 * params.gamma * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                } else {
                    0.0
                };
                for d in 0..2 {
                    let grad = if repel > 0.0 {
                        clip(repel * (embedding[j][d] - embedding[other][d]))
                    } else {
                        GRADIENT_CLIP
                    };
                    embedding[j][d] += grad * alpha;
                }
            }
            next_negative[e] += n_negative as f64 * epochs_per_negative[e];
        }

        if let Some(anchor) = anchor {
            let targets = anchor.positions.iter().zip(anchor.weights);
            for (point, (target, weight)) in embedding.iter_mut().zip(targets) {
                let pull = params.seed_pull * weight;
                point[0] += pull * (target[0] - point[0]);
                point[1] += pull * (target[1] - point[1]);
            }
        }

        alpha = params.initial_alpha * (1.0 - (epoch + 1) as f64 / params.n_epochs as f64);
    }
}
