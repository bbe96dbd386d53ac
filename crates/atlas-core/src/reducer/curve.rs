//! Low-dimensional similarity curve `1 / (1 + a * d^(2b))`
//!
//! `a` and `b` are fitted by Levenberg-Marquardt so the curve matches an
//! offset exponential decay that is flat up to `min_dist`.

const SAMPLES: usize = 300;
const MAX_ITERATIONS: usize = 200;

fn target(x: f64, spread: f64, min_dist: f64) -> f64 {
    if x < min_dist {
        1.0
    } else {
        (-(x - min_dist) / spread).exp()
    }
}

fn sum_squares(xs: &[f64], ys: &[f64], a: f64, b: f64) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(x, y)| {
            let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
            r * r
        })
        .sum()
}

/// Least-squares `(a, b)` for the given `spread` and `min_dist`
pub fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..SAMPLES)
        .map(|i| 3.0 * spread * i as f64 / (SAMPLES - 1) as f64)
        .collect();
    let ys: Vec<f64> = xs.iter().map(|&x| target(x, spread, min_dist)).collect();

    let (mut a, mut b) = (1.0_f64, 1.0_f64);
    let mut cost = sum_squares(&xs, &ys, a, b);
    let mut lambda = 1e-3;

    for _ in 0..MAX_ITERATIONS {
        // Normal equations J^T J and gradient J^T r
        let (mut jaa, mut jab, mut jbb, mut ga, mut gb) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let u = x.powf(2.0 * b);
            let denom = 1.0 + a * u;
            let r = 1.0 / denom - y;
            let da = -u / (denom * denom);
            let db = -2.0 * a * u * x.ln() / (denom * denom);
            jaa += da * da;
            jab += da * db;
            jbb += db * db;
            ga += da * r;
            gb += db * r;
        }

        let mut improved = false;
        while lambda < 1e12 {
            let (maa, mbb) = (jaa * (1.0 + lambda), jbb * (1.0 + lambda));
            let det = maa * mbb - jab * jab;
            if det.abs() < f64::EPSILON {
                lambda *= 10.0;
                continue;
            }
            let step_a = -(mbb * ga - jab * gb) / det;
            let step_b = -(maa * gb - jab * ga) / det;
            let (next_a, next_b) = (a + step_a, b + step_b);

            if next_a > 0.0 && next_b > 0.0 {
                let next_cost = sum_squares(&xs, &ys, next_a, next_b);
                if next_cost < cost {
                    let converged = (cost - next_cost) < 1e-15 * cost.max(1.0);
                    a = next_a;
                    b = next_b;
                    cost = next_cost;
                    lambda = (lambda / 10.0).max(1e-12);
                    improved = !converged;
                    break;
                }
            }
            lambda *= 10.0;
        }

        if !improved {
            break;
        }
    }

    (a, b)
}
