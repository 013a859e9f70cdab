//! Per-axis threshold estimator: the Regularized Logistic Threshold Model.
//!
//! Numerical routines here are clamped and deterministic — closed-form
//! helpers, explicit iteration caps, no panics on degenerate input — and
//! degrade to a flagged default rather than ever throwing on bad data.

use crate::config::EstimatorConfig;
use crate::types::{AxisCode, AxisFlag, AxisScore};
use std::collections::HashSet;

/// One observation feeding the estimator: a dilemma's pressure level and
/// the subject's permissibility rating for it.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub pressure: f64,
    pub permissibility: f64,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Fit `(b, a, SE_b)` for one axis from its observations, defaulting
/// gracefully on degenerate input rather than ever panicking.
pub fn fit(axis: AxisCode, observations: &[Observation], config: &EstimatorConfig) -> AxisScore {
    let n = observations.len();
    if n == 0 {
        return AxisScore::default_for(axis);
    }

    let targets: Vec<(f64, f64)> = observations
        .iter()
        .map(|o| (o.pressure, clamp(o.permissibility / 100.0, 0.02, 0.98)))
        .collect();

    let mean_y = targets.iter().map(|(_, y)| y).sum::<f64>() / n as f64;
    let var_y = targets.iter().map(|(_, y)| (y - mean_y).powi(2)).sum::<f64>() / n as f64;
    let lambda_b = if var_y < config.variance_threshold {
        config.lambda_b_low_var
    } else {
        config.lambda_b_high_var
    };

    let (mut b, mut a) = if n < config.cold_start_n {
        quick_logit(&targets, config)
    } else {
        gradient_descent(&targets, lambda_b, config)
    };

    b = clamp(b, config.b_min, config.b_max);
    a = clamp(a, config.a_min, config.a_max);

    let se_b = standard_error(&targets, a, b);

    let mut flags = HashSet::new();
    if n < 5 {
        flags.insert(AxisFlag::FewItems);
    }
    if b < 0.1 || b > 0.9 {
        flags.insert(AxisFlag::OutOfRange);
    }
    if se_b > 0.15 {
        flags.insert(AxisFlag::HighUncertainty);
    }
    if is_non_monotonic(&targets) {
        flags.insert(AxisFlag::NonMonotonic);
    }

    AxisScore {
        axis,
        b,
        a,
        se_b,
        n_items: n as u32,
        flags,
    }
}

/// Cold-start estimate for `n < cold_start_n`: a linear regression of the
/// logit of `y` against pressure.
fn quick_logit(targets: &[(f64, f64)], config: &EstimatorConfig) -> (f64, f64) {
    let n = targets.len() as f64;
    let zs: Vec<(f64, f64)> = targets
        .iter()
        .map(|(x, y)| (*x, (y / (1.0 - y)).ln()))
        .collect();

    let mean_x = zs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_z = zs.iter().map(|(_, z)| z).sum::<f64>() / n;
    let var_x = zs.iter().map(|(x, _)| (x - mean_x).powi(2)).sum::<f64>();
    if var_x.abs() < 1e-12 {
        return (0.5, config.a0);
    }
    let cov_xz = zs
        .iter()
        .map(|(x, z)| (x - mean_x) * (z - mean_z))
        .sum::<f64>();
    let beta = cov_xz / var_x;
    let alpha = mean_z - beta * mean_x;
    if beta.abs() < 1e-12 {
        return (0.5, config.a0);
    }
    (clamp(-alpha / beta, 0.1, 0.9), config.a0)
}

/// Penalized gradient descent
fn gradient_descent(targets: &[(f64, f64)], lambda_b: f64, config: &EstimatorConfig) -> (f64, f64) {
    let n = targets.len() as f64;
    let mut b = 0.5;
    let mut a = config.a0;

    for k in 0..config.max_iterations {
        let lr = 0.05 / (1.0 + 0.05 * k as f64);

        let mut sum_db = 0.0;
        let mut sum_da = 0.0;
        for (x, y) in targets {
            let z = clamp(a * (x - b), -20.0, 20.0);
            let p = sigmoid(z);
            sum_db += (p - y) * (-a);
            sum_da += (p - y) * (x - b);
        }
        let grad_b = (2.0 / n) * sum_db + 2.0 * lambda_b * (b - 0.5);
        let grad_a = (2.0 / n) * sum_da + 2.0 * config.lambda_a * (a - config.a0);

        let new_b = clamp(b - lr * grad_b, config.b_min, config.b_max);
        let new_a = clamp(a - lr * grad_a, config.a_min, config.a_max);

        let delta_b = (new_b - b).abs();
        let delta_a = (new_a - a).abs();
        b = new_b;
        a = new_a;

        if delta_b < config.tolerance && delta_a < config.tolerance {
            break;
        }
    }

    (b, a)
}

/// Fisher-information standard error with a residual-misfit scaling
/// factor.
fn standard_error(targets: &[(f64, f64)], a: f64, b: f64) -> f64 {
    let n = targets.len();
    let mut fisher_info = 0.0;
    let mut sse = 0.0;
    for (x, y) in targets {
        let z = clamp(a * (x - b), -20.0, 20.0);
        let p = sigmoid(z);
        fisher_info += a * a * p * (1.0 - p);
        sse += (y - p).powi(2);
    }
    let mse_resid = sse / (n.saturating_sub(2).max(1) as f64);
    if fisher_info < 1e-9 {
        return 0.5;
    }
    (mse_resid.sqrt()) / fisher_info.sqrt()
}

/// `non_monotonic`: more than one direction reversal in
/// `y` among adjacent pressure-sorted items with `|Δy| > 0.2`.
fn is_non_monotonic(targets: &[(f64, f64)]) -> bool {
    let mut sorted = targets.to_vec();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let mut last_sign: Option<i32> = None;
    let mut reversals = 0;
    for pair in sorted.windows(2) {
        let dy = pair[1].1 - pair[0].1;
        if dy.abs() <= 0.2 {
            continue;
        }
        let sign = if dy > 0.0 { 1 } else { -1 };
        if let Some(prev) = last_sign {
            if prev != sign {
                reversals += 1;
            }
        }
        last_sign = Some(sign);
    }
    reversals > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis() -> AxisCode {
        AxisCode::from("test-axis")
    }

    #[test]
    fn defaults_on_empty_input() {
        let score = fit(axis(), &[], &EstimatorConfig::default());
        assert_eq!(score.n_items, 0);
        assert!((score.b - 0.5).abs() < 1e-9);
        assert!(score.flags.contains(&AxisFlag::FewItems));
    }

    #[test]
    fn recovers_sigmoid_threshold() {
        let config = EstimatorConfig::default();
        let observations: Vec<Observation> = (0..12)
            .map(|i| {
                let x = (i as f64 + 0.5) / 12.0;
                let p = sigmoid(8.0 * (x - 0.5)) * 100.0;
                Observation {
                    pressure: x,
                    permissibility: p,
                }
            })
            .collect();
        let score = fit(axis(), &observations, &config);
        assert!(score.b >= 0.45 && score.b <= 0.55, "b={}", score.b);
        assert!(score.a >= 3.0, "a={}", score.a);
        assert!(score.se_b <= 0.1, "se_b={}", score.se_b);
    }

    #[test]
    fn all_permit_pushes_b_low() {
        let config = EstimatorConfig::default();
        let observations: Vec<Observation> = (0..10)
            .map(|i| Observation {
                pressure: i as f64 / 9.0,
                permissibility: 98.0,
            })
            .collect();
        let score = fit(axis(), &observations, &config);
        assert!(score.b <= 0.2, "b={}", score.b);
        assert!(score.flags.contains(&AxisFlag::OutOfRange));
    }

    #[test]
    fn all_refuse_pushes_b_high() {
        let config = EstimatorConfig::default();
        let observations: Vec<Observation> = (0..10)
            .map(|i| Observation {
                pressure: i as f64 / 9.0,
                permissibility: 2.0,
            })
            .collect();
        let score = fit(axis(), &observations, &config);
        assert!(score.b >= 0.8, "b={}", score.b);
        assert!(score.flags.contains(&AxisFlag::OutOfRange));
    }

    #[test]
    fn idempotent_refit() {
        let config = EstimatorConfig::default();
        let observations: Vec<Observation> = (0..8)
            .map(|i| Observation {
                pressure: i as f64 / 7.0,
                permissibility: 40.0 + i as f64 * 3.0,
            })
            .collect();
        let first = fit(axis(), &observations, &config);
        let second = fit(axis(), &observations, &config);
        assert!((first.b - second.b).abs() < 1e-4);
        assert!((first.a - second.a).abs() < 1e-4);
    }
}
