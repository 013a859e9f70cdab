//! Shrinkage-Spearman coupling analyzer across axes within one run.
//!
//! The regularized incomplete beta function used for the Spearman
//! p-values is adapted from `examples/other_examples/.../score_engine.rs`'s
//! Beta-distribution code (Lanczos log-gamma, Lentz's continued
//! fraction), generalized from a credible-interval quantile use case to
//! a two-tailed significance test.

use crate::config::CouplingConfig;
use crate::types::{AxisCode, CouplingResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        let lnpi_sin = (PI * x).sin().abs().ln();
        PI.ln() - lnpi_sin - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = COEFFS[0];
        for (i, &c) in COEFFS[1..].iter().enumerate() {
            let denom = x + i as f64 + 1.0;
            ag += c / denom;
        }
        let t = x + 7.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

fn ln_beta_fn(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Regularized incomplete beta function I_x(a, b) via Lentz's modified
/// continued fraction (Numerical Recipes in C, 2nd ed., §6.4).
fn regularized_ibeta(x: f64, a: f64, b: f64) -> f64 {
    const EPS: f64 = 1e-15;
    const TINY: f64 = 1e-30;
    const MAX_ITER: usize = 200;

    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    if x > (a + 1.0) / (a + b + 2.0) {
        return 1.0 - regularized_ibeta(1.0 - x, b, a);
    }

    let ln_prefactor = a * x.ln() + b * (1.0 - x).ln() - ln_beta_fn(a, b) - a.ln();
    let prefactor = ln_prefactor.exp();

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0_f64;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m_f64 = m as f64;
        let m2 = 2.0 * m_f64;

        let aa = m_f64 * (b - m_f64) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -((a + m_f64) * (qab + m_f64) * x) / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }

    prefactor * h
}

/// Two-tailed p-value for a Spearman correlation `rho` from `m` paired
/// observations, via the Student-t / regularized-incomplete-beta
/// relation.
fn spearman_p_value(rho: f64, m: usize) -> f64 {
    let m = m as f64;
    if m <= 2.0 {
        return 1.0;
    }
    let rho = clamp(rho, -0.999_999, 0.999_999);
    let t = rho * ((m - 2.0) / (1.0 - rho * rho)).sqrt();
    let x = (m - 2.0) / ((m - 2.0) + t * t);
    regularized_ibeta(x, (m - 2.0) / 2.0, 0.5)
}

fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap());

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[indices[j + 1]] == values[indices[i]] {
            j += 1;
        }
        let avg_rank = ((i + j) as f64 / 2.0) + 1.0;
        for idx in indices.iter().take(j + 1).skip(i) {
            ranks[*idx] = avg_rank;
        }
        i = j + 1;
    }
    ranks
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }
    let mx = xs.iter().sum::<f64>() / n as f64;
    let my = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for i in 0..n {
        let dx = xs[i] - mx;
        let dy = ys[i] - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx.abs() < 1e-12 || vy.abs() < 1e-12 {
        0.0
    } else {
        cov / (vx.sqrt() * vy.sqrt())
    }
}

fn spearman(xs: &[f64], ys: &[f64]) -> f64 {
    pearson(&average_ranks(xs), &average_ranks(ys))
}

fn raw_matrix(series: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let k = series.len();
    let mut matrix = vec![vec![0.0; k]; k];
    for i in 0..k {
        matrix[i][i] = 1.0;
        for j in (i + 1)..k {
            let rho = spearman(&series[i], &series[j]);
            matrix[i][j] = rho;
            matrix[j][i] = rho;
        }
    }
    matrix
}

fn power_iteration_hub_scores(abs_matrix: &[Vec<f64>], config: &CouplingConfig) -> Vec<f64> {
    let k = abs_matrix.len();
    if k == 0 {
        return Vec::new();
    }
    let mut v = vec![1.0 / (k as f64); k];

    for _ in 0..config.power_iteration_max_steps {
        let mut next = vec![0.0; k];
        for i in 0..k {
            for j in 0..k {
                next[i] += abs_matrix[i][j] * v[j];
            }
        }
        let norm = next.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 1e-12 {
            for x in &mut next {
                *x /= norm;
            }
        }
        let delta: f64 = next.iter().zip(v.iter()).map(|(a, b)| (a - b).abs()).sum();
        v = next;
        if delta < config.power_iteration_tolerance {
            break;
        }
    }

    let sum: f64 = v.iter().sum();
    if sum.abs() > 1e-12 {
        for x in &mut v {
            *x /= sum;
        }
    }
    v
}

fn bh_significant(p_values: &[((usize, usize), f64)], q: f64) -> std::collections::HashSet<(usize, usize)> {
    let m = p_values.len();
    if m == 0 {
        return std::collections::HashSet::new();
    }
    let mut sorted = p_values.to_vec();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

    let mut max_k = 0;
    for (rank, (_, p)) in sorted.iter().enumerate() {
        let k = rank + 1;
        if *p <= (q * k as f64) / m as f64 {
            max_k = k;
        }
    }

    sorted
        .into_iter()
        .take(max_k)
        .map(|(pair, _)| pair)
        .collect()
}

fn split_half_reliability(series: &[Vec<f64>]) -> Option<f64> {
    let k = series.len();
    if k < 2 {
        return None;
    }
    let min_len = series.iter().map(|s| s.len()).min().unwrap_or(0);
    if min_len < 4 {
        return None;
    }

    let odd: Vec<Vec<f64>> = series
        .iter()
        .map(|s| s.iter().step_by(2).copied().collect())
        .collect();
    let even: Vec<Vec<f64>> = series
        .iter()
        .map(|s| s.iter().skip(1).step_by(2).copied().collect())
        .collect();

    if odd[0].len() < 2 || even[0].len() < 2 {
        return None;
    }

    let odd_matrix = raw_matrix(&odd);
    let even_matrix = raw_matrix(&even);

    let mut odd_upper = Vec::new();
    let mut even_upper = Vec::new();
    for i in 0..k {
        for j in (i + 1)..k {
            odd_upper.push(odd_matrix[i][j]);
            even_upper.push(even_matrix[i][j]);
        }
    }
    if odd_upper.is_empty() {
        return None;
    }
    Some(pearson(&odd_upper, &even_upper))
}

/// Run the full coupling analysis over one run's permissibility series,
/// keyed by axis code.
pub fn analyze(
    by_axis: &HashMap<AxisCode, Vec<f64>>,
    config: &CouplingConfig,
    seed: u64,
    bootstrap_deadline: Duration,
) -> CouplingResult {
    let mut axes: Vec<AxisCode> = by_axis
        .iter()
        .filter(|(_, v)| v.len() >= config.min_responses_per_axis)
        .map(|(k, _)| k.clone())
        .collect();
    axes.sort();

    if axes.len() < 3 {
        return CouplingResult {
            axes,
            warning: Some("fewer than 3 axes have enough responses for coupling analysis".to_string()),
            ..Default::default()
        };
    }

    let k = axes.len();
    let m = axes.iter().map(|a| by_axis[a].len()).min().unwrap();
    let series: Vec<Vec<f64>> = axes.iter().map(|a| by_axis[a][..m].to_vec()).collect();

    let raw = raw_matrix(&series);

    let lambda = if m > 3 {
        (m as f64 - 3.0) / (m as f64 + 10.0)
    } else {
        0.0
    };
    let mut shrunk = vec![vec![0.0; k]; k];
    let mut p_values = vec![vec![0.0; k]; k];
    let mut pair_p_values = Vec::new();
    for i in 0..k {
        shrunk[i][i] = 1.0;
        for j in 0..k {
            if i == j {
                continue;
            }
            shrunk[i][j] = lambda * raw[i][j];
        }
        for j in (i + 1)..k {
            let p = spearman_p_value(raw[i][j], m);
            p_values[i][j] = p;
            p_values[j][i] = p;
            pair_p_values.push(((i, j), p));
        }
    }

    let significant_pairs = bh_significant(&pair_p_values, config.fdr_q);
    let mut significant = vec![vec![false; k]; k];
    for i in 0..k {
        significant[i][i] = true;
    }
    for (i, j) in &significant_pairs {
        significant[*i][*j] = true;
        significant[*j][*i] = true;
    }

    let abs_matrix: Vec<Vec<f64>> = (0..k)
        .map(|i| (0..k).map(|j| if i == j { 0.0 } else { raw[i][j].abs() }).collect())
        .collect();
    let hub_vector = power_iteration_hub_scores(&abs_matrix, config);
    let hub_scores: HashMap<AxisCode, f64> = axes
        .iter()
        .cloned()
        .zip(hub_vector.into_iter())
        .collect();

    let (bootstrap_ci, median_ci_width) = bootstrap(&series, k, config, seed, bootstrap_deadline);

    let reliability = split_half_reliability(&series);

    let mut pairs: Vec<(AxisCode, AxisCode, f64)> = Vec::new();
    for i in 0..k {
        for j in (i + 1)..k {
            pairs.push((axes[i].clone(), axes[j].clone(), raw[i][j]));
        }
    }
    let mut by_strength = pairs.clone();
    by_strength.sort_by(|a, b| b.2.abs().partial_cmp(&a.2.abs()).unwrap());
    let top_strongest: Vec<_> = by_strength.iter().take(5).cloned().collect();
    let mut by_weakness = pairs;
    by_weakness.sort_by(|a, b| a.2.abs().partial_cmp(&b.2.abs()).unwrap());
    let top_weakest: Vec<_> = by_weakness.into_iter().take(5).collect();

    CouplingResult {
        axes,
        shrunk_matrix: shrunk,
        p_values,
        significant,
        hub_scores,
        bootstrap_ci,
        median_ci_width,
        reliability,
        top_strongest,
        top_weakest,
        warning: None,
    }
}

fn bootstrap(
    series: &[Vec<f64>],
    k: usize,
    config: &CouplingConfig,
    seed: u64,
    deadline: Duration,
) -> (Option<Vec<Vec<(f64, f64)>>>, Option<f64>) {
    let m = series.first().map(|s| s.len()).unwrap_or(0);
    if m == 0 {
        return (None, None);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples: Vec<Vec<Vec<f64>>> = vec![vec![Vec::new(); k]; k];
    let start = Instant::now();
    let mut completed = 0;

    for _ in 0..config.bootstrap_resamples {
        if start.elapsed() > deadline {
            break;
        }
        let draw: Vec<usize> = (0..m).map(|_| rng.gen_range(0..m)).collect();
        let resampled: Vec<Vec<f64>> = series
            .iter()
            .map(|s| draw.iter().map(|&idx| s[idx]).collect())
            .collect();
        let matrix = raw_matrix(&resampled);
        for i in 0..k {
            for j in 0..k {
                if i != j {
                    samples[i][j].push(matrix[i][j]);
                }
            }
        }
        completed += 1;
    }

    if completed == 0 {
        return (None, None);
    }

    let mut ci = vec![vec![(0.0, 0.0); k]; k];
    let mut widths = Vec::new();
    for i in 0..k {
        for j in 0..k {
            if i == j {
                ci[i][j] = (1.0, 1.0);
                continue;
            }
            let mut values = samples[i][j].clone();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let lo = percentile(&values, 2.5);
            let hi = percentile(&values, 97.5);
            ci[i][j] = (lo, hi);
            if i < j {
                widths.push(hi - lo);
            }
        }
    }

    let median_width = if completed == config.bootstrap_resamples {
        widths.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Some(if widths.is_empty() {
            0.0
        } else {
            widths[widths.len() / 2]
        })
    } else {
        None
    };

    (Some(ci), median_width)
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}
