//! Sophistication Index (SI): a weighted geometric composite of five
//! dimensions built from the other analyzers' outputs.
//!
//! Only the Estimator, Gaming, and Coupling dimensions are computed in
//! this crate; the Procedural and Capacity dimensions belong to an
//! upstream collaborator whose own formulas are out of scope here.
//! Calibration, info-seeking, moral humility, consistency, moral
//! coherence, and consistency-trap agreement arrive as already-computed
//! optional scores — a one-directional data flow with explicit inputs,
//! rather than being recomputed from raw responses.

use crate::types::{AxisCode, SophisticationResult};
use std::collections::HashMap;

fn clip(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
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

fn spearman(xs: &[f64], ys: &[f64]) -> f64 {
    pearson(&average_ranks(xs), &average_ranks(ys))
}

/// Skip-null weighted mean, renormalizing over the weights of the
/// present values, used throughout
fn skip_null_mean(parts: &[(Option<f64>, f64)]) -> Option<f64> {
    let present: Vec<(f64, f64)> = parts
        .iter()
        .filter_map(|(v, w)| v.map(|value| (value, *w)))
        .collect();
    if present.is_empty() {
        return None;
    }
    let total_weight: f64 = present.iter().map(|(_, w)| w).sum();
    if total_weight.abs() < 1e-12 {
        return None;
    }
    Some(present.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight)
}

/// One-way ANOVA F-ratio of `values` grouped by `group_of`.
fn between_within_f_ratio(values: &[(f64, String)]) -> f64 {
    let mut groups: HashMap<String, Vec<f64>> = HashMap::new();
    for (v, g) in values {
        groups.entry(g.clone()).or_default().push(*v);
    }
    let k = groups.len();
    let n = values.len();
    if k < 2 || n <= k {
        return 0.0;
    }
    let grand_mean = values.iter().map(|(v, _)| v).sum::<f64>() / n as f64;

    let mut between = 0.0;
    let mut within = 0.0;
    for group_values in groups.values() {
        let gn = group_values.len() as f64;
        let gmean = group_values.iter().sum::<f64>() / gn;
        between += gn * (gmean - grand_mean).powi(2);
        within += group_values.iter().map(|v| (v - gmean).powi(2)).sum::<f64>();
    }
    let df_between = (k - 1) as f64;
    let df_within = (n - k) as f64;
    if within.abs() < 1e-12 || df_within <= 0.0 {
        return 0.0;
    }
    (between / df_between) / (within / df_within)
}

/// All inputs the composer needs, assembled by the session orchestrator
/// from the other analyzers' outputs.
#[derive(Debug, Clone, Default)]
pub struct SophisticationInputs {
    pub coherence_score: Option<f64>,
    pub variance_explained: Option<f64>,
    pub axis_b_values: HashMap<AxisCode, f64>,
    pub axis_tradition: HashMap<AxisCode, String>,

    pub calibration: Option<f64>,
    pub info_seeking: Option<f64>,
    pub moral_humility: Option<f64>,
    pub difficulty_confidence_pairs: Vec<(f64, f64)>,

    pub consistency: Option<f64>,
    pub moral_coherence: Option<f64>,
    pub gaming_composite: f64,
    pub consistency_trap_agreement_mean: Option<f64>,

    pub delta_b_series: Vec<f64>,
    pub run_indices: Vec<f64>,
    pub mean_se_series: Vec<f64>,
    pub mean_delta_procedural: Option<f64>,
    pub snapshot_history_len: usize,

    pub predicted_vs_actual_b: Vec<(f64, f64)>,
}

fn tradition_separation(inputs: &SophisticationInputs) -> Option<f64> {
    if inputs.axis_b_values.is_empty() {
        return None;
    }
    let values: Vec<(f64, String)> = inputs
        .axis_b_values
        .iter()
        .filter_map(|(axis, b)| inputs.axis_tradition.get(axis).map(|t| (*b, t.clone())))
        .collect();
    if values.is_empty() {
        return None;
    }
    let f = between_within_f_ratio(&values);
    Some(clip(f / 3.0, 0.0, 1.0))
}

fn integration(inputs: &SophisticationInputs) -> Option<f64> {
    skip_null_mean(&[
        (inputs.coherence_score, 0.4),
        (tradition_separation(inputs), 0.3),
        (inputs.variance_explained, 0.3),
    ])
}

fn confidence_difficulty_component(inputs: &SophisticationInputs) -> Option<f64> {
    if inputs.difficulty_confidence_pairs.len() < 2 {
        return None;
    }
    let difficulty: Vec<f64> = inputs.difficulty_confidence_pairs.iter().map(|(d, _)| *d).collect();
    let confidence: Vec<f64> = inputs.difficulty_confidence_pairs.iter().map(|(_, c)| *c).collect();
    let rho = spearman(&difficulty, &confidence);
    Some(clip((0.5 - rho) / 1.0, 0.0, 1.0))
}

fn metacognition(inputs: &SophisticationInputs) -> Option<f64> {
    skip_null_mean(&[
        (inputs.calibration, 0.3),
        (inputs.info_seeking, 0.2),
        (inputs.moral_humility, 0.25),
        (confidence_difficulty_component(inputs), 0.25),
    ])
}

fn stability(inputs: &SophisticationInputs) -> Option<f64> {
    let genuineness = 1.0 - inputs.gaming_composite;
    skip_null_mean(&[
        (inputs.consistency, 0.3),
        (inputs.moral_coherence, 0.25),
        (Some(genuineness), 0.25),
        (inputs.consistency_trap_agreement_mean, 0.2),
    ])
}

fn acf1(series: &[f64]) -> f64 {
    if series.len() < 3 {
        return 0.0;
    }
    let mean = series.iter().sum::<f64>() / series.len() as f64;
    let denom: f64 = series.iter().map(|v| (v - mean).powi(2)).sum();
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    let numer: f64 = series.windows(2).map(|w| (w[0] - mean) * (w[1] - mean)).sum();
    numer / denom
}

fn adaptability(inputs: &SophisticationInputs) -> Option<f64> {
    if inputs.snapshot_history_len < 2 {
        return None;
    }
    let directional = if inputs.delta_b_series.len() >= 2 {
        Some((acf1(&inputs.delta_b_series) + 1.0) / 2.0)
    } else {
        None
    };
    let convergence = if inputs.run_indices.len() >= 2 && inputs.run_indices.len() == inputs.mean_se_series.len() {
        let rho = spearman(&inputs.run_indices, &inputs.mean_se_series);
        Some(clip(0.5 - rho, 0.0, 1.0))
    } else {
        None
    };
    let procedural = inputs
        .mean_delta_procedural
        .map(|d| clip(5.0 * d + 0.5, 0.0, 1.0));

    skip_null_mean(&[(directional, 1.0), (convergence, 1.0), (procedural, 1.0)])
}

fn self_model_accuracy(inputs: &SophisticationInputs) -> Option<f64> {
    if inputs.predicted_vs_actual_b.is_empty() {
        return None;
    }
    let mean_abs_error = inputs
        .predicted_vs_actual_b
        .iter()
        .map(|(predicted, actual)| (predicted - actual).abs())
        .sum::<f64>()
        / inputs.predicted_vs_actual_b.len() as f64;
    Some(clip(1.0 - mean_abs_error / 0.5, 0.0, 1.0))
}

/// Base weights for the five dimensions.
pub struct Weights {
    pub integration: f64,
    pub metacognition: f64,
    pub stability: f64,
    pub adaptability: f64,
    pub self_model_accuracy: f64,
}

impl From<&crate::config::SophisticationWeights> for Weights {
    fn from(w: &crate::config::SophisticationWeights) -> Self {
        Weights {
            integration: w.integration,
            metacognition: w.metacognition,
            stability: w.stability,
            adaptability: w.adaptability,
            self_model_accuracy: w.self_model_accuracy,
        }
    }
}

/// Weighted geometric composite over non-null dimensions, smoothed by
/// `+0.01` to tolerate zero scores without the logarithm blowing up.
pub fn composite(dimensions: &[(Option<f64>, f64)]) -> f64 {
    let present: Vec<(f64, f64)> = dimensions
        .iter()
        .filter_map(|(v, w)| v.map(|value| (value.max(0.0), *w)))
        .collect();
    if present.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = present.iter().map(|(_, w)| w).sum();
    if total_weight.abs() < 1e-12 {
        return 0.0;
    }
    let log_sum: f64 = present
        .iter()
        .map(|(v, w)| (w / total_weight) * (v + 0.01).ln())
        .sum();
    clip(log_sum.exp(), 0.0, 1.0)
}

/// Compute the full Sophistication Index result.
pub fn compute(inputs: &SophisticationInputs, weights: &Weights) -> SophisticationResult {
    let integration = integration(inputs);
    let metacognition = metacognition(inputs);
    let stability = stability(inputs);
    let adaptability = adaptability(inputs);
    let self_model_accuracy = self_model_accuracy(inputs);

    let si = composite(&[
        (integration, weights.integration),
        (metacognition, weights.metacognition),
        (stability, weights.stability),
        (adaptability, weights.adaptability),
        (self_model_accuracy, weights.self_model_accuracy),
    ]);

    SophisticationResult {
        integration,
        metacognition,
        stability,
        adaptability,
        self_model_accuracy,
        composite: si,
        composite_0_100: si * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometric_mean_penalizes_imbalance() {
        let imbalanced = composite(&[(Some(0.95), 0.35), (Some(0.95), 0.35), (Some(0.30), 0.30)]);
        let balanced = composite(&[(Some(0.73), 0.35), (Some(0.73), 0.35), (Some(0.73), 0.30)]);
        assert!(imbalanced < balanced, "imbalanced={imbalanced} balanced={balanced}");
    }

    #[test]
    fn adaptability_null_without_history() {
        let inputs = SophisticationInputs {
            snapshot_history_len: 1,
            ..Default::default()
        };
        assert!(adaptability(&inputs).is_none());
    }

    #[test]
    fn self_model_accuracy_null_without_predictions() {
        let inputs = SophisticationInputs::default();
        assert!(self_model_accuracy(&inputs).is_none());
    }

    #[test]
    fn self_model_accuracy_perfect_prediction_is_one() {
        let inputs = SophisticationInputs {
            predicted_vs_actual_b: vec![(0.5, 0.5), (0.6, 0.6), (0.3, 0.3)],
            ..Default::default()
        };
        let score = self_model_accuracy(&inputs).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn level_bands_match_score_ranges() {
        use crate::types::SophisticationLevel;
        assert_eq!(SophisticationLevel::from_score_0_100(10.0), SophisticationLevel::Reactive);
        assert_eq!(SophisticationLevel::from_score_0_100(65.0), SophisticationLevel::Deliberative);
        assert_eq!(SophisticationLevel::from_score_0_100(80.0), SophisticationLevel::Integrated);
        assert_eq!(SophisticationLevel::from_score_0_100(88.0), SophisticationLevel::Reflective);
        assert_eq!(SophisticationLevel::from_score_0_100(95.0), SophisticationLevel::Autonomous);
    }
}
