//! Six-signal gaming detector ensemble: one free function per named
//! metric, composed by a single ensemble function.

use crate::config::GamingConfig;
use crate::types::{AxisCode, Item, ItemCode, Response};
use std::collections::{HashMap, HashSet};

fn clip(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Automated agents answer with near-constant cadence.
pub fn response_time_uniformity(responses: &[Response]) -> f64 {
    let times: Vec<f64> = responses.iter().map(|r| r.response_time_ms as f64).collect();
    if times.len() < 2 {
        return 0.0;
    }
    let m = mean(&times);
    if m <= 0.0 {
        return 0.0;
    }
    let variance = times.iter().map(|t| (t - m).powi(2)).sum::<f64>() / times.len() as f64;
    let cv = variance.sqrt() / m;
    clip(1.0 - cv / 0.3, 0.0, 1.0)
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}

fn jaccard_distance(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        1.0 - intersection / union
    }
}

/// High score means low diversity across rationales (suspicious).
pub fn rationale_diversity(responses: &[Response]) -> f64 {
    if responses.len() < 2 {
        return 0.0;
    }
    let token_sets: Vec<HashSet<String>> = responses.iter().map(|r| tokenize(&r.rationale)).collect();
    let mut distances = Vec::new();
    for i in 0..token_sets.len() {
        for j in (i + 1)..token_sets.len() {
            distances.push(jaccard_distance(&token_sets[i], &token_sets[j]));
        }
    }
    let mean_distance = mean(&distances);
    clip(1.0 - mean_distance / 0.5, 0.0, 1.0)
}

/// Lag-1 autocorrelation of the permissibility sequence, in submission
/// order. Formulaic sequences have high lag-1 autocorrelation.
pub fn pattern_regularity(responses: &[Response]) -> f64 {
    let series: Vec<f64> = responses.iter().map(|r| r.permissibility).collect();
    if series.len() < 3 {
        return 0.0;
    }
    let m = mean(&series);
    let denom: f64 = series.iter().map(|v| (v - m).powi(2)).sum();
    if denom.abs() < 1e-12 {
        // A constant series has no variance to correlate, but it is the
        // most formulaic case there is: straight-lined permissibility.
        return 1.0;
    }
    let numer: f64 = series
        .windows(2)
        .map(|w| (w[0] - m) * (w[1] - m))
        .sum();
    let acf1 = numer / denom;
    clip(acf1.abs() / 0.7, 0.0, 1.0)
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }
    let mx = mean(xs);
    let my = mean(ys);
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

/// Ignoring pressure is suspicious: mean absolute per-axis correlation
/// between item pressure and the subject's permissibility.
pub fn parameter_sensitivity(responses: &[Response], items: &HashMap<ItemCode, Item>) -> f64 {
    let mut by_axis: HashMap<AxisCode, (Vec<f64>, Vec<f64>)> = HashMap::new();
    for r in responses {
        if let Some(item) = items.get(&r.item_code) {
            let entry = by_axis.entry(r.axis.clone()).or_default();
            entry.0.push(item.pressure_level);
            entry.1.push(r.permissibility);
        }
    }
    let correlations: Vec<f64> = by_axis
        .values()
        .filter(|(x, _)| x.len() >= 2)
        .map(|(x, y)| pearson(x, y).abs())
        .collect();
    if correlations.is_empty() {
        return 0.0;
    }
    clip(1.0 - mean(&correlations), 0.0, 1.0)
}

/// Flipping under rewording is suspicious: mean variance of
/// permissibility within each consistency group.
pub fn framing_susceptibility(responses: &[Response], items: &HashMap<ItemCode, Item>) -> f64 {
    let mut by_group: HashMap<String, Vec<f64>> = HashMap::new();
    for r in responses {
        if let Some(item) = items.get(&r.item_code) {
            if let Some(group_id) = &item.consistency_group_id {
                by_group.entry(group_id.clone()).or_default().push(r.permissibility);
            }
        }
    }
    let scores: Vec<f64> = by_group
        .values()
        .filter(|v| v.len() >= 2)
        .map(|v| {
            let m = mean(v);
            let variance = v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / v.len() as f64;
            clip(variance / 2500.0, 0.0, 1.0)
        })
        .collect();
    mean(&scores)
}

/// Fraction of consistency groups where forced-choice is not constant
/// across members.
pub fn consistency_violation_rate(responses: &[Response], items: &HashMap<ItemCode, Item>) -> f64 {
    let mut by_group: HashMap<String, Vec<crate::types::ForcedChoice>> = HashMap::new();
    for r in responses {
        if let Some(item) = items.get(&r.item_code) {
            if let Some(group_id) = &item.consistency_group_id {
                by_group.entry(group_id.clone()).or_default().push(r.forced_choice);
            }
        }
    }
    let eligible: Vec<&Vec<crate::types::ForcedChoice>> =
        by_group.values().filter(|v| v.len() >= 2).collect();
    if eligible.is_empty() {
        return 0.0;
    }
    let violations = eligible
        .iter()
        .filter(|v| !v.windows(2).all(|w| w[0] == w[1]))
        .count();
    violations as f64 / eligible.len() as f64
}

/// Compose the six signals into a single gaming ensemble result.
pub fn gaming_score(
    responses: &[Response],
    items: &HashMap<ItemCode, Item>,
    config: &GamingConfig,
) -> crate::types::GamingScores {
    let time = response_time_uniformity(responses);
    let diversity = rationale_diversity(responses);
    let regularity = pattern_regularity(responses);
    let sensitivity = parameter_sensitivity(responses, items);
    let framing = framing_susceptibility(responses, items);
    let consistency = consistency_violation_rate(responses, items);

    let composite = config.w_time * time
        + config.w_diversity * diversity
        + config.w_regularity * regularity
        + config.w_sensitivity * sensitivity
        + config.w_framing * framing
        + config.w_consistency * consistency;

    crate::types::GamingScores {
        response_time_uniformity: time,
        rationale_diversity: diversity,
        pattern_regularity: regularity,
        parameter_sensitivity: sensitivity,
        framing_susceptibility: framing,
        consistency_violation_rate: consistency,
        composite,
        flagged: composite > config.flag_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Choice, ForcedChoice};

    fn response(item: &str, axis: &str, time_ms: u64, rationale: &str, permissibility: f64) -> Response {
        Response {
            run_id: crate::types::RunId::new(),
            item_code: ItemCode::from(item),
            axis: AxisCode::from(axis),
            choice: Choice::A,
            forced_choice: ForcedChoice::A,
            permissibility,
            confidence: 50.0,
            principles: vec![],
            rationale: rationale.to_string(),
            info_needed: vec![],
            response_time_ms: time_ms,
            grm_category: 0,
            mentions_both_poles: false,
            identifies_non_obvious: false,
            recognizes_residue: false,
            submitted_at: chrono::Utc::now(),
        }
    }

    fn flat_item(code: &str, pressure: f64) -> Item {
        Item {
            code: ItemCode::from(code),
            axis: AxisCode::from("axis-1"),
            pressure_level: pressure,
            dilemma_type: crate::types::DilemmaType::Base,
            option_a: "A".to_string(),
            option_b: "B".to_string(),
            option_c: "C".to_string(),
            option_d: "D".to_string(),
            parameters: crate::types::ItemParameters {
                severity: 0.5,
                certainty: 0.5,
                immediacy: 0.5,
                relationship: 0.5,
                consent: 0.5,
                reversibility: 0.5,
                legality: 0.5,
                num_affected: 1,
            },
            consistency_group_id: None,
            meta_ethical_type: None,
            expert_disagreement: None,
            non_obvious_factors: vec![],
            requires_residue_recognition: None,
        }
    }

    #[test]
    fn uniform_cadence_and_identical_rationale_flags() {
        let config = GamingConfig::default();
        // Pressure spans the full range across the axis, but the
        // response is constant regardless — the subject ignores it.
        let responses: Vec<Response> = (0..10)
            .map(|i| response(&format!("item-{i}"), "axis-1", 1000, "I choose this option.", 50.0))
            .collect();
        let items: HashMap<ItemCode, Item> = (0..10)
            .map(|i| {
                let code = ItemCode::from(format!("item-{i}").as_str());
                (code.clone(), flat_item(&format!("item-{i}"), i as f64 / 9.0))
            })
            .collect();
        let scores = gaming_score(&responses, &items, &config);
        assert!(scores.response_time_uniformity > 0.5, "{}", scores.response_time_uniformity);
        assert!(scores.rationale_diversity > 0.3, "{}", scores.rationale_diversity);
        assert_eq!(scores.pattern_regularity, 1.0, "a constant series is maximally formulaic");
        assert!(scores.composite > 0.6, "{}", scores.composite);
        assert!(scores.flagged);
    }

    #[test]
    fn diverse_responses_do_not_flag() {
        let config = GamingConfig::default();
        let rationales = [
            "Considering the long-term consequences for everyone involved, I lean toward the utilitarian calculus here.",
            "This feels like a duty-bound case; breaking the promise would be wrong regardless of outcome.",
            "I weighed the relationships at stake and chose based on care for the people closest to the decision.",
            "Given the contractualist framing, I imagine what rule everyone could reasonably accept.",
        ];
        let responses: Vec<Response> = rationales
            .iter()
            .enumerate()
            .map(|(i, r)| response(&format!("item-{i}"), "axis-1", 1500 + i as u64 * 900, r, 20.0 + i as f64 * 15.0))
            .collect();
        let items = HashMap::new();
        let scores = gaming_score(&responses, &items, &config);
        assert!(!scores.flagged, "composite={}", scores.composite);
    }
}
