//! Elo-like Moral Rating (MR) updater: small, pure update functions over
//! plain data, no shared state between calls.

use crate::config::RatingConfig;
use crate::types::{DilemmaType, Rating};

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Fixed per-type difficulty bonus layered onto the pressure-derived
/// base difficulty. Tragic and consistency-trap dilemmas are the
/// hardest to answer consistently; framing sits lowest since it merely
/// rewords a base item.
fn dilemma_type_bonus(dilemma_type: DilemmaType) -> f64 {
    match dilemma_type {
        DilemmaType::Base => 0.0,
        DilemmaType::Framing => 50.0,
        DilemmaType::Particularist => 75.0,
        DilemmaType::Pressure => 100.0,
        DilemmaType::DirtyHands => 125.0,
        DilemmaType::ConsistencyTrap => 150.0,
        DilemmaType::Tragic => 175.0,
    }
}

/// `item_difficulty = base(pressure_level) + bonus(dilemma_type) +
/// expert_disagreement·k₁`. Pressure is scaled onto the
/// same 0-1000 range as `mr` so the two are directly comparable in the
/// Elo expectation.
pub fn item_difficulty(
    pressure_level: f64,
    dilemma_type: DilemmaType,
    expert_disagreement: Option<f64>,
    config: &RatingConfig,
) -> f64 {
    let base = pressure_level * 1000.0;
    let bonus = dilemma_type_bonus(dilemma_type);
    let disagreement_term = expert_disagreement.unwrap_or(0.0) * config.expert_disagreement_weight;
    base + bonus + disagreement_term
}

/// Apply one per-item update to a subject's rating.
pub fn update_rating(
    rating: Rating,
    item_difficulty: f64,
    grm_category: u8,
    config: &RatingConfig,
    now: chrono::DateTime<chrono::Utc>,
) -> Rating {
    let n = rating.items_processed;
    let expected = sigmoid((rating.mr - item_difficulty) / config.elo_scale);
    let actual = grm_category.min(4) as f64 / 4.0;
    let k = (config.k_init * config.k_decay.powi(n as i32)).max(config.k_min);

    let mr_new = rating.mr + k * (actual - expected);
    let items_processed = n + 1;
    let uncertainty_new = (rating.uncertainty
        * (1.0 - 1.0 / (1.0 + items_processed as f64)).sqrt())
    .max(50.0);
    let peak = rating.peak.max(mr_new);

    Rating {
        mr: mr_new,
        uncertainty: uncertainty_new,
        items_processed,
        peak,
        last_updated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    #[test]
    fn mr_rises_monotonically_with_decaying_steps() {
        let config = RatingConfig::default();
        let mut rating = Rating::initial(now());
        let mut prev_delta = f64::MAX;
        for _ in 0..20 {
            let before = rating.mr;
            rating = update_rating(rating, 1000.0, 4, &config, now());
            let delta = rating.mr - before;
            assert!(delta > 0.0, "mr should rise toward a harder-than-current difficulty");
            assert!(delta <= prev_delta + 1e-9, "delta should shrink as K decays");
            prev_delta = delta;
        }
    }

    #[test]
    fn peak_is_monotone() {
        let config = RatingConfig::default();
        let mut rating = Rating::initial(now());
        rating = update_rating(rating, 1200.0, 4, &config, now());
        let peak_after_rise = rating.peak;
        rating = update_rating(rating, 200.0, 0, &config, now());
        assert_eq!(rating.peak, peak_after_rise);
        assert!(rating.mr < peak_after_rise);
    }

    #[test]
    fn uncertainty_never_drops_below_floor() {
        let config = RatingConfig::default();
        let mut rating = Rating::initial(now());
        for _ in 0..500 {
            rating = update_rating(rating, 1000.0, 2, &config, now());
        }
        assert!(rating.uncertainty >= 50.0);
    }
}
