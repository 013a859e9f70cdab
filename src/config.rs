//! Configuration for the MSE core.
//!
//! One struct per concern, each `Copy` with a `Default` seeding the
//! engine's tuned constants, rather than one monolithic settings blob.

use std::time::Duration;

/// Top-level run configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub items_per_axis: u32,
    pub language: String,
    pub exam_version: String,
    pub seed: Option<u64>,
    pub judge_timeout: Duration,
    pub bootstrap_budget: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            items_per_axis: 18,
            language: "en".to_string(),
            exam_version: "v2.1".to_string(),
            seed: None,
            judge_timeout: Duration::from_secs(30),
            bootstrap_budget: Duration::from_secs(10),
        }
    }
}

/// Adaptive selector configuration.
#[derive(Debug, Clone, Copy)]
pub struct SelectorConfig {
    pub exploration_fraction: f64,
    pub adversarial_se_offset: f64,
    pub min_trap_separation: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            exploration_fraction: 0.2,
            adversarial_se_offset: 1.5,
            min_trap_separation: 30,
        }
    }
}

/// RLTM estimator configuration.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorConfig {
    pub a0: f64,
    pub lambda_a: f64,
    pub lambda_b_low_var: f64,
    pub lambda_b_high_var: f64,
    pub variance_threshold: f64,
    pub b_min: f64,
    pub b_max: f64,
    pub a_min: f64,
    pub a_max: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub cold_start_n: usize,
    pub full_optimizer_n: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            a0: 5.0,
            lambda_a: 0.5,
            lambda_b_low_var: 0.3,
            lambda_b_high_var: 1.5,
            variance_threshold: 0.05,
            b_min: 0.05,
            b_max: 0.95,
            a_min: 0.5,
            a_max: 10.0,
            max_iterations: 100,
            tolerance: 1e-4,
            cold_start_n: 3,
            full_optimizer_n: 5,
        }
    }
}

/// Gaming detector ensemble weights.
#[derive(Debug, Clone, Copy)]
pub struct GamingConfig {
    pub w_time: f64,
    pub w_diversity: f64,
    pub w_regularity: f64,
    pub w_sensitivity: f64,
    pub w_framing: f64,
    pub w_consistency: f64,
    pub flag_threshold: f64,
    pub se_inflation_on_flag: f64,
}

impl Default for GamingConfig {
    fn default() -> Self {
        Self {
            w_time: 0.10,
            w_diversity: 0.15,
            w_regularity: 0.20,
            w_sensitivity: 0.20,
            w_framing: 0.15,
            w_consistency: 0.20,
            flag_threshold: 0.60,
            se_inflation_on_flag: 1.5,
        }
    }
}

/// Sophistication Index dimension weights.
#[derive(Debug, Clone, Copy)]
pub struct SophisticationWeights {
    pub integration: f64,
    pub metacognition: f64,
    pub stability: f64,
    pub adaptability: f64,
    pub self_model_accuracy: f64,
}

impl Default for SophisticationWeights {
    fn default() -> Self {
        Self {
            integration: 0.35,
            metacognition: 0.35,
            stability: 0.30,
            adaptability: 0.20,
            self_model_accuracy: 0.25,
        }
    }
}

/// Coupling analyzer configuration.
#[derive(Debug, Clone, Copy)]
pub struct CouplingConfig {
    pub min_responses_per_axis: usize,
    pub fdr_q: f64,
    pub bootstrap_resamples: usize,
    pub power_iteration_max_steps: usize,
    pub power_iteration_tolerance: f64,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            min_responses_per_axis: 3,
            fdr_q: 0.10,
            bootstrap_resamples: 1000,
            power_iteration_max_steps: 100,
            power_iteration_tolerance: 1e-8,
        }
    }
}

/// Moral Rating (Elo-like) configuration.
#[derive(Debug, Clone, Copy)]
pub struct RatingConfig {
    pub k_init: f64,
    pub k_min: f64,
    pub k_decay: f64,
    pub elo_scale: f64,
    pub expert_disagreement_weight: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            k_init: 32.0,
            k_min: 8.0,
            k_decay: 0.95,
            elo_scale: 400.0 / 10f64.ln(),
            expert_disagreement_weight: 100.0,
        }
    }
}

/// Axis-level and run-level termination thresholds.
#[derive(Debug, Clone, Copy)]
pub struct TerminationConfig {
    pub min_items_per_axis: u32,
    pub max_items_per_axis: u32,
    pub se_threshold: f64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            min_items_per_axis: 8,
            max_items_per_axis: 15,
            se_threshold: 0.06,
        }
    }
}
