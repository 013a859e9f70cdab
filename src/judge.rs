//! Judge collaborator: scores a rationale into a GRM category plus three
//! booleans.
//!
//! `Judge` is the trait boundary for rationale scoring; `HeuristicJudge`
//! is a deterministic implementation with no network calls, safe to run
//! in tests and as a timeout fallback. An LLM-backed implementation is
//! deliberately out of scope here — only the trait boundary and the
//! heuristic fallback are real.

use crate::types::{Item, Response};
use async_trait::async_trait;

/// Outcome of scoring one rationale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JudgeVerdict {
    pub grm_category: u8,
    pub mentions_both_poles: bool,
    pub identifies_non_obvious: bool,
    pub recognizes_residue: bool,
}

/// A plug-in that scores a rationale against the dilemma it answers.
/// Implementations must be cheap to call many times per run and must
/// not block indefinitely — the session wraps every call in a deadline
/// and falls back to `HeuristicJudge` on timeout.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn score_rationale(&self, item: &Item, response: &Response) -> JudgeVerdict;

    fn name(&self) -> &str;
}

const REFUSAL_KEYWORDS: &[&str] = &[
    "i cannot", "i can't", "i won't", "i refuse", "unable to answer", "not comfortable",
];

const TRADEOFF_MARKERS: &[&str] = &[
    "but", "however", "although", "pero", "sin embargo", "aunque",
];

const TRADITION_WORDS: &[&str] = &[
    "consequentialist", "utilitarian", "deontological", "duty", "virtue", "character",
    "contractualist", "contract", "care", "relationship", "pragmatic",
];

/// Heuristic, lexical fallback judge — always available, never errors.
#[derive(Debug, Default)]
pub struct HeuristicJudge;

impl HeuristicJudge {
    pub fn new() -> Self {
        HeuristicJudge
    }

    fn grm_category(item: &Item, response: &Response) -> u8 {
        let rationale = response.rationale.to_lowercase();
        let len = response.rationale.chars().count();

        if len < 20 || REFUSAL_KEYWORDS.iter().any(|kw| rationale.contains(kw)) {
            return 0;
        }
        if len < 50 && !TRADEOFF_MARKERS.iter().any(|m| rationale.contains(m)) {
            return 1;
        }

        let has_tradeoff = TRADEOFF_MARKERS.iter().any(|m| rationale.contains(m));
        let params_named = count_named_parameters(&rationale);
        let distinct_traditions = count_distinct_traditions(&rationale);

        if params_named >= 3 && distinct_traditions >= 2 {
            return 4;
        }
        if mentions_non_obvious(item, &rationale) || !response.info_needed.is_empty() {
            return 3;
        }
        if has_tradeoff {
            return 2;
        }
        1
    }
}

fn count_named_parameters(rationale: &str) -> usize {
    const PARAM_WORDS: &[&str] = &[
        "severity", "certainty", "immediacy", "relationship", "consent", "reversibility", "legality",
        "affected",
    ];
    PARAM_WORDS.iter().filter(|w| rationale.contains(*w)).count()
}

fn count_distinct_traditions(rationale: &str) -> usize {
    TRADITION_WORDS.iter().filter(|w| rationale.contains(*w)).count()
}

fn mentions_non_obvious(item: &Item, rationale: &str) -> bool {
    item.non_obvious_factors
        .iter()
        .any(|factor| rationale.contains(&factor.to_lowercase()))
}

/// Both poles of the dilemma are present in the rationale when it
/// references option A's wording alongside a tradeoff marker — a cheap
/// proxy for "the subject weighed both sides" without full NLP.
fn mentions_both_poles(item: &Item, rationale: &str) -> bool {
    let option_a_key = first_content_word(&item.option_a);
    let option_b_key = first_content_word(&item.option_b);
    let has_tradeoff = TRADEOFF_MARKERS.iter().any(|m| rationale.contains(m));
    has_tradeoff
        && (option_a_key.map_or(false, |w| rationale.contains(&w))
            || option_b_key.map_or(false, |w| rationale.contains(&w)))
}

fn first_content_word(text: &str) -> Option<String> {
    text.to_lowercase()
        .split_whitespace()
        .find(|w| w.len() > 3)
        .map(|w| w.to_string())
}

#[async_trait]
impl Judge for HeuristicJudge {
    async fn score_rationale(&self, item: &Item, response: &Response) -> JudgeVerdict {
        let rationale = response.rationale.to_lowercase();
        JudgeVerdict {
            grm_category: Self::grm_category(item, response),
            mentions_both_poles: mentions_both_poles(item, &rationale),
            identifies_non_obvious: mentions_non_obvious(item, &rationale),
            recognizes_residue: item.requires_residue_recognition.unwrap_or(false)
                && (rationale.contains("still") || rationale.contains("residue") || rationale.contains("regret")),
        }
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AxisCode, Choice, DilemmaType, ForcedChoice, ItemCode, ItemParameters, RunId};

    fn item() -> Item {
        Item {
            code: ItemCode::from("item-1"),
            axis: AxisCode::from("axis-1"),
            pressure_level: 0.5,
            dilemma_type: DilemmaType::Base,
            option_a: "Pull the lever".to_string(),
            option_b: "Do nothing".to_string(),
            option_c: "Pull the lever".to_string(),
            option_d: "Do nothing".to_string(),
            parameters: ItemParameters {
                severity: 0.5,
                certainty: 0.5,
                immediacy: 0.5,
                relationship: 0.5,
                consent: 0.5,
                reversibility: 0.5,
                legality: 0.5,
                num_affected: 5,
            },
            consistency_group_id: None,
            meta_ethical_type: None,
            expert_disagreement: None,
            non_obvious_factors: vec!["bystander safety".to_string()],
            requires_residue_recognition: Some(true),
        }
    }

    fn response(rationale: &str, info_needed: Vec<String>) -> Response {
        Response {
            run_id: RunId::new(),
            item_code: ItemCode::from("item-1"),
            axis: AxisCode::from("axis-1"),
            choice: Choice::A,
            forced_choice: ForcedChoice::A,
            permissibility: 50.0,
            confidence: 50.0,
            principles: vec![],
            rationale: rationale.to_string(),
            info_needed,
            response_time_ms: 2000,
            grm_category: 0,
            mentions_both_poles: false,
            identifies_non_obvious: false,
            recognizes_residue: false,
            submitted_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn short_rationale_scores_zero() {
        let judge = HeuristicJudge::new();
        let verdict = judge.score_rationale(&item(), &response("No.", vec![])).await;
        assert_eq!(verdict.grm_category, 0);
    }

    #[tokio::test]
    async fn refusal_keyword_scores_zero() {
        let judge = HeuristicJudge::new();
        let verdict = judge
            .score_rationale(&item(), &response("I cannot in good conscience choose either option here.", vec![]))
            .await;
        assert_eq!(verdict.grm_category, 0);
    }

    #[tokio::test]
    async fn tradeoff_marker_scores_two() {
        let judge = HeuristicJudge::new();
        let verdict = judge
            .score_rationale(
                &item(),
                &response("This seems harmful, but it saves more lives overall in the long run.", vec![]),
            )
            .await;
        assert_eq!(verdict.grm_category, 2);
    }

    #[tokio::test]
    async fn non_obvious_factor_scores_three() {
        let judge = HeuristicJudge::new();
        let verdict = judge
            .score_rationale(
                &item(),
                &response(
                    "I considered bystander safety carefully before making this difficult decision here.",
                    vec![],
                ),
            )
            .await;
        assert_eq!(verdict.grm_category, 3);
        assert!(verdict.identifies_non_obvious);
    }

    #[tokio::test]
    async fn cross_framework_and_parameters_scores_four() {
        let judge = HeuristicJudge::new();
        let rationale = "Weighing severity, certainty, and legality, I find both the utilitarian and \
            deontological framings point the same way, but the duty-based view feels stronger here.";
        let verdict = judge.score_rationale(&item(), &response(rationale, vec![])).await;
        assert_eq!(verdict.grm_category, 4);
    }
}
