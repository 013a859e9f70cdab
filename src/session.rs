//! Session / orchestrator: the `Run` state machine, termination
//! criteria, and snapshot emission.
//!
//! `Context` holds every collaborator and config struct explicitly and
//! is threaded through by reference — no module-level singletons or
//! global mutable state anywhere in this crate.

use crate::config::{
    CouplingConfig, EstimatorConfig, GamingConfig, RatingConfig, SelectorConfig, SessionConfig,
    SophisticationWeights, TerminationConfig,
};
use crate::error::{MseError, MseResult};
use crate::judge::{HeuristicJudge, Judge};
use crate::selector::{AxisState, Selector};
use crate::sophistication::SophisticationInputs;
use crate::storage::Storage;
use crate::subject::Subject;
use crate::types::{
    AxisCode, AxisScore, Item, ItemCode, Rating, Response, Run, RunConfig, RunId, RunState,
    Snapshot, SnapshotId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything the orchestrator needs, constructed once per process (or
/// per test) and shared across runs.
pub struct Context {
    pub storage: Arc<dyn Storage>,
    pub judge: Arc<dyn Judge>,
    pub subject: Arc<dyn Subject>,
    pub session: SessionConfig,
    pub selector: SelectorConfig,
    pub estimator: EstimatorConfig,
    pub gaming: GamingConfig,
    pub sophistication_weights: SophisticationWeights,
    pub coupling: CouplingConfig,
    pub rating: RatingConfig,
    pub termination: TerminationConfig,
}

/// What `next_item` returns: either a dilemma to present, or a
/// completion descriptor for a run that has already finished. Fetching
/// the next item on a completed run returns the descriptor, not an item.
#[derive(Debug, Clone)]
pub enum NextItem {
    Item(Item),
    Complete(CompletionDescriptor),
}

#[derive(Debug, Clone)]
pub struct CompletionDescriptor {
    pub run_id: RunId,
    pub state: RunState,
    pub completed_items: u32,
    pub total_items: u32,
}

/// The orchestrator. Stateless beyond its `Context` reference — all
/// mutable state lives in `Storage`.
pub struct Session {
    context: Arc<Context>,
}

impl Session {
    pub fn new(context: Arc<Context>) -> Self {
        Session { context }
    }

    /// `POST /evaluations`.
    pub async fn start(
        &self,
        agent_id: &str,
        exam_version: Option<String>,
        items_per_axis: Option<u32>,
        language: Option<String>,
        seed: Option<u64>,
    ) -> MseResult<Run> {
        let subject = self.context.subject.resolve(agent_id);
        if self.context.storage.active_run_for_subject(&subject).await?.is_some() {
            return Err(MseError::Conflict {
                reason: format!("subject {subject} already has an active run"),
            });
        }

        let axes = self.context.storage.list_axes().await?;
        let items_per_axis = items_per_axis.unwrap_or(self.context.session.items_per_axis);
        let total_items = items_per_axis * axes.len() as u32;
        let now = chrono::Utc::now();

        let run = Run {
            id: RunId::new(),
            subject,
            config: RunConfig {
                exam_version: exam_version.unwrap_or_else(|| self.context.session.exam_version.clone()),
                items_per_axis,
                language: language.unwrap_or_else(|| self.context.session.language.clone()),
                seed: seed.or(self.context.session.seed),
            },
            state: RunState::InProgress,
            total_items,
            completed_items: 0,
            axis_scores: HashMap::new(),
            response_order: Vec::new(),
            created_at: now,
            last_activity_at: now,
        };

        self.context.storage.create_run(run.clone()).await?;
        tracing::debug!(run_id = %run.id, subject = %run.subject, total_items, "run started");
        Ok(run)
    }

    /// `GET /evaluations/{run_id}/next`.
    pub async fn next_item(&self, run_id: RunId) -> MseResult<NextItem> {
        let run = self.context.storage.get_run(run_id).await?;
        if run.state != RunState::InProgress {
            return Ok(NextItem::Complete(CompletionDescriptor {
                run_id,
                state: run.state,
                completed_items: run.completed_items,
                total_items: run.total_items,
            }));
        }

        let responses = self.context.storage.responses_for_run(run_id).await?;
        let axes = self.context.storage.list_axes().await?;
        let mut items_by_code: HashMap<ItemCode, Item> = HashMap::new();
        let mut per_axis_items: HashMap<AxisCode, Vec<Item>> = HashMap::new();
        for axis in &axes {
            let items = self
                .context
                .storage
                .items_for_axis(&axis.code, &run.config.exam_version)
                .await?;
            for item in &items {
                items_by_code.insert(item.code.clone(), item.clone());
            }
            per_axis_items.insert(axis.code.clone(), items);
        }

        let answered: std::collections::HashSet<ItemCode> =
            responses.iter().map(|r| r.item_code.clone()).collect();

        let used_item_positions: HashMap<ItemCode, usize> = run
            .response_order
            .iter()
            .enumerate()
            .map(|(pos, code)| (code.clone(), pos))
            .collect();

        let mut axis_states_owned: Vec<(AxisCode, Vec<Item>, Vec<Response>, AxisScore, usize)> = Vec::new();
        for axis in &axes {
            let axis_responses: Vec<Response> = responses
                .iter()
                .filter(|r| r.axis == axis.code)
                .cloned()
                .collect();
            let axis_score = run
                .axis_scores
                .get(&axis.code)
                .cloned()
                .unwrap_or_else(|| AxisScore::default_for(axis.code.clone()));

            let used: std::collections::HashSet<ItemCode> =
                axis_responses.iter().map(|r| r.item_code.clone()).collect();
            let available: Vec<Item> = per_axis_items[&axis.code]
                .iter()
                .filter(|i| !used.contains(&i.code))
                .cloned()
                .collect();

            let max_items = if self.is_axis_stopped(&axis_score, &per_axis_items[&axis.code], &answered) {
                axis_responses.len()
            } else {
                self.context.termination.max_items_per_axis as usize
            };

            axis_states_owned.push((axis.code.clone(), available, axis_responses, axis_score, max_items));
        }

        let axis_states: Vec<AxisState> = axis_states_owned
            .iter()
            .map(|(axis, available, responses, score, max_items)| AxisState {
                axis: axis.clone(),
                available_items: available.iter().collect(),
                ordered_responses: responses.iter().collect(),
                axis_score: score.clone(),
                max_items: *max_items,
            })
            .collect();

        let seed = run.config.seed.unwrap_or(0) ^ (run.completed_items as u64);
        let mut selector = Selector::new(seed, self.context.selector);
        let chosen = selector.select_next(
            &axis_states,
            &used_item_positions,
            &items_by_code,
            run.response_order.len(),
        );

        match chosen {
            Some(item_code) => Ok(NextItem::Item(items_by_code[&item_code].clone())),
            None => Ok(NextItem::Complete(CompletionDescriptor {
                run_id,
                state: run.state,
                completed_items: run.completed_items,
                total_items: run.total_items,
            })),
        }
    }

    /// `POST /evaluations/{run_id}/responses`.
    pub async fn submit_response(
        &self,
        run_id: RunId,
        item_code: ItemCode,
        raw_payload: &serde_json::Value,
    ) -> MseResult<Run> {
        let _guard = self.context.storage.lock_run(run_id).await;

        let run = self.context.storage.get_run(run_id).await?;
        if run.state != RunState::InProgress {
            return Err(MseError::RunAlreadyComplete);
        }
        if self.context.storage.response_exists(run_id, &item_code).await? {
            return Err(MseError::Conflict {
                reason: "duplicate_response".to_string(),
            });
        }

        let item = self.context.storage.get_item(&item_code).await?;
        let now = chrono::Utc::now();
        let (mut response, warnings) = crate::parser::parse_response(
            raw_payload,
            run_id,
            item_code.clone(),
            item.axis.clone(),
            now,
        )
        .map_err(|e| MseError::Validation {
            field: e.issues.first().map(|i| i.field.clone()).unwrap_or_default(),
            reason: e.issues.first().map(|i| i.reason.clone()).unwrap_or_default(),
        })?;
        for warning in &warnings {
            tracing::debug!(field = %warning.field, message = %warning.message, "response parse warning");
        }

        let verdict = match tokio::time::timeout(
            self.context.session.judge_timeout,
            self.context.judge.score_rationale(&item, &response),
        )
        .await
        {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(run_id = %run_id, "judge timed out, falling back to heuristic");
                HeuristicJudge::new().score_rationale(&item, &response).await
            }
        };
        response.grm_category = verdict.grm_category;
        response.mentions_both_poles = verdict.mentions_both_poles;
        response.identifies_non_obvious = verdict.identifies_non_obvious;
        response.recognizes_residue = verdict.recognizes_residue;

        retry_with_backoff(|| self.context.storage.append_response(response.clone())).await?;

        let mut run = self.context.storage.get_run(run_id).await?;
        run.completed_items += 1;
        run.response_order.push(item_code.clone());
        run.last_activity_at = now;

        let axis_items = self
            .context
            .storage
            .items_for_axis(&item.axis, &run.config.exam_version)
            .await?;
        let axis_items_by_code: HashMap<ItemCode, Item> =
            axis_items.into_iter().map(|i| (i.code.clone(), i)).collect();
        let axis_responses: Vec<Response> = self
            .context
            .storage
            .responses_for_run(run_id)
            .await?
            .into_iter()
            .filter(|r| r.axis == item.axis)
            .collect();
        let observations: Vec<crate::estimator::Observation> = axis_responses
            .iter()
            .filter_map(|r| {
                axis_items_by_code.get(&r.item_code).map(|i| crate::estimator::Observation {
                    pressure: i.pressure_level,
                    permissibility: r.permissibility,
                })
            })
            .collect();
        let axis_score = crate::estimator::fit(item.axis.clone(), &observations, &self.context.estimator);
        run.axis_scores.insert(item.axis.clone(), axis_score);

        let item_difficulty = crate::rating::item_difficulty(
            item.pressure_level,
            item.dilemma_type,
            item.expert_disagreement,
            &self.context.rating,
        );
        let current_rating = self
            .context
            .storage
            .get_rating(&run.subject)
            .await?
            .unwrap_or_else(|| Rating::initial(now));
        let updated_rating = crate::rating::update_rating(
            current_rating,
            item_difficulty,
            response.grm_category,
            &self.context.rating,
            now,
        );
        self.context.storage.save_rating(run.subject.clone(), updated_rating).await?;

        if self.run_should_complete(&run).await? {
            run = self.finalize(run).await?;
        } else {
            self.context.storage.update_run(run.clone()).await?;
        }

        Ok(run)
    }

    /// An axis stops accepting new items once it hits the hard item cap,
    /// or once it has enough items, a tight enough standard error, and
    /// every consistency group touched on the axis is fully answered
    ///. Consistency groups are assumed axis-local: a
    /// paraphrase trap and its anchor live on the same axis.
    fn is_axis_stopped(
        &self,
        score: &AxisScore,
        axis_items: &[Item],
        answered: &std::collections::HashSet<ItemCode>,
    ) -> bool {
        let n = score.n_items;
        if n >= self.context.termination.max_items_per_axis {
            return true;
        }
        if n < self.context.termination.min_items_per_axis {
            return false;
        }
        if score.se_b > self.context.termination.se_threshold {
            return false;
        }

        let mut by_group: HashMap<&str, Vec<&ItemCode>> = HashMap::new();
        for item in axis_items {
            if let Some(group_id) = &item.consistency_group_id {
                by_group.entry(group_id.as_str()).or_default().push(&item.code);
            }
        }
        by_group.values().all(|codes| codes.iter().all(|c| answered.contains(*c)))
    }

    async fn run_should_complete(&self, run: &Run) -> MseResult<bool> {
        if run.completed_items >= run.total_items {
            return Ok(true);
        }
        let axes = self.context.storage.list_axes().await?;
        let responses = self.context.storage.responses_for_run(run.id).await?;
        let answered: std::collections::HashSet<ItemCode> =
            responses.iter().map(|r| r.item_code.clone()).collect();
        for axis in &axes {
            let axis_items = self
                .context
                .storage
                .items_for_axis(&axis.code, &run.config.exam_version)
                .await?;
            let score = match run.axis_scores.get(&axis.code) {
                Some(s) => s,
                None => return Ok(false),
            };
            if !self.is_axis_stopped(score, &axis_items, &answered) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Finalize a run: refit all axes one last time, run gaming,
    /// coupling, sophistication, commit a snapshot and clear the prior
    /// `is_current` flag.
    async fn finalize(&self, mut run: Run) -> MseResult<Run> {
        let responses = self.context.storage.responses_for_run(run.id).await?;
        let axes = self.context.storage.list_axes().await?;
        let mut items_by_code: HashMap<ItemCode, Item> = HashMap::new();
        for axis in &axes {
            for item in self
                .context
                .storage
                .items_for_axis(&axis.code, &run.config.exam_version)
                .await?
            {
                items_by_code.insert(item.code.clone(), item);
            }
        }

        for axis in &axes {
            let axis_responses: Vec<crate::estimator::Observation> = responses
                .iter()
                .filter(|r| r.axis == axis.code)
                .filter_map(|r| {
                    items_by_code.get(&r.item_code).map(|item| crate::estimator::Observation {
                        pressure: item.pressure_level,
                        permissibility: r.permissibility,
                    })
                })
                .collect();
            let score = crate::estimator::fit(axis.code.clone(), &axis_responses, &self.context.estimator);
            run.axis_scores.insert(axis.code.clone(), score);
        }

        let gaming = crate::gaming::gaming_score(&responses, &items_by_code, &self.context.gaming);
        if gaming.flagged {
            for score in run.axis_scores.values_mut() {
                score.se_b *= self.context.gaming.se_inflation_on_flag;
            }
        }

        let mut by_axis_permissibility: HashMap<AxisCode, Vec<f64>> = HashMap::new();
        for r in &responses {
            by_axis_permissibility.entry(r.axis.clone()).or_default().push(r.permissibility);
        }
        let seed = run.config.seed.unwrap_or(0);
        let coupling = crate::coupling::analyze(
            &by_axis_permissibility,
            &self.context.coupling,
            seed,
            self.context.session.bootstrap_budget,
        );

        let history = self.context.storage.snapshot_history(&run.subject, 10).await?;
        let axis_b_values: HashMap<AxisCode, f64> =
            run.axis_scores.iter().map(|(k, v)| (k.clone(), v.b)).collect();
        let difficulty_confidence_pairs: Vec<(f64, f64)> = responses
            .iter()
            .filter_map(|r| items_by_code.get(&r.item_code).map(|item| (item.pressure_level, r.confidence)))
            .collect();
        let self_model = self.context.storage.self_model_predictions(run.id).await?;
        let predicted_vs_actual_b: Vec<(f64, f64)> = self_model
            .into_iter()
            .filter_map(|(axis, predicted)| run.axis_scores.get(&axis).map(|s| (predicted, s.b)))
            .collect();

        let (delta_b_series, run_indices, mean_se_series) = build_history_series(&history, &run);

        let sophistication_inputs = SophisticationInputs {
            coherence_score: None,
            variance_explained: None,
            axis_b_values,
            axis_tradition: HashMap::new(),
            calibration: None,
            info_seeking: None,
            moral_humility: None,
            difficulty_confidence_pairs,
            consistency: None,
            moral_coherence: None,
            gaming_composite: gaming.composite,
            consistency_trap_agreement_mean: Some(1.0 - gaming.consistency_violation_rate),
            delta_b_series,
            run_indices,
            mean_se_series,
            mean_delta_procedural: None,
            snapshot_history_len: history.len() + 1,
            predicted_vs_actual_b,
        };
        let weights: crate::sophistication::Weights = (&self.context.sophistication_weights).into();
        let sophistication = crate::sophistication::compute(&sophistication_inputs, &weights);

        let rating = self
            .context
            .storage
            .get_rating(&run.subject)
            .await?
            .unwrap_or_else(|| Rating::initial(chrono::Utc::now()));

        run.state = if gaming.flagged { RunState::Flagged } else { RunState::Completed };
        self.context.storage.update_run(run.clone()).await?;

        let snapshot = Snapshot {
            id: SnapshotId::new(),
            run_id: run.id,
            subject: run.subject.clone(),
            axis_scores: run.axis_scores.clone(),
            gaming,
            coupling,
            sophistication,
            rating,
            is_current: true,
            created_at: chrono::Utc::now(),
        };
        self.context.storage.save_snapshot(snapshot.clone()).await?;
        self.context.storage.mark_snapshot_current(snapshot.id).await?;

        tracing::debug!(run_id = %run.id, state = ?run.state, "run finalized");
        Ok(run)
    }

    /// `GET /evaluations/{run_id}`.
    pub async fn status(&self, run_id: RunId) -> MseResult<Run> {
        self.context.storage.get_run(run_id).await
    }

    /// `agent_id` must already resolve to an existing subject.
    pub async fn current_profile(&self, agent_id: &str) -> MseResult<Option<Snapshot>> {
        let subject = self.context.subject.resolve(agent_id);
        self.context.storage.latest_snapshot(&subject).await
    }

    pub async fn profile_history(&self, agent_id: &str, limit: usize) -> MseResult<Vec<Snapshot>> {
        let subject = self.context.subject.resolve(agent_id);
        self.context.storage.snapshot_history(&subject, limit).await
    }
}

fn build_history_series(history: &[Snapshot], current_run: &Run) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    if history.is_empty() {
        return (Vec::new(), Vec::new(), Vec::new());
    }
    let mut ordered = history.to_vec();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let mean_b: Vec<f64> = ordered
        .iter()
        .map(|s| {
            let values: Vec<f64> = s.axis_scores.values().map(|a| a.b).collect();
            if values.is_empty() {
                0.5
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        })
        .collect();
    let mean_se: Vec<f64> = ordered
        .iter()
        .map(|s| {
            let values: Vec<f64> = s.axis_scores.values().map(|a| a.se_b).collect();
            if values.is_empty() {
                0.5
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        })
        .collect();

    let current_mean_b = {
        let values: Vec<f64> = current_run.axis_scores.values().map(|a| a.b).collect();
        if values.is_empty() {
            0.5
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    };
    let mut deltas: Vec<f64> = mean_b.windows(2).map(|w| w[1] - w[0]).collect();
    deltas.push(current_mean_b - *mean_b.last().unwrap());

    let run_indices: Vec<f64> = (0..mean_se.len()).map(|i| i as f64).collect();

    (deltas, run_indices, mean_se)
}

/// Retries a storage operation up to 3 times with exponential backoff
///. `InMemoryStorage` never fails this
/// way, but the wrapper exists so a real backend can be swapped in
/// without touching `Session`.
async fn retry_with_backoff<F, Fut>(mut op: F) -> MseResult<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = MseResult<()>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(MseError::StorageFailure(_)) if attempt < 3 => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt))).await;
            }
            Err(e) => return Err(e),
        }
    }
}
