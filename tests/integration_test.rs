//! End-to-end lifecycle tests for the Moral Spectrometry Engine core:
//! start a run, drive it to completion through `Session`, and check the
//! invariants that must hold for every run regardless of how it ends.

use mse_core::config::{EstimatorConfig, GamingConfig, RatingConfig, SelectorConfig, SessionConfig};
use mse_core::config::{CouplingConfig, SophisticationWeights, TerminationConfig};
use mse_core::error::MseError;
use mse_core::judge::HeuristicJudge;
use mse_core::session::{Context, NextItem, Session};
use mse_core::storage::{InMemoryStorage, Storage};
use mse_core::subject::PassthroughSubject;
use mse_core::types::{
    Axis, AxisCategory, AxisCode, Choice, ConsistencyGroup, DilemmaType, Item, ItemCode, ItemParameters,
};
use std::sync::Arc;

fn item(axis: &str, code: &str, pressure: f64, group: Option<&str>) -> Item {
    Item {
        code: ItemCode::from(code),
        axis: AxisCode::from(axis),
        pressure_level: pressure,
        dilemma_type: DilemmaType::Base,
        option_a: "A".to_string(),
        option_b: "B".to_string(),
        option_c: "C".to_string(),
        option_d: "D".to_string(),
        parameters: ItemParameters {
            severity: 0.5,
            certainty: 0.5,
            immediacy: 0.5,
            relationship: 0.5,
            consent: 0.5,
            reversibility: 0.5,
            legality: 0.5,
            num_affected: 1,
        },
        consistency_group_id: group.map(|g| g.to_string()),
        meta_ethical_type: None,
        expert_disagreement: None,
        non_obvious_factors: vec![],
        requires_residue_recognition: None,
    }
}

async fn build_context(items_per_axis: u32, axes: &[&str]) -> (Arc<Context>, Arc<InMemoryStorage>) {
    let storage = Arc::new(InMemoryStorage::new());
    for axis in axes {
        storage
            .seed_axis(Axis {
                code: AxisCode::from(*axis),
                name: format!("Axis {axis}"),
                left_pole: "left".to_string(),
                right_pole: "right".to_string(),
                category: AxisCategory::Moral,
            })
            .await;
        for i in 0..(items_per_axis + 2) {
            let pressure = i as f64 / (items_per_axis + 1) as f64;
            storage
                .seed_item(item(axis, &format!("{axis}-{i}"), pressure, None))
                .await;
        }
    }

    let context = Arc::new(Context {
        storage: storage.clone(),
        judge: Arc::new(HeuristicJudge::new()),
        subject: Arc::new(PassthroughSubject),
        session: SessionConfig { items_per_axis, ..SessionConfig::default() },
        selector: SelectorConfig::default(),
        estimator: EstimatorConfig::default(),
        gaming: GamingConfig::default(),
        sophistication_weights: SophisticationWeights::default(),
        coupling: CouplingConfig::default(),
        rating: RatingConfig::default(),
        termination: TerminationConfig { min_items_per_axis: 4, max_items_per_axis: 6, se_threshold: 1.0 },
    });
    (context, storage)
}

fn answer_payload(permissibility: f64) -> serde_json::Value {
    serde_json::json!({
        "choice": if permissibility >= 50.0 { "A" } else { "B" },
        "permissibility": permissibility,
        "confidence": 70.0,
        "principles": ["consequentialist"],
        "rationale": "Weighing severity and certainty, but the duty-based view still carries weight here.",
        "info_needed": [],
        "response_time_ms": 3000,
    })
}

#[tokio::test]
async fn full_run_reaches_completed_with_a_snapshot() {
    let (context, _storage) = build_context(6, &["ax1", "ax2"]).await;
    let session = Session::new(context);

    let run = session.start("agent-1", None, None, None, Some(7)).await.unwrap();
    let run_id = run.id;

    loop {
        match session.next_item(run_id).await.unwrap() {
            NextItem::Item(item) => {
                session
                    .submit_response(run_id, item.code.clone(), &answer_payload(item.pressure_level * 100.0))
                    .await
                    .unwrap();
            }
            NextItem::Complete(_) => break,
        }
    }

    let final_run = session.status(run_id).await.unwrap();
    assert!(matches!(final_run.state, mse_core::types::RunState::Completed | mse_core::types::RunState::Flagged));
    assert_eq!(final_run.axis_scores.len(), 2);

    let snapshot = session.current_profile("agent-1").await.unwrap().expect("snapshot");
    assert!(snapshot.is_current);
    assert_eq!(snapshot.axis_scores.len(), 2);
}

#[tokio::test]
async fn second_active_run_for_same_subject_is_rejected() {
    let (context, _storage) = build_context(6, &["ax1"]).await;
    let session = Session::new(context);

    session.start("agent-1", None, None, None, Some(1)).await.unwrap();
    let err = session.start("agent-1", None, None, None, Some(1)).await.unwrap_err();
    assert!(matches!(err, MseError::Conflict { .. }));
}

#[tokio::test]
async fn duplicate_response_is_rejected() {
    let (context, _storage) = build_context(6, &["ax1"]).await;
    let session = Session::new(context);

    let run = session.start("agent-1", None, None, None, Some(1)).await.unwrap();
    let item = match session.next_item(run.id).await.unwrap() {
        NextItem::Item(item) => item,
        NextItem::Complete(_) => panic!("expected an item"),
    };
    session.submit_response(run.id, item.code.clone(), &answer_payload(60.0)).await.unwrap();
    let err = session.submit_response(run.id, item.code.clone(), &answer_payload(60.0)).await.unwrap_err();
    assert!(matches!(err, MseError::Conflict { .. }));
}

#[tokio::test]
async fn responding_after_completion_is_rejected() {
    let (context, _storage) = build_context(6, &["ax1"]).await;
    let session = Session::new(context);

    let run = session.start("agent-1", None, None, None, Some(3)).await.unwrap();
    let run_id = run.id;
    let mut last_item = None;
    loop {
        match session.next_item(run_id).await.unwrap() {
            NextItem::Item(item) => {
                last_item = Some(item.clone());
                session
                    .submit_response(run_id, item.code.clone(), &answer_payload(item.pressure_level * 100.0))
                    .await
                    .unwrap();
            }
            NextItem::Complete(_) => break,
        }
    }

    let item = last_item.unwrap();
    let err = session
        .submit_response(run_id, ItemCode::from(format!("{}-unused", item.axis).as_str()), &answer_payload(50.0))
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn axis_does_not_stop_until_consistency_group_is_fully_answered() {
    let storage = Arc::new(InMemoryStorage::new());
    storage
        .seed_axis(Axis {
            code: AxisCode::from("ax1"),
            name: "Axis 1".to_string(),
            left_pole: "left".to_string(),
            right_pole: "right".to_string(),
            category: AxisCategory::Moral,
        })
        .await;
    for i in 0..8 {
        let group = if i == 6 || i == 7 { Some("grp0") } else { None };
        storage.seed_item(item("ax1", &format!("ax1-{i}"), i as f64 / 7.0, group)).await;
    }
    storage
        .seed_consistency_group(ConsistencyGroup {
            id: "grp0".to_string(),
            item_codes: vec![ItemCode::from("ax1-6"), ItemCode::from("ax1-7")],
        })
        .await;

    let context = Arc::new(Context {
        storage: storage.clone(),
        judge: Arc::new(HeuristicJudge::new()),
        subject: Arc::new(PassthroughSubject),
        session: SessionConfig { items_per_axis: 8, ..SessionConfig::default() },
        selector: SelectorConfig::default(),
        estimator: EstimatorConfig::default(),
        gaming: GamingConfig::default(),
        sophistication_weights: SophisticationWeights::default(),
        coupling: CouplingConfig::default(),
        rating: RatingConfig::default(),
        termination: TerminationConfig { min_items_per_axis: 4, max_items_per_axis: 8, se_threshold: 1.0 },
    });
    let session = Session::new(context);

    let run = session.start("agent-1", None, None, None, Some(11)).await.unwrap();
    let run_id = run.id;
    let mut answered = 0;
    loop {
        match session.next_item(run_id).await.unwrap() {
            NextItem::Item(item) => {
                session
                    .submit_response(run_id, item.code.clone(), &answer_payload(item.pressure_level * 100.0))
                    .await
                    .unwrap();
                answered += 1;
            }
            NextItem::Complete(_) => break,
        }
    }

    assert!(answered >= 4, "axis must reach the minimum item count before it is eligible to stop");
    let final_run = session.status(run_id).await.unwrap();
    let responses = storage.responses_for_run(run_id).await.unwrap();
    let answered_codes: std::collections::HashSet<_> = responses.iter().map(|r| r.item_code.clone()).collect();
    assert!(answered_codes.contains(&ItemCode::from("ax1-6")));
    assert!(answered_codes.contains(&ItemCode::from("ax1-7")));
    assert_eq!(final_run.completed_items as usize, responses.len());
}

#[tokio::test]
async fn choice_c_forces_to_a_and_short_rationale_scores_zero() {
    let (context, storage) = build_context(4, &["ax1"]).await;
    let session = Session::new(context);

    let run = session.start("agent-1", None, None, None, Some(5)).await.unwrap();
    let item = match session.next_item(run.id).await.unwrap() {
        NextItem::Item(item) => item,
        NextItem::Complete(_) => panic!("expected an item"),
    };
    let updated = session
        .submit_response(
            run.id,
            item.code.clone(),
            &serde_json::json!({
                "choice": "C",
                "permissibility": 40.0,
                "confidence": 60.0,
                "principles": ["virtue"],
                "rationale": "Short reply.",
                "response_time_ms": 1200,
            }),
        )
        .await
        .unwrap();

    assert_eq!(updated.completed_items, 1);
    let responses = storage.responses_for_run(run.id).await.unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].choice, Choice::C);
    assert_eq!(responses[0].forced_choice, mse_core::types::ForcedChoice::A);
    assert_eq!(responses[0].grm_category, 0);
}
