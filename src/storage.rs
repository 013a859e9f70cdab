//! Storage collaborator contract plus an in-memory default
//! implementation.
//!
//! One `tokio::sync::Mutex` per `RunId`, created lazily, so different
//! subjects' runs stay independently concurrent while writers to the
//! same run serialize.

use crate::error::{MseError, MseResult};
use crate::types::{
    Axis, AxisCode, ConsistencyGroup, Item, ItemCode, Rating, Response, Run, RunId, Snapshot,
    SubjectId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The persistence contract the core depends on. Never
/// implements HTTP or SQL directly — those live in an external adapter.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn list_axes(&self) -> MseResult<Vec<Axis>>;
    async fn get_axis(&self, code: &AxisCode) -> MseResult<Axis>;

    async fn items_for_axis(&self, axis: &AxisCode, version: &str) -> MseResult<Vec<Item>>;
    async fn get_item(&self, code: &ItemCode) -> MseResult<Item>;
    async fn consistency_group(&self, id: &str) -> MseResult<Option<ConsistencyGroup>>;

    async fn create_run(&self, run: Run) -> MseResult<()>;
    async fn get_run(&self, id: RunId) -> MseResult<Run>;
    async fn update_run(&self, run: Run) -> MseResult<()>;
    async fn active_run_for_subject(&self, subject: &SubjectId) -> MseResult<Option<Run>>;

    async fn append_response(&self, response: Response) -> MseResult<()>;
    async fn responses_for_run(&self, id: RunId) -> MseResult<Vec<Response>>;
    async fn response_exists(&self, run_id: RunId, item_code: &ItemCode) -> MseResult<bool>;

    async fn save_snapshot(&self, snapshot: Snapshot) -> MseResult<()>;
    async fn latest_snapshot(&self, subject: &SubjectId) -> MseResult<Option<Snapshot>>;
    async fn snapshot_history(&self, subject: &SubjectId, limit: usize) -> MseResult<Vec<Snapshot>>;
    async fn mark_snapshot_current(&self, snapshot_id: crate::types::SnapshotId) -> MseResult<()>;

    async fn get_rating(&self, subject: &SubjectId) -> MseResult<Option<Rating>>;
    async fn save_rating(&self, subject: SubjectId, rating: Rating) -> MseResult<()>;

    async fn self_model_predictions(&self, run_id: RunId) -> MseResult<Vec<(AxisCode, f64)>>;

    /// Acquire the logical per-run lock for the duration of a
    /// `submit_response` call.
    async fn lock_run(&self, run_id: RunId) -> OwnedMutexGuard<()>;
}

#[derive(Default)]
struct StorageState {
    axes: HashMap<AxisCode, Axis>,
    items: HashMap<ItemCode, Item>,
    consistency_groups: HashMap<String, ConsistencyGroup>,
    runs: HashMap<RunId, Run>,
    responses: HashMap<RunId, Vec<Response>>,
    snapshots_by_subject: HashMap<SubjectId, Vec<Snapshot>>,
    ratings: HashMap<SubjectId, Rating>,
    self_model_predictions: HashMap<RunId, Vec<(AxisCode, f64)>>,
}

/// In-memory `Storage` implementation: the default collaborator wired
/// up by the demo binary and exercised by the integration tests. A real
/// deployment swaps this for a database-backed adapter without touching
/// `Session`.
pub struct InMemoryStorage {
    state: Mutex<StorageState>,
    run_locks: Mutex<HashMap<RunId, Arc<Mutex<()>>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        InMemoryStorage {
            state: Mutex::new(StorageState::default()),
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn seed_axis(&self, axis: Axis) {
        self.state.lock().await.axes.insert(axis.code.clone(), axis);
    }

    pub async fn seed_item(&self, item: Item) {
        self.state.lock().await.items.insert(item.code.clone(), item);
    }

    pub async fn seed_consistency_group(&self, group: ConsistencyGroup) {
        self.state
            .lock()
            .await
            .consistency_groups
            .insert(group.id.clone(), group);
    }

    pub async fn seed_self_model_prediction(&self, run_id: RunId, axis: AxisCode, predicted_b: f64) {
        self.state
            .lock()
            .await
            .self_model_predictions
            .entry(run_id)
            .or_default()
            .push((axis, predicted_b));
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn list_axes(&self) -> MseResult<Vec<Axis>> {
        Ok(self.state.lock().await.axes.values().cloned().collect())
    }

    async fn get_axis(&self, code: &AxisCode) -> MseResult<Axis> {
        self.state
            .lock()
            .await
            .axes
            .get(code)
            .cloned()
            .ok_or_else(|| MseError::NotFound {
                kind: "axis",
                id: code.to_string(),
            })
    }

    async fn items_for_axis(&self, axis: &AxisCode, _version: &str) -> MseResult<Vec<Item>> {
        Ok(self
            .state
            .lock()
            .await
            .items
            .values()
            .filter(|i| &i.axis == axis)
            .cloned()
            .collect())
    }

    async fn get_item(&self, code: &ItemCode) -> MseResult<Item> {
        self.state
            .lock()
            .await
            .items
            .get(code)
            .cloned()
            .ok_or_else(|| MseError::NotFound {
                kind: "item",
                id: code.to_string(),
            })
    }

    async fn consistency_group(&self, id: &str) -> MseResult<Option<ConsistencyGroup>> {
        Ok(self.state.lock().await.consistency_groups.get(id).cloned())
    }

    async fn create_run(&self, run: Run) -> MseResult<()> {
        let mut state = self.state.lock().await;
        if state
            .runs
            .values()
            .any(|r| r.subject == run.subject && r.state == crate::types::RunState::InProgress)
        {
            return Err(MseError::Conflict {
                reason: format!("subject {} already has an active run", run.subject),
            });
        }
        state.responses.insert(run.id, Vec::new());
        state.runs.insert(run.id, run);
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> MseResult<Run> {
        self.state
            .lock()
            .await
            .runs
            .get(&id)
            .cloned()
            .ok_or_else(|| MseError::NotFound {
                kind: "run",
                id: id.to_string(),
            })
    }

    async fn update_run(&self, run: Run) -> MseResult<()> {
        let mut state = self.state.lock().await;
        if !state.runs.contains_key(&run.id) {
            return Err(MseError::NotFound {
                kind: "run",
                id: run.id.to_string(),
            });
        }
        state.runs.insert(run.id, run);
        Ok(())
    }

    async fn active_run_for_subject(&self, subject: &SubjectId) -> MseResult<Option<Run>> {
        Ok(self
            .state
            .lock()
            .await
            .runs
            .values()
            .find(|r| &r.subject == subject && r.state == crate::types::RunState::InProgress)
            .cloned())
    }

    async fn append_response(&self, response: Response) -> MseResult<()> {
        let mut state = self.state.lock().await;
        let exists = state
            .responses
            .get(&response.run_id)
            .map(|rs| rs.iter().any(|r| r.item_code == response.item_code))
            .unwrap_or(false);
        if exists {
            return Err(MseError::Conflict {
                reason: format!("duplicate response for item {}", response.item_code),
            });
        }
        state.responses.entry(response.run_id).or_default().push(response);
        Ok(())
    }

    async fn responses_for_run(&self, id: RunId) -> MseResult<Vec<Response>> {
        Ok(self.state.lock().await.responses.get(&id).cloned().unwrap_or_default())
    }

    async fn response_exists(&self, run_id: RunId, item_code: &ItemCode) -> MseResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .responses
            .get(&run_id)
            .map(|rs| rs.iter().any(|r| &r.item_code == item_code))
            .unwrap_or(false))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> MseResult<()> {
        self.state
            .lock()
            .await
            .snapshots_by_subject
            .entry(snapshot.subject.clone())
            .or_default()
            .push(snapshot);
        Ok(())
    }

    async fn latest_snapshot(&self, subject: &SubjectId) -> MseResult<Option<Snapshot>> {
        Ok(self
            .state
            .lock()
            .await
            .snapshots_by_subject
            .get(subject)
            .and_then(|snaps| snaps.iter().find(|s| s.is_current).cloned()))
    }

    async fn snapshot_history(&self, subject: &SubjectId, limit: usize) -> MseResult<Vec<Snapshot>> {
        let state = self.state.lock().await;
        let mut snaps = state.snapshots_by_subject.get(subject).cloned().unwrap_or_default();
        snaps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snaps.truncate(limit);
        Ok(snaps)
    }

    async fn mark_snapshot_current(&self, snapshot_id: crate::types::SnapshotId) -> MseResult<()> {
        let mut state = self.state.lock().await;
        let mut found = false;
        for snaps in state.snapshots_by_subject.values_mut() {
            for snap in snaps.iter_mut() {
                if snap.id == snapshot_id {
                    snap.is_current = true;
                    found = true;
                } else {
                    snap.is_current = false;
                }
            }
        }
        if found {
            Ok(())
        } else {
            Err(MseError::NotFound {
                kind: "snapshot",
                id: format!("{:?}", snapshot_id.0),
            })
        }
    }

    async fn get_rating(&self, subject: &SubjectId) -> MseResult<Option<Rating>> {
        Ok(self.state.lock().await.ratings.get(subject).copied())
    }

    async fn save_rating(&self, subject: SubjectId, rating: Rating) -> MseResult<()> {
        self.state.lock().await.ratings.insert(subject, rating);
        Ok(())
    }

    async fn self_model_predictions(&self, run_id: RunId) -> MseResult<Vec<(AxisCode, f64)>> {
        Ok(self
            .state
            .lock()
            .await
            .self_model_predictions
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn lock_run(&self, run_id: RunId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.run_locks.lock().await;
            locks.entry(run_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AxisCategory, RunConfig, RunState};

    fn axis() -> Axis {
        Axis {
            code: AxisCode::from("ax1"),
            name: "Test axis".to_string(),
            left_pole: "left".to_string(),
            right_pole: "right".to_string(),
            category: AxisCategory::Moral,
        }
    }

    fn run(subject: &str) -> Run {
        let now = chrono::Utc::now();
        Run {
            id: RunId::new(),
            subject: SubjectId(subject.to_string()),
            config: RunConfig {
                exam_version: "v2.1".to_string(),
                items_per_axis: 18,
                language: "en".to_string(),
                seed: Some(1),
            },
            state: RunState::InProgress,
            total_items: 18,
            completed_items: 0,
            axis_scores: HashMap::new(),
            response_order: Vec::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    #[tokio::test]
    async fn rejects_second_active_run_for_same_subject() {
        let storage = InMemoryStorage::new();
        storage.create_run(run("subject-1")).await.unwrap();
        let result = storage.create_run(run("subject-1")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn seeded_axis_is_retrievable() {
        let storage = InMemoryStorage::new();
        storage.seed_axis(axis()).await;
        let fetched = storage.get_axis(&AxisCode::from("ax1")).await.unwrap();
        assert_eq!(fetched.name, "Test axis");
    }

    #[tokio::test]
    async fn per_run_locks_are_independent() {
        let storage = InMemoryStorage::new();
        let run_a = RunId::new();
        let run_b = RunId::new();
        let guard_a = storage.lock_run(run_a).await;
        let guard_b = storage.lock_run(run_b).await;
        drop(guard_a);
        drop(guard_b);
    }
}
