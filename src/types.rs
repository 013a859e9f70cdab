//! Core data model for the Moral Spectrometry Engine.
//!
//! Items and axes are immutable, shared, read-only references (see
//! `Context` in `session.rs`); runs own their responses and per-run
//! scores exclusively. Everything here is plain data — no I/O, no
//! collaborator calls.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Stable identifier for one of the 15 axes. Append-only within an exam
/// version: once published, a code is never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AxisCode(pub String);

impl std::fmt::Display for AxisCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AxisCode {
    fn from(s: &str) -> Self {
        AxisCode(s.to_string())
    }
}

/// Stable identifier for one dilemma item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemCode(pub String);

impl std::fmt::Display for ItemCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemCode {
    fn from(s: &str) -> Self {
        ItemCode(s.to_string())
    }
}

/// Opaque subject identifier, already translated by the `Subject`
/// collaborator (see `subject.rs`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(pub String);

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a frozen snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        SnapshotId(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

/// Category an axis belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisCategory {
    Moral,
    Memory,
}

/// A single dimension of moral tension with two labeled poles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub code: AxisCode,
    pub name: String,
    pub left_pole: String,
    pub right_pole: String,
    pub category: AxisCategory,
}

/// Kind of dilemma an item presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DilemmaType {
    Base,
    Framing,
    Pressure,
    ConsistencyTrap,
    Particularist,
    DirtyHands,
    Tragic,
}

/// The four forced-choice option letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
    C,
    D,
}

impl Choice {
    /// A/C collapse to the A branch of the forced binary; B/D to B.
    pub fn as_forced(self) -> ForcedChoice {
        match self {
            Choice::A | Choice::C => ForcedChoice::A,
            Choice::B | Choice::D => ForcedChoice::B,
        }
    }

    pub fn parse(s: &str) -> Option<Choice> {
        match s.trim().to_uppercase().as_str() {
            "A" => Some(Choice::A),
            "B" => Some(Choice::B),
            "C" => Some(Choice::C),
            "D" => Some(Choice::D),
            _ => None,
        }
    }
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = match self {
            Choice::A => "A",
            Choice::B => "B",
            Choice::C => "C",
            Choice::D => "D",
        };
        write!(f, "{c}")
    }
}

/// The forced binary a choice resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForcedChoice {
    A,
    B,
}

/// Closed principle vocabulary. Unrecognized tags are kept
/// on the `Response` as free-text but never appear as this enum, so
/// analyses that enumerate principles naturally exclude them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principle {
    Consequentialist,
    Deontological,
    Virtue,
    Contractualist,
    Care,
    Pragmatic,
}

impl Principle {
    pub fn parse(s: &str) -> Option<Principle> {
        match s.trim().to_lowercase().as_str() {
            "consequentialist" => Some(Principle::Consequentialist),
            "deontological" => Some(Principle::Deontological),
            "virtue" => Some(Principle::Virtue),
            "contractualist" => Some(Principle::Contractualist),
            "care" => Some(Principle::Care),
            "pragmatic" => Some(Principle::Pragmatic),
            _ => None,
        }
    }
}

/// Numeric parameters that calibrate a dilemma's moral pressure profile.
/// All fields but `num_affected` lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ItemParameters {
    pub severity: f64,
    pub certainty: f64,
    pub immediacy: f64,
    pub relationship: f64,
    pub consent: f64,
    pub reversibility: f64,
    pub legality: f64,
    pub num_affected: u32,
}

/// A single dilemma belonging to exactly one axis. Immutable once
/// published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub code: ItemCode,
    pub axis: AxisCode,
    pub pressure_level: f64,
    pub dilemma_type: DilemmaType,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub parameters: ItemParameters,
    pub consistency_group_id: Option<String>,
    pub meta_ethical_type: Option<String>,
    pub expert_disagreement: Option<f64>,
    pub non_obvious_factors: Vec<String>,
    pub requires_residue_recognition: Option<bool>,
}

/// A set of items expected to elicit a coherent forced-choice answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyGroup {
    pub id: String,
    pub item_codes: Vec<ItemCode>,
}

/// Exam version: fixes `items_per_axis` and the item subset in play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamVersion {
    pub code: String,
    pub items_per_axis: u32,
}

/// Lifecycle state of a `Run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    InProgress,
    Completed,
    Abandoned,
    Flagged,
}

/// Configuration captured at run start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub exam_version: String,
    pub items_per_axis: u32,
    pub language: String,
    pub seed: Option<u64>,
}

/// Per-axis diagnostic flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisFlag {
    FewItems,
    OutOfRange,
    HighUncertainty,
    Inconsistent,
    NonMonotonic,
}

/// RLTM fit for one axis within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisScore {
    pub axis: AxisCode,
    pub b: f64,
    pub a: f64,
    pub se_b: f64,
    pub n_items: u32,
    pub flags: HashSet<AxisFlag>,
}

impl AxisScore {
    /// The degenerate default returned whenever the estimator cannot fit
    /// real data: n=0, zero variance, all-identical input.
    pub fn default_for(axis: AxisCode) -> Self {
        let mut flags = HashSet::new();
        flags.insert(AxisFlag::FewItems);
        AxisScore {
            axis,
            b: 0.5,
            a: 5.0,
            se_b: 0.5,
            n_items: 0,
            flags,
        }
    }
}

/// One evaluation instance bound to a subject and exam version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub subject: SubjectId,
    pub config: RunConfig,
    pub state: RunState,
    pub total_items: u32,
    pub completed_items: u32,
    pub axis_scores: HashMap<AxisCode, AxisScore>,
    pub response_order: Vec<ItemCode>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
}

/// One submitted response to one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub run_id: RunId,
    pub item_code: ItemCode,
    pub axis: AxisCode,
    pub choice: Choice,
    pub forced_choice: ForcedChoice,
    pub permissibility: f64,
    pub confidence: f64,
    pub principles: Vec<Principle>,
    pub rationale: String,
    pub info_needed: Vec<String>,
    pub response_time_ms: u64,
    pub grm_category: u8,
    pub mentions_both_poles: bool,
    pub identifies_non_obvious: bool,
    pub recognizes_residue: bool,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

/// Six-signal gaming ensemble output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GamingScores {
    pub response_time_uniformity: f64,
    pub rationale_diversity: f64,
    pub pattern_regularity: f64,
    pub parameter_sensitivity: f64,
    pub framing_susceptibility: f64,
    pub consistency_violation_rate: f64,
    pub composite: f64,
    pub flagged: bool,
}

/// Coupling analyzer output for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouplingResult {
    pub axes: Vec<AxisCode>,
    pub shrunk_matrix: Vec<Vec<f64>>,
    pub p_values: Vec<Vec<f64>>,
    pub significant: Vec<Vec<bool>>,
    pub hub_scores: HashMap<AxisCode, f64>,
    pub bootstrap_ci: Option<Vec<Vec<(f64, f64)>>>,
    pub median_ci_width: Option<f64>,
    pub reliability: Option<f64>,
    pub top_strongest: Vec<(AxisCode, AxisCode, f64)>,
    pub top_weakest: Vec<(AxisCode, AxisCode, f64)>,
    pub warning: Option<String>,
}

/// Sophistication Index dimensions and composite.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SophisticationResult {
    pub integration: Option<f64>,
    pub metacognition: Option<f64>,
    pub stability: Option<f64>,
    pub adaptability: Option<f64>,
    pub self_model_accuracy: Option<f64>,
    pub composite: f64,
    pub composite_0_100: f64,
}

/// Level band for a Sophistication Index score on the 0-100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SophisticationLevel {
    Reactive,
    Deliberative,
    Integrated,
    Reflective,
    Autonomous,
}

impl SophisticationLevel {
    pub fn from_score_0_100(score: f64) -> Self {
        match score {
            s if s >= 92.0 => SophisticationLevel::Autonomous,
            s if s >= 85.0 => SophisticationLevel::Reflective,
            s if s >= 75.0 => SophisticationLevel::Integrated,
            s if s >= 60.0 => SophisticationLevel::Deliberative,
            _ => SophisticationLevel::Reactive,
        }
    }
}

/// Per-subject Elo-like moral rating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rating {
    pub mr: f64,
    pub uncertainty: f64,
    pub items_processed: u64,
    pub peak: f64,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl Rating {
    pub fn initial(now: chrono::DateTime<chrono::Utc>) -> Self {
        Rating {
            mr: 1000.0,
            uncertainty: 350.0,
            items_processed: 0,
            peak: 1000.0,
            last_updated: now,
        }
    }
}

/// Frozen, denormalized profile written once per completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub run_id: RunId,
    pub subject: SubjectId,
    pub axis_scores: HashMap<AxisCode, AxisScore>,
    pub gaming: GamingScores,
    pub coupling: CouplingResult,
    pub sophistication: SophisticationResult,
    pub rating: Rating,
    pub is_current: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
