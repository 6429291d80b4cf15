//! Quality-level decisions for the next segment of every tracked object.
//!
//! The engine is stateless across cycles apart from its strategy and the RNG
//! behind the Random baseline: each call to [`AbrEngine::decide`] is a function
//! of the candidates (object, utility, predicted visibility), the byte budget
//! and the buffer occupancy snapshot taken by the playback scheduler.
pub mod allocate;
pub mod bola;
pub mod replay;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::budget::BudgetSnapshot;
use crate::object::{ObjectId, TrackedObject};
use crate::playback::BufferOccupancySnapshot;

pub use bola::BolaParams;
pub use replay::{ReplayEntry, ReplayError, ReplayTable};

/// Highest level the Random baseline draws, regardless of catalog depth.
pub const RANDOM_MAX_LEVEL: usize = 3;

/// Fixed level for objects whose name contains `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityOverride {
    pub pattern: String,
    pub level: usize,
}

/// Level selection strategy with its parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy")]
pub enum AbrStrategy {
    #[serde(rename = "Random1")]
    Random,
    #[default]
    #[serde(rename = "Greedy2")]
    Greedy,
    #[serde(rename = "Uniform2")]
    Uniform,
    #[serde(rename = "Bola1")]
    Bola(BolaParams),
    FromFileInput {
        #[serde(default)]
        table: ReplayTable,
    },
    HighestQuality,
    CustomQuality {
        #[serde(default)]
        overrides: Vec<QualityOverride>,
    },
}

impl AbrStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbrStrategy::Random => "Random1",
            AbrStrategy::Greedy => "Greedy2",
            AbrStrategy::Uniform => "Uniform2",
            AbrStrategy::Bola(_) => "Bola1",
            AbrStrategy::FromFileInput { .. } => "FromFileInput",
            AbrStrategy::HighestQuality => "HighestQuality",
            AbrStrategy::CustomQuality { .. } => "CustomQuality",
        }
    }

    /// Whether candidates need utilities from the active metric.
    pub fn uses_utility(&self) -> bool {
        matches!(self, AbrStrategy::Greedy | AbrStrategy::Uniform)
    }

    /// How far ahead visibility should be predicted for `segment_no`.
    ///
    /// `None` for strategies that ignore visibility. Greedy2 and Uniform2 look
    /// as far ahead as the buffer reaches; Bola1 looks to the time the segment
    /// will be played.
    pub fn prediction_horizon_secs(&self, segment_no: u32, occupancy: &BufferOccupancySnapshot) -> Option<f64> {
        match self {
            AbrStrategy::Greedy | AbrStrategy::Uniform => Some(occupancy.occupancy_secs()),
            AbrStrategy::Bola(_) => {
                if occupancy.target_fps == 0 {
                    return Some(0.0);
                }
                let frames = f64::from(segment_no) - f64::from(occupancy.next_frame_no) - 1.0;
                Some((frames / f64::from(occupancy.target_fps)).max(0.0))
            }
            _ => None,
        }
    }
}

/// One object's inputs to a decision.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub object: &'a TrackedObject,
    pub utility: f64,
    pub visible: bool,
}

impl<'a> Candidate<'a> {
    pub fn new(object: &'a TrackedObject, utility: f64, visible: bool) -> Self {
        Self {
            object,
            utility,
            visible,
        }
    }
}

/// Level chosen for one object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelAssignment {
    pub object_id: ObjectId,
    pub level: usize,
    pub utility: f64,
    pub predicted_visible: bool,
}

/// Outcome of one decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbrDecision {
    pub segment_no: u32,
    pub strategy: &'static str,
    pub byte_budget: f64,
    /// Bytes of the assigned levels that exist in each catalog.
    pub used_bytes: u64,
    pub assignments: Vec<LevelAssignment>,
}

impl AbrDecision {
    pub fn level_for(&self, object_id: ObjectId) -> Option<usize> {
        self.assignments
            .iter()
            .find(|a| a.object_id == object_id)
            .map(|a| a.level)
    }
}

pub struct AbrEngine {
    strategy: AbrStrategy,
    rng: StdRng,
}

impl AbrEngine {
    pub fn new(strategy: AbrStrategy) -> Self {
        Self {
            strategy,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic Random baseline, for replays and tests.
    pub fn with_seed(strategy: AbrStrategy, seed: u64) -> Self {
        Self {
            strategy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn strategy(&self) -> &AbrStrategy {
        &self.strategy
    }

    /// Assigns a level to every candidate for `segment_no`.
    ///
    /// # Guarantees
    /// * Zero candidates yield an empty assignment list.
    /// * Greedy2 and Uniform2 never exceed the budget beyond the level-0 floor.
    /// * Missing replay entries degrade to level 0 with a warning, never an error.
    pub fn decide(
        &mut self,
        segment_no: u32,
        candidates: &[Candidate<'_>],
        budget: &BudgetSnapshot,
        occupancy: &BufferOccupancySnapshot,
    ) -> AbrDecision {
        let byte_budget = budget.byte_budget();
        let assignments: Vec<LevelAssignment> = match &self.strategy {
            AbrStrategy::Random => candidates
                .iter()
                .map(|c| fixed(c, self.rng.gen_range(0..=RANDOM_MAX_LEVEL)))
                .collect(),
            AbrStrategy::HighestQuality => candidates
                .iter()
                .map(|c| fixed(c, c.object.max_level()))
                .collect(),
            AbrStrategy::CustomQuality { overrides } => candidates
                .iter()
                .map(|c| {
                    let level = overrides
                        .iter()
                        .find(|o| c.object.name().contains(o.pattern.as_str()))
                        .map_or(0, |o| o.level);
                    fixed(c, clamp_level(c.object, level, "CustomQuality"))
                })
                .collect(),
            AbrStrategy::FromFileInput { table } => candidates
                .iter()
                .map(|c| {
                    let level = table.lookup(c.object.name(), segment_no).unwrap_or_else(|| {
                        warn!(
                            object = c.object.name(),
                            segment_no, "no replay entry for object; using level 0"
                        );
                        0
                    });
                    fixed(c, clamp_level(c.object, level, "FromFileInput"))
                })
                .collect(),
            AbrStrategy::Greedy => allocate::greedy(candidates, byte_budget),
            AbrStrategy::Uniform => allocate::uniform(candidates, byte_budget),
            AbrStrategy::Bola(params) => bola::bola(
                candidates,
                params,
                budget.segment_duration_secs,
                occupancy.occupancy_secs(),
            ),
        };

        let used_bytes = candidates
            .iter()
            .filter_map(|c| {
                let level = assignments
                    .iter()
                    .find(|a| a.object_id == c.object.id())?
                    .level;
                c.object.level_size(level)
            })
            .fold(0u64, u64::saturating_add);

        debug!(
            segment_no,
            strategy = self.strategy.as_str(),
            byte_budget,
            used_bytes,
            objects = assignments.len(),
            "abr decision"
        );

        AbrDecision {
            segment_no,
            strategy: self.strategy.as_str(),
            byte_budget,
            used_bytes,
            assignments,
        }
    }
}

fn fixed(candidate: &Candidate<'_>, level: usize) -> LevelAssignment {
    LevelAssignment {
        object_id: candidate.object.id(),
        level,
        utility: -1.0,
        predicted_visible: candidate.visible,
    }
}

fn clamp_level(object: &TrackedObject, level: usize, source: &'static str) -> usize {
    let max = object.max_level();
    if level > max {
        warn!(
            object = object.name(),
            requested = level,
            max,
            source,
            "requested level exceeds catalog; clamping"
        );
        max
    } else {
        level
    }
}
