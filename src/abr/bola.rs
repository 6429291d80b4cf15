//! Per-object Lyapunov level selection (Bola1).
//!
//! For each visible object every level `m` is scored as
//! `(V * (v_m + gamma * delta) - Q / delta) / S_m` with `v_m = ln(2 * S_m / S_0)`,
//! where `Q` is the buffered playback time ahead of the play head and `delta`
//! the segment duration. The first level reaching the maximum score wins.
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::abr::{Candidate, LevelAssignment};
use crate::object::TrackedObject;

/// Tuning constants for Bola1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BolaParams {
    /// Trade-off between quality utility and buffer drain.
    pub v: f64,
    /// Weight of the rebuffering-avoidance term.
    pub gamma: f64,
}

impl Default for BolaParams {
    fn default() -> Self {
        Self { v: 200.0, gamma: 0.9 }
    }
}

impl BolaParams {
    pub fn is_valid(&self) -> bool {
        self.v.is_finite() && self.v > 0.0 && self.gamma.is_finite() && self.gamma >= 0.0
    }

    /// Score of a level of size `s_m` relative to the level-0 size `s_0`.
    ///
    /// `None` when either size is zero, since the utility term is undefined.
    pub fn score(&self, s_m: u64, s_0: u64, delta_secs: f64, q_secs: f64) -> Option<f64> {
        if s_m == 0 || s_0 == 0 {
            return None;
        }
        let (s_m, s_0) = (s_m as f64, s_0 as f64);
        let v_m = (2.0 * s_m / s_0).ln();
        Some((self.v * (v_m + self.gamma * delta_secs) - q_secs / delta_secs) / s_m)
    }

    /// Best level for `object` and its score.
    pub fn select_level(&self, object: &TrackedObject, delta_secs: f64, q_secs: f64) -> Option<(usize, f64)> {
        let s_0 = object.level_size(0)?;
        let mut best: Option<(usize, f64)> = None;
        for level in object.levels() {
            let Some(score) = self.score(level.size_bytes(), s_0, delta_secs, q_secs) else {
                continue;
            };
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((level.index, score)),
            }
        }
        best
    }
}

/// Selects a level per object; output sorted by descending score.
pub fn bola(
    candidates: &[Candidate<'_>],
    params: &BolaParams,
    delta_secs: f64,
    buffer_secs: f64,
) -> Vec<LevelAssignment> {
    let mut out: Vec<LevelAssignment> = candidates
        .iter()
        .map(|candidate| {
            let object = candidate.object;
            let (level, utility) = if !candidate.visible {
                (0, f64::NEG_INFINITY)
            } else {
                match params.select_level(object, delta_secs, buffer_secs) {
                    Some(best) => best,
                    None => {
                        warn!(object = %object.id(), "bola cannot score zero-sized levels; using level 0");
                        (0, f64::NEG_INFINITY)
                    }
                }
            };
            LevelAssignment {
                object_id: object.id(),
                level,
                utility,
                predicted_visible: candidate.visible,
            }
        })
        .collect();
    out.sort_by(|a, b| b.utility.total_cmp(&a.utility));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Level, ObjectId, Placement};

    const DELTA: f64 = 1.0 / 24.0;

    fn object(id: u32, sizes: &[u64]) -> TrackedObject {
        let levels = sizes
            .iter()
            .enumerate()
            .map(|(i, s)| Level::new(i, *s, 0, i as f64))
            .collect();
        TrackedObject::new(ObjectId(id), format!("obj{id}"), levels, Placement::default(), 1.0, 100)
            .unwrap()
    }

    #[test]
    fn empty_buffer_prefers_lowest_level() {
        let obj = object(1, &[10, 20, 30, 40]);
        let (level, _) = BolaParams::default().select_level(&obj, DELTA, 0.0).unwrap();
        assert_eq!(level, 0);
    }

    #[test]
    fn deep_buffer_prefers_highest_level() {
        let obj = object(1, &[10, 20, 30, 40]);
        let (level, _) = BolaParams::default().select_level(&obj, DELTA, 10.0).unwrap();
        assert_eq!(level, 3);
    }

    #[test]
    fn level_is_non_decreasing_in_buffer() {
        let obj = object(1, &[10_000, 20_000, 30_000, 40_000]);
        let params = BolaParams::default();
        let mut previous = 0;
        for step in 0..=120 {
            let q = step as f64 * 0.1;
            let (level, _) = params.select_level(&obj, DELTA, q).unwrap();
            assert!(level >= previous, "level dropped from {previous} to {level} at Q={q}");
            previous = level;
        }
        assert_eq!(previous, 3);
    }

    #[test]
    fn ties_keep_first_level() {
        let obj = object(1, &[10, 10]);
        let (level, _) = BolaParams::default().select_level(&obj, DELTA, 0.5).unwrap();
        assert_eq!(level, 0);
    }

    #[test]
    fn invisible_objects_get_floor_and_sort_last() {
        let a = object(1, &[10, 20, 30, 40]);
        let b = object(2, &[10, 20, 30, 40]);
        let candidates = [Candidate::new(&a, 0.0, false), Candidate::new(&b, 0.0, true)];
        let out = bola(&candidates, &BolaParams::default(), DELTA, 10.0);
        assert_eq!(out[0].object_id, ObjectId(2));
        assert_eq!(out[0].level, 3);
        assert_eq!(out[1].level, 0);
        assert_eq!(out[1].utility, f64::NEG_INFINITY);
    }
}
