//! Budget-constrained level allocation: Greedy2 and Uniform2.
//!
//! Both start every object at level 0 and charge the level-0 floor against
//! the budget up front, then spend what remains on visible objects in
//! descending utility order. Only the upgrade order differs.
use crate::abr::{Candidate, LevelAssignment};

struct Slot<'c, 'a> {
    candidate: &'c Candidate<'a>,
    level: usize,
}

impl Slot<'_, '_> {
    fn upgrade_cost(&self) -> Option<u64> {
        let object = self.candidate.object;
        let next = object.level_size(self.level + 1)?;
        let current = object.level_size(self.level)?;
        Some(next.saturating_sub(current))
    }

    fn into_assignment(self) -> LevelAssignment {
        LevelAssignment {
            object_id: self.candidate.object.id(),
            level: self.level,
            utility: self.candidate.utility,
            predicted_visible: self.candidate.visible,
        }
    }
}

/// Stable sort by descending utility, every object at level 0.
fn ranked<'c, 'a>(candidates: &'c [Candidate<'a>]) -> Vec<Slot<'c, 'a>> {
    let mut slots: Vec<Slot<'c, 'a>> = candidates
        .iter()
        .map(|candidate| Slot {
            candidate,
            level: 0,
        })
        .collect();
    slots.sort_by(|a, b| b.candidate.utility.total_cmp(&a.candidate.utility));
    slots
}

fn level_zero_usage(slots: &[Slot<'_, '_>]) -> u64 {
    slots
        .iter()
        .filter_map(|slot| slot.candidate.object.level_size(0))
        .fold(0u64, u64::saturating_add)
}

fn fits(used: u64, cost: u64, byte_budget: f64) -> bool {
    used.saturating_add(cost) as f64 <= byte_budget
}

/// Upgrades the highest-utility visible object as far as the budget allows
/// before moving on to the next one.
pub fn greedy(candidates: &[Candidate<'_>], byte_budget: f64) -> Vec<LevelAssignment> {
    let mut slots = ranked(candidates);
    let mut used = level_zero_usage(&slots);

    for slot in slots.iter_mut().filter(|slot| slot.candidate.visible) {
        while let Some(cost) = slot.upgrade_cost() {
            if !fits(used, cost, byte_budget) {
                break;
            }
            used += cost;
            slot.level += 1;
        }
    }

    slots.into_iter().map(Slot::into_assignment).collect()
}

/// Raises every visible object one level per pass, in utility order.
///
/// A pass that fails to fit the lowest-utility object ends the allocation
/// after that pass; the flag is only raised when the last-ranked object still
/// had a level to try.
pub fn uniform(candidates: &[Candidate<'_>], byte_budget: f64) -> Vec<LevelAssignment> {
    let mut slots = ranked(candidates);
    let mut used = level_zero_usage(&slots);
    let max_levels = candidates
        .iter()
        .map(|c| c.object.num_levels())
        .max()
        .unwrap_or(0);
    let last = slots.len().saturating_sub(1);
    let mut exhausted = false;

    for _pass in 1..max_levels {
        if exhausted {
            break;
        }
        for (position, slot) in slots.iter_mut().enumerate() {
            if !slot.candidate.visible {
                continue;
            }
            let Some(cost) = slot.upgrade_cost() else {
                continue;
            };
            if !fits(used, cost, byte_budget) {
                if position == last {
                    exhausted = true;
                }
                continue;
            }
            used += cost;
            slot.level += 1;
        }
    }

    slots.into_iter().map(Slot::into_assignment).collect()
}
