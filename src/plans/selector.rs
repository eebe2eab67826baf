//! Next-target selection.

use rand::Rng;
use rand::rngs::OsRng;

use crate::crd::{NodeRole, PlanCommandTargetStatus, PlanCommandTargetsStatus, TargetState};

/// Source of uniform indices, injectable for tests.
pub trait RandomSource: Send + Sync {
    /// Uniform index in `0..len`. `len` is never zero.
    fn index(&self, len: usize) -> usize;
}

/// Operating-system backed randomness.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn index(&self, len: usize) -> usize {
        let mut rng = OsRng;
        rng.gen_range(0..len)
    }
}

/// Random pending target out of `targets`.
pub fn select_pending_random<'a>(
    targets: &'a [PlanCommandTargetStatus],
    rng: &dyn RandomSource,
) -> Option<&'a PlanCommandTargetStatus> {
    let pending: Vec<&PlanCommandTargetStatus> = targets
        .iter()
        .filter(|t| t.state == TargetState::SignalPending)
        .collect();
    if pending.is_empty() {
        return None;
    }
    pending.get(rng.index(pending.len())).copied()
}

/// Next target to signal. Workers are only considered once no controller
/// is pending.
pub fn find_next_schedulable(
    status: &PlanCommandTargetsStatus,
    rng: &dyn RandomSource,
) -> Option<(NodeRole, String)> {
    NodeRole::ALL.into_iter().find_map(|role| {
        select_pending_random(status.group(role), rng).map(|t| (role, t.name.clone()))
    })
}
