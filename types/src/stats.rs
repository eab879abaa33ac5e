use serde::Serialize;

use crate::lifecycle::Lifecycle;

/// Point-in-time view of a worker, for observability only.
///
/// The snapshot is best-effort: counters are read without synchronising
/// against in-flight submissions, so never branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Submitted tasks the scheduler has not finished or dropped yet.
    pub pending_tasks: usize,
    pub running: bool,
    pub state: Lifecycle,
}

impl Stats {
    #[must_use]
    pub fn idle(state: Lifecycle) -> Self {
        Self {
            pending_tasks: 0,
            running: state == Lifecycle::Running,
            state,
        }
    }
}
