//! Scatter-delay retransmission scheduling.
//!
//! The protocol state never sleeps. It asks for a [`Task`] to be run after a
//! delay; the event loop keeps the deadlines here and hands expired tasks
//! back through `on_timer`, where the state re-checks the task's guard and
//! re-arms it if the step still needs repeating.
use std::collections::HashMap;
use std::ops::Add;
use std::time::Duration;

/// A deferred or repeating protocol step. At most one deadline per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {
    Find,
    Offer,
    Request,
    Response,
    MemberInfoRequest,
    MemberInfoResponse,
    SynchRequest,
    SynchResponse,
    SynchToken,
    Finish,
    FinishAck,
    FinishTimeout,
}

/// Deadline table keyed by task.
///
/// Generic over the clock so simulations can drive it with virtual time;
/// the runtime uses [`tokio::time::Instant`].
#[derive(Debug, Clone)]
pub struct Scheduler<T = tokio::time::Instant> {
    deadlines: HashMap<Task, T>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }
}

impl<T> Scheduler<T>
where
    T: Copy + Ord + Add<Duration, Output = T>,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `task` to fire at `now + delay`, replacing any earlier deadline.
    pub fn arm(&mut self, task: Task, now: T, delay: Duration) {
        self.deadlines.insert(task, now + delay);
    }

    pub fn cancel(&mut self, task: Task) {
        self.deadlines.remove(&task);
    }

    pub fn is_armed(&self, task: Task) -> bool {
        self.deadlines.contains_key(&task)
    }

    pub fn next_deadline(&self) -> Option<T> {
        self.deadlines.values().copied().min()
    }

    /// Remove and return every task due at `now`, earliest first.
    pub fn pop_expired(&mut self, now: T) -> Vec<Task> {
        let mut due: Vec<(T, Task)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(task, at)| (*at, *task))
            .collect();
        due.sort();
        for (_, task) in &due {
            self.deadlines.remove(task);
        }
        due.into_iter().map(|(_, task)| task).collect()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
