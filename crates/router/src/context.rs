//! Per-call deadline carried from the caller into the dispatcher.

use tokio::time::{Duration, Instant};

/// Deadline information for one routed call.
///
/// The caller's deadline governs the primary call only. Verification work
/// gets a fresh deadline of the same length, taken when it is launched, and
/// is never tied to the caller's future: dropping the caller does not stop
/// it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// No caller deadline; the router's default timeout applies.
    pub fn background() -> Self {
        Self { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the caller's deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Deadline for work done on the caller's behalf.
    pub fn effective_deadline(&self, default: Duration) -> Instant {
        self.deadline.unwrap_or_else(|| Instant::now() + default)
    }

    /// Deadline for detached verification work: the caller's remaining
    /// budget (or `default`), measured from now.
    pub fn detached_deadline(&self, default: Duration) -> Instant {
        Instant::now() + self.remaining().unwrap_or(default)
    }
}
