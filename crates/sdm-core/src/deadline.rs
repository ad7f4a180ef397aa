// deadline.rs — Cooperative time budgets.
//
// Every fulfillment and every aspect extraction receives a Deadline. Long
// running work polls `expired()` between units (files, commands) and returns
// a failure result instead of running past it.

use std::time::{Duration, Instant};

/// An optional point in time after which work should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self { at: None }
    }

    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
        }
    }

    /// A deadline at a fixed instant.
    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// Build from an optional budget; `None` means unbounded.
    pub fn from_budget(budget: Option<Duration>) -> Self {
        budget.map(Self::after).unwrap_or_default()
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before expiry. `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.at, other.at) {
            (Some(a), Some(b)) => Deadline::at(a.min(b)),
            (Some(_), None) => self,
            (None, _) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_deadline_never_expires() {
        let d = Deadline::none();
        assert!(!d.expired());
        assert!(d.remaining().is_none());
    }

    #[test]
    fn zero_budget_is_expired() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.expired());
        assert_eq!(d.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn min_prefers_the_bounded_deadline() {
        let bounded = Deadline::after(Duration::from_secs(60));
        assert_eq!(Deadline::none().min(bounded), bounded);
        assert_eq!(bounded.min(Deadline::none()), bounded);
        let sooner = Deadline::after(Duration::ZERO);
        assert!(bounded.min(sooner).expired());
    }
}
