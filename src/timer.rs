//! Single-owner timer value type.
//!
//! Components hold `Option<Deadline>` fields and poll them with the current
//! instant. Arming replaces the old value and clearing drops it, so a timer
//! can never outlive or be shared beyond the component that owns it.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    armed_at: Instant,
    at: Instant,
}

impl Deadline {
    /// Arms a deadline `delay` after `now`.
    pub fn arm(now: Instant, delay: Duration) -> Self {
        Self {
            armed_at: now,
            at: now + delay,
        }
    }

    /// Instant the timer was armed.
    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }

    /// Instant the timer fires.
    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.at
    }

    /// Time left until the deadline, zero once due.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.at.saturating_duration_since(now)
    }
}

/// Takes the deadline out of `slot` if it is due, leaving `None` behind.
pub fn take_if_due(slot: &mut Option<Deadline>, now: Instant) -> Option<Deadline> {
    match slot {
        Some(deadline) if deadline.is_due(now) => slot.take(),
        _ => None,
    }
}

/// Earliest of a set of optional deadlines.
pub fn earliest<I>(deadlines: I) -> Option<Instant>
where
    I: IntoIterator<Item = Option<Deadline>>,
{
    deadlines.into_iter().flatten().map(|d| d.at()).min()
}

/// Sleeps on the tokio timer until `deadline`, or forever when there is none.
///
/// Meant for the timer arm of a `select!` loop.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
